use indicatif::{ProgressBar, ProgressStyle};

pub static SPINNER_TOTALS_TEMPLATE: &str = "{spinner:2.cyan/blue} {msg}: {human_pos}";

pub fn new_spinner_totals(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(SPINNER_TOTALS_TEMPLATE).expect("Invalid spinner template");
    ProgressBar::new_spinner()
        .with_message(message.to_string())
        .with_style(style)
}
