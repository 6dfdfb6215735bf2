use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use marker_alignments::errors::Error;
use marker_alignments::filter::{self, FilterOptions};
use tracing_subscriber::filter::LevelFilter;

/// Apply a filter to taxon output of summarize_marker_alignments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input summary file
    #[arg(long)]
    input: PathBuf,

    /// Output path
    #[arg(long)]
    output: PathBuf,

    /// Require min markers to keep a taxon
    #[arg(long)]
    require_min_markers: Option<u64>,

    /// Use a null model where markers associate with taxa at random, and
    /// select the most appropriate value for --require-min-markers
    #[arg(long)]
    use_noise_model_for_min_markers: bool,

    /// Total number of taxa in the reference - required for fitting the
    /// noise model
    #[arg(long)]
    total_num_taxa: Option<u64>,

    /// Sample size (sum of shape parameters a and b when proportion of
    /// markers per taxon is modelled as a beta distribution) - required for
    /// fitting the noise model
    #[arg(long)]
    taxon_to_markers_beta_sample_size: Option<f64>,

    /// Turn on logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::INFO } else { LevelFilter::WARN };
    tracing_subscriber::fmt().with_target(false).with_max_level(level).init();

    let options = FilterOptions {
        input: cli.input,
        output: cli.output,
        require_min_markers: cli.require_min_markers,
        use_noise_model_for_min_markers: cli.use_noise_model_for_min_markers,
        total_num_taxa: cli.total_num_taxa,
        beta_sample_size: cli.taxon_to_markers_beta_sample_size,
    };

    match filter::run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error @ Error::Config(_)) => {
            eprintln!("{error}");
            ExitCode::from(2)
        }
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}
