use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::Deserialize;
use tracing::info;

use crate::errors::{ConfigError, Error, ParseError};
use crate::noise_model::cutoff_fit_for_noise_model;

/// Options for filtering the taxon summary produced by the summarize tool.
pub struct FilterOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub require_min_markers: Option<u64>,
    pub use_noise_model_for_min_markers: bool,
    pub total_num_taxa: Option<u64>,
    pub beta_sample_size: Option<f64>,
}

/// One row of the taxon summary. Only the marker count is typed; every other
/// column rides along unchanged so the output keeps whatever view produced
/// the input.
#[derive(Debug, Deserialize)]
struct TaxonSummaryRow {
    #[serde(deserialize_with = "num_markers_from_str")]
    taxon_num_markers: u64,

    #[serde(flatten)]
    other_columns: HashMap<String, String>,
}

impl TaxonSummaryRow {
    fn field(&self, column: &str) -> String {
        if column == "taxon_num_markers" {
            self.taxon_num_markers.to_string()
        } else {
            self.other_columns.get(column).cloned().unwrap_or_default()
        }
    }
}

fn num_markers_from_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// Reads the tab separated taxon summary back in, decides the min markers
/// cutoff (fixed, or fitted with the noise model), and rewrites the file
/// with only the taxa that clear it.
pub fn run(options: &FilterOptions) -> Result<(), Error> {
    let noise_model_inputs = if options.use_noise_model_for_min_markers {
        let total_num_taxa = options.total_num_taxa.ok_or(ConfigError::TotalNumTaxaRequired)?;
        let beta_sample_size = options.beta_sample_size.ok_or(ConfigError::BetaSampleSizeRequired)?;
        Some((total_num_taxa, beta_sample_size))
    } else {
        None
    };

    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(&options.input)?;
    let headers = reader.headers()?.clone();
    if !headers.iter().any(|header| header == "taxon_num_markers") {
        return Err(ParseError::MissingColumn("taxon_num_markers".to_string()).into());
    }

    let rows: Vec<TaxonSummaryRow> = reader.deserialize().collect::<Result<_, _>>()?;
    info!(
        rows = rows.len(),
        input = %options.input.display(),
        "Read the tab separated taxon summary"
    );

    if let Some(total) = options.total_num_taxa {
        if total < rows.len() as u64 {
            return Err(ConfigError::TotalNumTaxaTooLow {
                total,
                rows: rows.len() as u64,
            }
            .into());
        }
    }

    let require_min_markers = if let Some((total_num_taxa, beta_sample_size)) = noise_model_inputs {
        // reference taxa with no hits at all are the zero markers entry
        let mut taxon_counts_with_num_markers = BTreeMap::new();
        taxon_counts_with_num_markers.insert(0, total_num_taxa - rows.len() as u64);
        for row in &rows {
            *taxon_counts_with_num_markers.entry(row.taxon_num_markers).or_insert(0) += 1;
        }

        let cutoff_fit = cutoff_fit_for_noise_model(&taxon_counts_with_num_markers, beta_sample_size);
        match options.require_min_markers {
            Some(explicit) if explicit > cutoff_fit => {
                info!(
                    require_min_markers = explicit,
                    cutoff_fit, "Cutoff fit is less than --require-min-markers, using that instead"
                );
                Some(explicit)
            }
            _ => Some(cutoff_fit),
        }
    } else {
        options.require_min_markers.filter(|&min| min > 0)
    };

    let kept: Vec<&TaxonSummaryRow> = match require_min_markers {
        Some(min) => {
            let kept: Vec<&TaxonSummaryRow> = rows
                .iter()
                .filter(|row| row.taxon_num_markers >= min)
                .collect();
            info!(kept = kept.len(), min_markers = min, "Kept taxa with at least the required markers");
            kept
        }
        None => rows.iter().collect(),
    };

    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(&options.output)?;
    writer.write_record(&headers)?;
    for row in &kept {
        let fields: Vec<String> = headers.iter().map(|column| row.field(column)).collect();
        writer.write_record(&fields)?;
    }
    writer.flush()?;

    info!(
        rows = kept.len(),
        output = %options.output.display(),
        "Wrote the filtered taxon summary"
    );

    Ok(())
}
