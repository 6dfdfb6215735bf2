use std::collections::HashMap;
use std::path::PathBuf;

use regex::Regex;
use tracing::info;

use crate::errors::{ConfigError, Error};
use crate::ingest::{read_alignments, ReadFilters, ReferenceNameParser};
use crate::refdb;
use crate::report;
use crate::report::OutputType;
use crate::store::AlignmentStore;

/// Everything the summarize pipeline needs, resolved from the command line.
pub struct SummarizeOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sqlite_db_path: Option<PathBuf>,
    pub refdb_format: Option<String>,
    pub refdb_regex_taxon: Option<String>,
    pub refdb_regex_marker: Option<String>,
    pub refdb_marker_to_taxon_path: Option<PathBuf>,
    pub num_reads: Option<u64>,
    pub output_type: OutputType,
    pub min_read_mapq: u8,
    pub min_read_query_length: u64,
    pub min_read_match_identity: f64,
    pub min_taxon_num_markers: Option<u64>,
    pub min_taxon_num_reads: Option<u64>,
    pub min_taxon_fraction_primary_matches: Option<f64>,
    pub min_taxon_avg_match_identity: Option<f64>,
    pub min_taxon_better_marker_cluster_averages_ratio: Option<f64>,
    pub threshold_avg_match_identity_to_call_known_taxon: Option<f64>,
    pub threshold_num_taxa_to_call_unknown_taxon: Option<u64>,
    pub threshold_num_markers_to_call_unknown_taxon: Option<u64>,
    pub threshold_num_reads_to_call_unknown_taxon: Option<u64>,
}

impl SummarizeOptions {
    /// Resolves the reference database patterns: a named format, or the two
    /// explicit regexes.
    fn reference_name_parser(&self) -> Result<ReferenceNameParser, Error> {
        let (pattern_taxon, pattern_marker) = match &self.refdb_format {
            Some(format) => refdb::taxon_and_marker_patterns(format)
                .ok_or_else(|| ConfigError::UnknownRefdbFormat(format.clone()))?,
            None => match (&self.refdb_regex_taxon, &self.refdb_regex_marker) {
                (Some(taxon), Some(marker)) => (taxon.clone(), marker.clone()),
                _ => return Err(ConfigError::MissingRefdbPatterns.into()),
            },
        };

        let marker_to_taxon = match &self.refdb_marker_to_taxon_path {
            Some(path) => refdb::read_marker_to_taxon(path)?.0,
            None => HashMap::new(),
        };

        Ok(ReferenceNameParser {
            pattern_taxon: Regex::new(&pattern_taxon).map_err(ConfigError::InvalidRegex)?,
            pattern_marker: Regex::new(&pattern_marker).map_err(ConfigError::InvalidRegex)?,
            marker_to_taxon,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // the mapq filter drops secondary matches on the way in, which would
        // corrupt any statistic that counts them
        let uses_secondary_matches = self.min_taxon_fraction_primary_matches.unwrap_or(0.0) > 0.0
            || self
                .min_taxon_better_marker_cluster_averages_ratio
                .unwrap_or(0.0)
                > 0.0;
        if self.min_read_mapq > 0 && uses_secondary_matches {
            return Err(ConfigError::MapqWithSecondaryMatchFilters);
        }

        if self.output_type.requires_total_reads() && self.num_reads.is_none() {
            return Err(ConfigError::NumReadsRequired(self.output_type.name().to_string()));
        }

        Ok(())
    }
}

/// Runs the whole pipeline: ingestion, marker clustering, the taxon filter
/// chain, taxon clustering, the relabel transform, and the report.
pub fn run(options: &SummarizeOptions) -> Result<(), Error> {
    options.validate()?;
    let parser = options.reference_name_parser()?;

    let filters = ReadFilters {
        min_mapq: options.min_read_mapq,
        min_query_length: options.min_read_query_length,
        min_match_identity: options.min_read_match_identity,
    };

    let mut alignment_store = AlignmentStore::new(options.sqlite_db_path.as_deref())?;
    read_alignments(&options.input, &mut alignment_store, &parser, &filters)?;

    alignment_store.cluster_markers_by_matches()?;

    if let Some(min_fraction) = positive(options.min_taxon_fraction_primary_matches) {
        alignment_store.modify_table_filter_taxa_on_multiple_matches(min_fraction)?;
    }

    let min_num_markers = options.min_taxon_num_markers.unwrap_or(0);
    let min_num_reads = options.min_taxon_num_reads.unwrap_or(0);
    if min_num_markers > 0 || min_num_reads > 0 {
        alignment_store.modify_table_filter_taxa_on_num_markers_and_reads(min_num_markers, min_num_reads)?;
    }

    if let Some(min_avg_identity) = positive(options.min_taxon_avg_match_identity) {
        alignment_store.modify_table_filter_taxa_on_avg_identity(min_avg_identity)?;
    }

    if let Some(min_ratio) = positive(options.min_taxon_better_marker_cluster_averages_ratio) {
        alignment_store.modify_table_filter_taxa_on_cluster_averages(min_ratio)?;
    }

    alignment_store.cluster_taxa_by_matches()?;

    let threshold_identity = options.threshold_avg_match_identity_to_call_known_taxon.unwrap_or(0.0);
    let threshold_num_taxa = options.threshold_num_taxa_to_call_unknown_taxon.unwrap_or(0);
    let threshold_num_markers = options.threshold_num_markers_to_call_unknown_taxon.unwrap_or(0);
    let threshold_num_reads = options.threshold_num_reads_to_call_unknown_taxon.unwrap_or(0);
    if threshold_identity > 0.0 || threshold_num_taxa > 0 || threshold_num_markers > 0 || threshold_num_reads > 0
    {
        alignment_store.modify_table_transform_taxa_on_thresholds_and_clusters(
            threshold_identity,
            threshold_num_taxa,
            threshold_num_markers,
            threshold_num_reads,
        )?;
    }

    report::write_file(&alignment_store, options.output_type, options.num_reads, &options.output)?;
    info!(output = %options.output.display(), output_type = options.output_type.name(), "Report written");

    Ok(())
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|&v| v > 0.0)
}
