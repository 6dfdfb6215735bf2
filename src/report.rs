use std::fs::File;
use std::io::Write;
use std::path::Path;

use clap::ValueEnum;
use rusqlite::types::Value;
use rusqlite::ToSql;

use crate::errors::Error;
use crate::store;
use crate::store::{AlignmentStore, QueryRows};

/// The closed set of output views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum OutputType {
    MarkerCoverage,
    MarkerReadCount,
    MarkerCpm,
    MarkerAll,
    TaxonCoverage,
    TaxonReadAndMarkerCount,
    TaxonCpm,
    TaxonAll,
    PairsOfTaxaSharedQueries,
    TaxaInMarkerClusters,
}

impl OutputType {
    pub fn name(&self) -> &'static str {
        match self {
            OutputType::MarkerCoverage => "marker_coverage",
            OutputType::MarkerReadCount => "marker_read_count",
            OutputType::MarkerCpm => "marker_cpm",
            OutputType::MarkerAll => "marker_all",
            OutputType::TaxonCoverage => "taxon_coverage",
            OutputType::TaxonReadAndMarkerCount => "taxon_read_and_marker_count",
            OutputType::TaxonCpm => "taxon_cpm",
            OutputType::TaxonAll => "taxon_all",
            OutputType::PairsOfTaxaSharedQueries => "pairs_of_taxa_shared_queries",
            OutputType::TaxaInMarkerClusters => "taxa_in_marker_clusters",
        }
    }

    /// CPM style views scale by the library size, so they cannot be computed
    /// without the total read count.
    pub fn requires_total_reads(&self) -> bool {
        matches!(
            self,
            OutputType::MarkerCpm | OutputType::MarkerAll | OutputType::TaxonCpm | OutputType::TaxonAll
        )
    }

    fn num_reads_parameters(&self) -> usize {
        match self {
            OutputType::MarkerCpm | OutputType::MarkerAll | OutputType::TaxonCpm => 1,
            OutputType::TaxonAll => 2,
            _ => 0,
        }
    }

    fn sql(&self) -> String {
        let marker_all_stats = [
            store::MARKER_COVERAGE_STATS,
            store::MARKER_CPM_STATS,
            store::MARKER_READ_COUNT_STATS,
        ]
        .join(", ");
        let marker_all_per_query =
            [store::PER_QUERY_COVERAGE, store::PER_QUERY_WEIGHT_FRACTION].join(", ");

        match self {
            OutputType::MarkerCoverage => {
                store::marker_query(store::MARKER_COVERAGE_STATS, store::PER_QUERY_COVERAGE)
            }
            OutputType::MarkerReadCount => {
                store::marker_query(store::MARKER_READ_COUNT_STATS, store::PER_QUERY_WEIGHT_FRACTION)
            }
            OutputType::MarkerCpm => store::marker_query(store::MARKER_CPM_STATS, store::PER_QUERY_COVERAGE),
            OutputType::MarkerAll => store::marker_query(&marker_all_stats, &marker_all_per_query),
            OutputType::TaxonCoverage => store::taxon_query(
                store::TAXON_COVERAGE_STATS,
                &store::marker_query(store::MARKER_COVERAGE_STATS, store::PER_QUERY_COVERAGE),
            ),
            OutputType::TaxonReadAndMarkerCount => store::taxon_query(
                store::TAXON_READ_AND_MARKER_COUNT_STATS,
                &store::marker_query(store::MARKER_READ_COUNT_STATS, store::PER_QUERY_WEIGHT_FRACTION),
            ),
            OutputType::TaxonCpm => store::taxon_query(
                store::TAXON_CPM_STATS,
                &store::marker_query(store::MARKER_COVERAGE_STATS, store::PER_QUERY_COVERAGE),
            ),
            OutputType::TaxonAll => store::taxon_query(
                store::TAXON_ALL_STATS,
                &store::marker_query(&marker_all_stats, &marker_all_per_query),
            ),
            OutputType::PairsOfTaxaSharedQueries => store::COUNTS_OF_COMMON_MATCHES_IN_TAXA_SQL.to_string(),
            OutputType::TaxaInMarkerClusters => store::TAXA_IN_MARKER_CLUSTERS_SQL.to_string(),
        }
    }
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Executes the aggregation query behind a view.
pub fn get_output(
    alignment_store: &AlignmentStore,
    output_type: OutputType,
    total_reads: Option<u64>,
) -> Result<QueryRows, Error> {
    let total_reads = total_reads.map(|n| n as i64);
    let params: Vec<&dyn ToSql> = match &total_reads {
        Some(n) => vec![n as &dyn ToSql; output_type.num_reads_parameters()],
        None => Vec::new(),
    };
    alignment_store.query_rows(&output_type.sql(), &params)
}

enum ColumnFormat {
    Text,
    Count,
    Reads,
    Ratio,
}

/// Column formats are fixed per column name: strings raw, counts as
/// integers, read counts with two decimals, everything else with six.
fn column_format(column: &str) -> ColumnFormat {
    match column {
        "taxon" | "marker" | "taxon_a" | "taxon_b" => ColumnFormat::Text,
        "taxon_num_markers" | "marker_alignment_count" | "taxon_num_alignments" | "cluster_id"
        | "num_matches" => ColumnFormat::Count,
        "marker_read_count" => ColumnFormat::Reads,
        _ => ColumnFormat::Ratio,
    }
}

fn format_value(column: &str, value: &Value) -> String {
    let as_f64 = |value: &Value| match value {
        Value::Integer(n) => *n as f64,
        Value::Real(x) => *x,
        _ => 0.0,
    };

    match (column_format(column), value) {
        (_, Value::Null) => String::new(),
        (ColumnFormat::Text, Value::Text(text)) => text.clone(),
        (ColumnFormat::Text, value) => as_f64(value).to_string(),
        (ColumnFormat::Count, Value::Integer(n)) => n.to_string(),
        (ColumnFormat::Count, value) => (as_f64(value) as i64).to_string(),
        (ColumnFormat::Reads, value) => format!("{:.2}", as_f64(value)),
        (ColumnFormat::Ratio, Value::Text(text)) => text.clone(),
        (ColumnFormat::Ratio, value) => format!("{:.6}", as_f64(value)),
    }
}

/// Streams a view as tab separated output, header first.
pub fn write<W: Write>(
    alignment_store: &AlignmentStore,
    output_type: OutputType,
    total_reads: Option<u64>,
    writer: W,
) -> Result<(), Error> {
    let output = get_output(alignment_store, output_type, total_reads)?;

    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    writer.write_record(&output.columns)?;
    for row in &output.rows {
        let formatted: Vec<String> = output
            .columns
            .iter()
            .zip(row.iter())
            .map(|(column, value)| format_value(column, value))
            .collect();
        writer.write_record(&formatted)?;
    }
    writer.flush()?;

    Ok(())
}

pub fn write_file(
    alignment_store: &AlignmentStore,
    output_type: OutputType,
    total_reads: Option<u64>,
    output_path: &Path,
) -> Result<(), Error> {
    let file = File::create(output_path)?;
    write(alignment_store, output_type, total_reads, file)
}
