use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use marker_alignments::errors::Error;
use marker_alignments::report::OutputType;
use marker_alignments::summarize::{self, SummarizeOptions};

/// Process and summarise alignments of metagenomic sequencing reads to
/// reference databases of marker genes
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input SAM/BAM
    #[arg(long)]
    input: PathBuf,

    /// Output path
    #[arg(long)]
    output: PathBuf,

    /// Store a sqlite database under this path instead of in memory
    #[arg(long)]
    sqlite_db_path: Option<PathBuf>,

    /// Reference database used for alignment, required for parsing reference
    /// names. Supported values: eukprot, chocophlan, generic, no-split (no
    /// split into marker and taxon)
    #[arg(long, default_value = "generic")]
    refdb_format: String,

    /// Regex to read taxon name from reference name
    #[arg(long)]
    refdb_regex_taxon: Option<String>,

    /// Regex to read marker name from reference name
    #[arg(long)]
    refdb_regex_marker: Option<String>,

    /// Lookup file, two columns - marker name, taxon name
    #[arg(long)]
    refdb_marker_to_taxon_path: Option<PathBuf>,

    /// Total number of reads (required for CPM output)
    #[arg(long)]
    num_reads: Option<u64>,

    /// Output type
    #[arg(long, value_enum, default_value_t = OutputType::MarkerCoverage)]
    output_type: OutputType,

    /// When reading the input, skip alignments with MAPQ < min-read-mapq
    #[arg(long, default_value_t = 0)]
    min_read_mapq: u8,

    /// When reading the input, skip alignments shorter than
    /// min-read-query-length
    #[arg(long, default_value_t = 0)]
    min_read_query_length: u64,

    /// When reading the input, skip alignments where the proportion of
    /// matching bases in the alignment is less than min-read-match-identity
    #[arg(long, default_value_t = 0.0)]
    min_read_match_identity: f64,

    /// Only keep taxa with at least min-taxon-num-markers markers
    #[arg(long)]
    min_taxon_num_markers: Option<u64>,

    /// Only keep taxa with at least min-taxon-num-reads reads
    #[arg(long)]
    min_taxon_num_reads: Option<u64>,

    /// Only keep taxa where no more than min-taxon-fraction-primary-matches
    /// fraction of alignments is inferior / secondary
    #[arg(long)]
    min_taxon_fraction_primary_matches: Option<f64>,

    /// Only keep taxa whose average match identity, over the best placement
    /// of each query, is at least min-taxon-avg-match-identity
    #[arg(long)]
    min_taxon_avg_match_identity: Option<f64>,

    /// Only keep taxa where the ratio between markers which have at least
    /// average match identity relative to their clusters and markers with
    /// identity below average is at least
    /// min-taxon-better-marker-cluster-averages-ratio
    #[arg(long)]
    min_taxon_better_marker_cluster_averages_ratio: Option<f64>,

    /// Threshold on average match identity to return taxon in reference
    #[arg(long)]
    threshold_avg_match_identity_to_call_known_taxon: Option<f64>,

    /// To positively identify an unknown taxon (fits all criteria except
    /// match identity) expect this many taxa from a taxon cluster
    #[arg(long)]
    threshold_num_taxa_to_call_unknown_taxon: Option<u64>,

    /// To positively identify an unknown taxon (fits all criteria except
    /// match identity) expect this many markers from a taxon cluster
    #[arg(long)]
    threshold_num_markers_to_call_unknown_taxon: Option<u64>,

    /// To positively identify an unknown taxon (fits all criteria except
    /// match identity) expect this many reads from a taxon cluster
    #[arg(long)]
    threshold_num_reads_to_call_unknown_taxon: Option<u64>,
}

impl Cli {
    fn into_options(self) -> SummarizeOptions {
        // explicit regexes win over the format default
        let (refdb_format, refdb_regex_taxon, refdb_regex_marker) =
            if self.refdb_regex_taxon.is_some() || self.refdb_regex_marker.is_some() {
                (None, self.refdb_regex_taxon, self.refdb_regex_marker)
            } else {
                (Some(self.refdb_format), None, None)
            };

        SummarizeOptions {
            input: self.input,
            output: self.output,
            sqlite_db_path: self.sqlite_db_path,
            refdb_format,
            refdb_regex_taxon,
            refdb_regex_marker,
            refdb_marker_to_taxon_path: self.refdb_marker_to_taxon_path,
            num_reads: self.num_reads,
            output_type: self.output_type,
            min_read_mapq: self.min_read_mapq,
            min_read_query_length: self.min_read_query_length,
            min_read_match_identity: self.min_read_match_identity,
            min_taxon_num_markers: self.min_taxon_num_markers,
            min_taxon_num_reads: self.min_taxon_num_reads,
            min_taxon_fraction_primary_matches: self.min_taxon_fraction_primary_matches,
            min_taxon_avg_match_identity: self.min_taxon_avg_match_identity,
            min_taxon_better_marker_cluster_averages_ratio: self
                .min_taxon_better_marker_cluster_averages_ratio,
            threshold_avg_match_identity_to_call_known_taxon: self
                .threshold_avg_match_identity_to_call_known_taxon,
            threshold_num_taxa_to_call_unknown_taxon: self.threshold_num_taxa_to_call_unknown_taxon,
            threshold_num_markers_to_call_unknown_taxon: self.threshold_num_markers_to_call_unknown_taxon,
            threshold_num_reads_to_call_unknown_taxon: self.threshold_num_reads_to_call_unknown_taxon,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let options = cli.into_options();

    match summarize::run(&options) {
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
