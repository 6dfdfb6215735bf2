use std::fs;
use std::path::PathBuf;

use marker_alignments::errors::Error;
use marker_alignments::filter::{self, FilterOptions};
use marker_alignments::report::OutputType;
use marker_alignments::summarize::{self, SummarizeOptions};
use tempfile::TempDir;

const TAXON_REGEX: &str = "^([^:]+):[^:]+$";
const MARKER_REGEX: &str = "^[^:]+:([^:]+)$";

fn example_sam() -> String {
    let mut sam = String::new();
    sam.push_str("@HD\tVN:1.6\tSO:unsorted\n");
    sam.push_str("@SQ\tSN:taxon_1:marker_1\tLN:60\n");
    sam.push_str("@SQ\tSN:taxon_2:marker_2\tLN:100\n");
    sam.push_str("@SQ\tSN:taxon_2:marker_3\tLN:50\n");
    // a perfect 30 base match: identity 1.0, coverage 30/60
    sam.push_str(
        "query_1\t0\ttaxon_1:marker_1\t1\t60\t30M\t*\t0\t0\tACGTACGTACGTACGTACGTACGTACGTAC\t*\tMD:Z:30\n",
    );
    // one substitution and a low mapq: identity 29/30, coverage 30/100
    sam.push_str(
        "query_2\t0\ttaxon_2:marker_2\t1\t5\t30M\t*\t0\t0\tACGTACGTACGTACGTACGTACGTACGTAC\t*\tMD:Z:15A14\n",
    );
    // a two base deletion: identity 30/32, coverage 30/50
    sam.push_str(
        "query_3\t0\ttaxon_2:marker_3\t1\t60\t10M2D20M\t*\t0\t0\tACGTACGTACGTACGTACGTACGTACGTAC\t*\tMD:Z:10^AC20\n",
    );
    sam
}

fn write_fixture(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn summarize_options(input: PathBuf, output: PathBuf) -> SummarizeOptions {
    SummarizeOptions {
        input,
        output,
        sqlite_db_path: None,
        refdb_format: None,
        refdb_regex_taxon: Some(TAXON_REGEX.to_string()),
        refdb_regex_marker: Some(MARKER_REGEX.to_string()),
        refdb_marker_to_taxon_path: None,
        num_reads: None,
        output_type: OutputType::MarkerCoverage,
        min_read_mapq: 0,
        min_read_query_length: 0,
        min_read_match_identity: 0.0,
        min_taxon_num_markers: None,
        min_taxon_num_reads: None,
        min_taxon_fraction_primary_matches: None,
        min_taxon_avg_match_identity: None,
        min_taxon_better_marker_cluster_averages_ratio: None,
        threshold_avg_match_identity_to_call_known_taxon: None,
        threshold_num_taxa_to_call_unknown_taxon: None,
        threshold_num_markers_to_call_unknown_taxon: None,
        threshold_num_reads_to_call_unknown_taxon: None,
    }
}

#[test]
fn summarize_marker_coverage_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    summarize::run(&summarize_options(input, output.clone())).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "taxon\tmarker\tmarker_coverage",
            "taxon_1\tmarker_1\t0.500000",
            "taxon_2\tmarker_2\t0.300000",
            "taxon_2\tmarker_3\t0.600000",
        ]
    );
}

#[test]
fn summarize_taxon_read_and_marker_count_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output.clone());
    options.output_type = OutputType::TaxonReadAndMarkerCount;
    summarize::run(&options).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "taxon\ttaxon_num_reads\ttaxon_num_alignments\ttaxon_num_markers\ttaxon_max_reads_in_marker",
            "taxon_1\t1.000000\t1\t1\t1.000000",
            "taxon_2\t2.000000\t2\t2\t1.000000",
        ]
    );
}

#[test]
fn summarize_taxon_all_scales_by_the_library_size() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output.clone());
    options.output_type = OutputType::TaxonAll;
    options.num_reads = Some(100_000);
    summarize::run(&options).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines[0],
        "taxon\tcoverage\tcpm\ttaxon_num_reads\ttaxon_num_markers\ttaxon_max_reads_in_marker"
    );
    // taxon_1 covers 0.5 of its one marker, 5 cpm at 100k reads
    assert_eq!(lines[1], "taxon_1\t0.500000\t5.000000\t1.000000\t1\t1.000000");
    // taxon_2 averages (0.3 + 0.6) / 2 over its two markers
    assert_eq!(lines[2], "taxon_2\t0.450000\t4.500000\t2.000000\t2\t1.000000");
}

#[test]
fn summarize_mapq_filter_drops_reads_on_ingestion() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output.clone());
    options.min_read_mapq = 10;
    summarize::run(&options).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "taxon\tmarker\tmarker_coverage",
            "taxon_1\tmarker_1\t0.500000",
            "taxon_2\tmarker_3\t0.600000",
        ]
    );
}

#[test]
fn summarize_identity_filter_drops_reads_on_ingestion() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output.clone());
    options.min_read_match_identity = 0.97;
    summarize::run(&options).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines, vec!["taxon\tmarker\tmarker_coverage", "taxon_1\tmarker_1\t0.500000"]);
}

#[test]
fn summarize_rejects_a_record_without_an_md_tag() {
    let dir = TempDir::new().unwrap();
    let sam = "@HD\tVN:1.6\n@SQ\tSN:taxon_1:marker_1\tLN:60\n\
               query_1\t0\ttaxon_1:marker_1\t1\t60\t30M\t*\t0\t0\tACGTACGTACGTACGTACGTACGTACGTAC\t*\n";
    let input = write_fixture(&dir, "bad.sam", sam);
    let output = dir.path().join("out.tsv");

    let result = summarize::run(&summarize_options(input, output));
    assert!(matches!(result, Err(Error::Parsing(_))));
}

#[test]
fn summarize_rejects_an_unknown_refdb_format() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output);
    options.refdb_format = Some("x".to_string());
    options.refdb_regex_taxon = None;
    options.refdb_regex_marker = None;

    let result = summarize::run(&options);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn summarize_requires_num_reads_for_cpm_views() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output);
    options.output_type = OutputType::TaxonCpm;

    let result = summarize::run(&options);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn summarize_rejects_mapq_combined_with_secondary_match_filters() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output);
    options.min_read_mapq = 10;
    options.min_taxon_fraction_primary_matches = Some(0.5);

    let result = summarize::run(&options);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn summarize_min_taxon_num_markers_filters_taxa() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "example.sam", &example_sam());
    let output = dir.path().join("out.tsv");

    let mut options = summarize_options(input, output.clone());
    options.min_taxon_num_markers = Some(2);
    summarize::run(&options).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "taxon\tmarker\tmarker_coverage",
            "taxon_2\tmarker_2\t0.300000",
            "taxon_2\tmarker_3\t0.600000",
        ]
    );
}

fn taxon_summary() -> String {
    let mut tsv = String::new();
    tsv.push_str("taxon\ttaxon_num_reads\ttaxon_num_alignments\ttaxon_num_markers\ttaxon_max_reads_in_marker\n");
    tsv.push_str("taxon_1\t9.00\t9\t3\t4.00\n");
    tsv.push_str("taxon_2\t1.00\t1\t1\t1.00\n");
    tsv.push_str("taxon_3\t1.00\t1\t1\t1.00\n");
    tsv
}

fn filter_options(input: PathBuf, output: PathBuf) -> FilterOptions {
    FilterOptions {
        input,
        output,
        require_min_markers: None,
        use_noise_model_for_min_markers: false,
        total_num_taxa: None,
        beta_sample_size: None,
    }
}

#[test]
fn filter_with_an_explicit_min_markers() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "taxa.tsv", &taxon_summary());
    let output = dir.path().join("filtered.tsv");

    let mut options = filter_options(input, output.clone());
    options.require_min_markers = Some(2);
    filter::run(&options).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("taxon_1\t"));
}

#[test]
fn filter_without_a_cutoff_passes_everything_through() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "taxa.tsv", &taxon_summary());
    let output = dir.path().join("filtered.tsv");

    filter::run(&filter_options(input, output.clone())).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written, taxon_summary());
}

#[test]
fn filter_with_the_noise_model_defaults_to_a_cutoff_of_two() {
    let dir = TempDir::new().unwrap();
    // five taxa with one marker each: the histogram never reaches two
    // markers, so the fitted cutoff is the floor of 2
    let mut tsv = String::from("taxon\ttaxon_num_markers\n");
    for i in 1..=5 {
        tsv.push_str(&format!("taxon_{i}\t1\n"));
    }
    let input = write_fixture(&dir, "taxa.tsv", &tsv);
    let output = dir.path().join("filtered.tsv");

    let mut options = filter_options(input, output.clone());
    options.use_noise_model_for_min_markers = true;
    options.total_num_taxa = Some(100);
    options.beta_sample_size = Some(10_000.0);
    filter::run(&options).unwrap();

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written, "taxon\ttaxon_num_markers\n");
}

#[test]
fn filter_noise_model_requires_total_num_taxa() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "taxa.tsv", &taxon_summary());
    let output = dir.path().join("filtered.tsv");

    let mut options = filter_options(input, output.clone());
    options.use_noise_model_for_min_markers = true;
    options.beta_sample_size = Some(10_000.0);

    assert!(matches!(filter::run(&options), Err(Error::Config(_))));
}

#[test]
fn filter_rejects_total_num_taxa_below_the_row_count() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "taxa.tsv", &taxon_summary());
    let output = dir.path().join("filtered.tsv");

    let mut options = filter_options(input, output.clone());
    options.total_num_taxa = Some(2);

    assert!(matches!(filter::run(&options), Err(Error::Config(_))));
}

#[test]
fn filter_requires_the_num_markers_column() {
    let dir = TempDir::new().unwrap();
    let input = write_fixture(&dir, "taxa.tsv", "taxon\tcoverage\ntaxon_1\t0.5\n");
    let output = dir.path().join("filtered.tsv");

    let mut options = filter_options(input, output.clone());
    options.require_min_markers = Some(2);

    assert!(matches!(filter::run(&options), Err(Error::Parsing(_))));
}
