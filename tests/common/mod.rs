#![allow(dead_code)]

use std::collections::HashMap;

use marker_alignments::report::{self, OutputType};
use marker_alignments::store::{AlignmentStore, Value};

pub const NUM_READS: u64 = 1_000_000;

pub const AGGREGATE_VIEWS: [OutputType; 8] = [
    OutputType::MarkerCoverage,
    OutputType::MarkerReadCount,
    OutputType::MarkerCpm,
    OutputType::MarkerAll,
    OutputType::TaxonCoverage,
    OutputType::TaxonReadAndMarkerCount,
    OutputType::TaxonCpm,
    OutputType::TaxonAll,
];

pub fn store_with(alignments: &[(&str, &str, &str, f64, f64)]) -> AlignmentStore {
    let mut store = AlignmentStore::new(None).unwrap();
    for (taxon, marker, query, identity, coverage) in alignments {
        store
            .add_alignment(taxon, marker, query, *identity, *coverage)
            .unwrap();
    }
    store
}

pub fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(n) => *n as f64,
        Value::Real(x) => *x,
        other => panic!("not a number: {other:?}"),
    }
}

pub fn as_text(value: &Value) -> String {
    match value {
        Value::Text(text) => text.clone(),
        other => panic!("not text: {other:?}"),
    }
}

pub fn assert_approx(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

fn views_with_column(column: &str) -> Vec<OutputType> {
    let empty = store_with(&[]);
    AGGREGATE_VIEWS
        .into_iter()
        .filter(|view| {
            let output = report::get_output(&empty, *view, Some(NUM_READS)).unwrap();
            output.columns.iter().any(|c| c == column)
        })
        .collect()
}

fn column_index(columns: &[String], column: &str) -> usize {
    columns.iter().position(|c| c == column).unwrap()
}

/// Asserts a per (taxon, marker) column against every view that carries it.
pub fn assert_marker_column(
    alignments: &[(&str, &str, &str, f64, f64)],
    column: &str,
    expected: &[(&str, &str, f64)],
) {
    let views = views_with_column(column);
    assert!(!views.is_empty(), "no view carries column {column}");

    for view in views {
        let store = store_with(alignments);
        let output = report::get_output(&store, view, Some(NUM_READS)).unwrap();
        let taxon_index = column_index(&output.columns, "taxon");
        let marker_index = column_index(&output.columns, "marker");
        let value_index = column_index(&output.columns, column);

        let mut actual = HashMap::new();
        for row in &output.rows {
            actual.insert(
                (as_text(&row[taxon_index]), as_text(&row[marker_index])),
                as_f64(&row[value_index]),
            );
        }

        assert_eq!(actual.len(), expected.len(), "{column} in {}", view.name());
        for (taxon, marker, value) in expected {
            let found = actual
                .get(&(taxon.to_string(), marker.to_string()))
                .unwrap_or_else(|| panic!("no {taxon}/{marker} row for {column} in {}", view.name()));
            assert!(
                (found - value).abs() < 1e-9,
                "{column} for {taxon}/{marker} in {}: expected {value}, got {found}",
                view.name()
            );
        }
    }
}

/// Asserts a per taxon column against every view that carries it.
pub fn assert_taxon_column(
    alignments: &[(&str, &str, &str, f64, f64)],
    column: &str,
    expected: &[(&str, f64)],
) {
    let views = views_with_column(column);
    assert!(!views.is_empty(), "no view carries column {column}");

    for view in views {
        let store = store_with(alignments);
        let output = report::get_output(&store, view, Some(NUM_READS)).unwrap();
        let taxon_index = column_index(&output.columns, "taxon");
        let value_index = column_index(&output.columns, column);

        let mut actual = HashMap::new();
        for row in &output.rows {
            actual.insert(as_text(&row[taxon_index]), as_f64(&row[value_index]));
        }

        assert_eq!(actual.len(), expected.len(), "{column} in {}", view.name());
        for (taxon, value) in expected {
            let found = actual
                .get(*taxon)
                .unwrap_or_else(|| panic!("no {taxon} row for {column} in {}", view.name()));
            assert!(
                (found - value).abs() < 1e-9,
                "{column} for {taxon} in {}: expected {value}, got {found}",
                view.name()
            );
        }
    }
}

/// The alignment table as (taxon, marker, query, identity, coverage) rows.
pub fn store_content(store: &AlignmentStore) -> Vec<(String, String, String, f64, f64)> {
    let output = store.query_rows("select * from alignment", &[]).unwrap();
    output
        .rows
        .iter()
        .map(|row| {
            (
                as_text(&row[0]),
                as_text(&row[1]),
                as_text(&row[2]),
                as_f64(&row[3]),
                as_f64(&row[4]),
            )
        })
        .collect()
}

pub fn distinct_taxa(store: &AlignmentStore) -> Vec<String> {
    let output = store
        .query_rows("select distinct taxon from alignment order by taxon", &[])
        .unwrap();
    output.rows.iter().map(|row| as_text(&row[0])).collect()
}
