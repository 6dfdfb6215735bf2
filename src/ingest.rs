use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use indicatif::ProgressBar;
use noodles::bam;
use noodles::sam;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::{Tag, Value};
use noodles::sam::alignment::Record;
use noodles::sam::Header;
use regex::Regex;
use tracing::info;

use crate::errors::{Error, ParseError};
use crate::identity::{alignment_identity, marker_coverage_contribution};
use crate::refdb::taxon_and_marker;
use crate::store::AlignmentStore;
use crate::utils::new_spinner_totals;

/// Attributes reference names to (taxon, marker) pairs: the two compiled
/// patterns plus the optional marker to taxon lookup.
pub struct ReferenceNameParser {
    pub pattern_taxon: Regex,
    pub pattern_marker: Regex,
    pub marker_to_taxon: HashMap<String, String>,
}

/// Read level filters applied while streaming the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFilters {
    pub min_mapq: u8,
    pub min_query_length: u64,
    pub min_match_identity: f64,
}

/// Streams a SAM/BAM file into the store under one bulk write. Returns the
/// number of alignments kept. Fails fast on the first record without an MD
/// tag or with an unparseable reference name.
pub fn read_alignments(
    input: &Path,
    alignment_store: &mut AlignmentStore,
    parser: &ReferenceNameParser,
    filters: &ReadFilters,
) -> Result<u64, Error> {
    alignment_store.start_bulk_write()?;
    let spinner = new_spinner_totals("Alignments ingested");

    let total = if is_bam(input) {
        let mut reader = bam::io::Reader::new(File::open(input)?);
        let header = reader.read_header()?;
        ingest_records(reader.records(), &header, alignment_store, parser, filters, &spinner)?
    } else {
        let mut reader = sam::io::Reader::new(BufReader::new(File::open(input)?));
        let header = reader.read_header()?;
        ingest_records(reader.records(), &header, alignment_store, parser, filters, &spinner)?
    };

    spinner.finish();
    alignment_store.end_bulk_write()?;
    info!(alignments = total, "Alignments ingested");

    Ok(total)
}

fn is_bam(path: &Path) -> bool {
    path.extension()
        .map(|extension| extension.eq_ignore_ascii_case("bam"))
        .unwrap_or(false)
}

fn ingest_records<R, I>(
    records: I,
    header: &Header,
    alignment_store: &mut AlignmentStore,
    parser: &ReferenceNameParser,
    filters: &ReadFilters,
    spinner: &ProgressBar,
) -> Result<u64, Error>
where
    R: Record,
    I: Iterator<Item = io::Result<R>>,
{
    let mut total = 0;
    for result in records {
        let record = result?;
        if ingest_record(&record, header, alignment_store, parser, filters)? {
            total += 1;
            spinner.inc(1);
        }
    }
    Ok(total)
}

fn ingest_record<R: Record>(
    record: &R,
    header: &Header,
    alignment_store: &mut AlignmentStore,
    parser: &ReferenceNameParser,
    filters: &ReadFilters,
) -> Result<bool, Error> {
    let query_name = record
        .name()
        .map(|name| String::from_utf8_lossy(name.as_ref()).into_owned())
        .ok_or(ParseError::MissingQueryName)?;

    let query_length = inferred_query_length(record)?;
    let md = md_tag(record, &query_name)?;
    let identity = alignment_identity(&md, query_length)?;

    if mapping_quality(record)? < filters.min_mapq {
        return Ok(false);
    }
    if query_length < filters.min_query_length {
        return Ok(false);
    }
    if identity < filters.min_match_identity {
        return Ok(false);
    }

    let (reference_name, reference_length) = reference_sequence(record, header, &query_name)?;

    let (taxon, marker) = taxon_and_marker(
        &reference_name,
        &parser.pattern_taxon,
        &parser.pattern_marker,
        &parser.marker_to_taxon,
    );
    let taxon = match taxon {
        Some(taxon) if !taxon.is_empty() => taxon,
        _ => return Err(ParseError::TaxonNotFound(reference_name).into()),
    };
    let marker = match marker {
        Some(marker) if !marker.is_empty() => marker,
        _ => return Err(ParseError::MarkerNotFound(reference_name).into()),
    };

    let coverage = marker_coverage_contribution(query_length, reference_length);
    alignment_store.add_alignment(&taxon, &marker, &query_name, identity, coverage)?;

    Ok(true)
}

/// Query length inferred from the cigar, counting operations that consume
/// the read. Falls back to the stored sequence length when no cigar is
/// present.
fn inferred_query_length<R: Record>(record: &R) -> Result<u64, Error> {
    let cigar = record.cigar();
    let mut length = 0;
    for op in cigar.iter() {
        let op = op?;
        match op.kind() {
            Kind::Match | Kind::Insertion | Kind::SoftClip | Kind::SequenceMatch | Kind::SequenceMismatch => {
                length += op.len() as u64;
            }
            _ => {}
        }
    }

    if length == 0 {
        length = record.sequence().len() as u64;
    }
    Ok(length)
}

fn md_tag<R: Record>(record: &R, query_name: &str) -> Result<String, Error> {
    let data = record.data();
    let result = match data.get(&Tag::MISMATCHED_POSITIONS) {
        Some(value) => match value? {
            Value::String(md) => Ok(String::from_utf8_lossy(md.as_ref()).into_owned()),
            _ => Err(ParseError::MissingMdTag(query_name.to_string()).into()),
        },
        None => Err(ParseError::MissingMdTag(query_name.to_string()).into()),
    };
    result
}

fn mapping_quality<R: Record>(record: &R) -> Result<u8, Error> {
    match record.mapping_quality() {
        Some(mapping_quality) => Ok(u8::from(mapping_quality?)),
        // missing mapping quality is 255 per the SAM spec
        None => Ok(255),
    }
}

fn reference_sequence<R: Record>(
    record: &R,
    header: &Header,
    query_name: &str,
) -> Result<(String, u64), Error> {
    let reference_sequence_id = match record.reference_sequence_id(header) {
        Some(id) => id?,
        None => return Err(ParseError::MissingReferenceName(query_name.to_string()).into()),
    };

    let (name, reference_sequence) = header
        .reference_sequences()
        .get_index(reference_sequence_id)
        .ok_or_else(|| ParseError::MissingReferenceName(query_name.to_string()))?;

    Ok((
        String::from_utf8_lossy(name.as_ref()).into_owned(),
        usize::from(reference_sequence.length()) as u64,
    ))
}
