use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;

use crate::errors::{Error, ParseError};

// a taxon name may itself contain dashes, so the marker is recognized by its
// shape: a BUSCO style id after the last dash, or an SSCollapse suffix
const EUKPROT_REGEX_TAXON: &str = r"^[^-]+-(.*)-\d+at\d+.*$|^[^-]+-(.*)_SSCollapse.*$";
const EUKPROT_REGEX_MARKER: &str = r"^[^-]+-.*-(\d+at\d+.*)$|^[^-]+-.*_(SSCollapse.*)$";

const CHOCOPHLAN_REGEX_TAXON: &str = r"s__(.*?)\|";
const CHOCOPHLAN_REGEX_MARKER: &str = r"(UniRef90[^|]*)";

const NO_SPLIT_REGEX_TAXON: &str = "(^)";
const NO_SPLIT_REGEX_MARKER: &str = "(.*)";

/// Taxon and marker patterns for a named reference database format.
///
/// The generic format is the ordered alternation of eukprot, chocophlan, a
/// prefix-up-to-separator fallback, and a match-all; alternation order
/// decides which convention wins when several could match.
pub fn taxon_and_marker_patterns(refdb_format: &str) -> Option<(String, String)> {
    match refdb_format {
        "eukprot" => Some((EUKPROT_REGEX_TAXON.to_string(), EUKPROT_REGEX_MARKER.to_string())),
        "chocophlan" => Some((
            CHOCOPHLAN_REGEX_TAXON.to_string(),
            CHOCOPHLAN_REGEX_MARKER.to_string(),
        )),
        "no-split" => Some((NO_SPLIT_REGEX_TAXON.to_string(), NO_SPLIT_REGEX_MARKER.to_string())),
        "generic" => Some((
            [
                EUKPROT_REGEX_TAXON,
                CHOCOPHLAN_REGEX_TAXON,
                "(^[^:|]*)[:|]",
                NO_SPLIT_REGEX_TAXON,
            ]
            .join("|"),
            [EUKPROT_REGEX_MARKER, CHOCOPHLAN_REGEX_MARKER, "[:|]?([^:|]*)$"].join("|"),
        )),
        _ => None,
    }
}

/// The first populated capture group of a match. Alternation branches each
/// carry their own group, so only one is populated per match.
fn first_group<'t>(pattern: &Regex, text: &'t str) -> Option<&'t str> {
    let captures = pattern.captures(text)?;
    captures
        .iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str())
}

/// Attributes a reference name to a (taxon, marker) pair.
///
/// A taxon found in the lookup file is merged with a regex match as
/// `lookup|regex`. A reference name that the taxon pattern matches but the
/// marker pattern does not yields no marker; a name neither pattern matches
/// is used whole as the marker name.
pub fn taxon_and_marker(
    reference_name: &str,
    pattern_taxon: &Regex,
    pattern_marker: &Regex,
    marker_to_taxon: &HashMap<String, String>,
) -> (Option<String>, Option<String>) {
    let lookup_taxon = marker_to_taxon.get(reference_name);
    let taxon_match = first_group(pattern_taxon, reference_name);

    let taxon = match (lookup_taxon, taxon_match) {
        (Some(lookup), Some(found)) => Some(format!("{lookup}|{found}")),
        (None, Some(found)) => Some(found.to_string()),
        (Some(lookup), None) => Some(lookup.clone()),
        (None, None) => None,
    };

    let marker = match first_group(pattern_marker, reference_name) {
        Some(found) => Some(found.to_string()),
        // the patterns work, just not this one
        None if taxon_match.is_some() => None,
        None => Some(reference_name.to_string()),
    };

    (taxon, marker)
}

/// Reads a two column tab separated lookup of marker name to taxon name.
/// Also tallies how many markers each taxon has in the reference.
pub fn read_marker_to_taxon(
    path: &Path,
) -> Result<(HashMap<String, String>, HashMap<String, u64>), Error> {
    let mut marker_to_taxon = HashMap::new();
    let mut taxon_to_num_markers: HashMap<String, u64> = HashMap::new();

    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let mut columns = line.split('\t');
        let (marker, taxon) = match (columns.next(), columns.next(), columns.next()) {
            (Some(marker), Some(taxon), None) => (marker, taxon),
            _ => return Err(ParseError::InvalidLookupLine(line.to_string()).into()),
        };

        marker_to_taxon.insert(marker.to_string(), taxon.to_string());
        *taxon_to_num_markers.entry(taxon.to_string()).or_insert(0) += 1;
    }

    Ok((marker_to_taxon, taxon_to_num_markers))
}
