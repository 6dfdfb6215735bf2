#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("an error occurred with the alignment store")]
    Store(#[from] rusqlite::Error),

    #[error("an error occurred parsing the file")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Parsing(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("record {0} lacks an MD tag")]
    MissingMdTag(String),

    #[error("invalid MD tag: {0}")]
    InvalidMdTag(String),

    #[error("record missing a query name")]
    MissingQueryName,

    #[error("read missing reference name: {0}")]
    MissingReferenceName(String),

    #[error("could not find taxon in reference name: {0}")]
    TaxonNotFound(String),

    #[error("could not find marker in reference name: {0}")]
    MarkerNotFound(String),

    #[error("invalid marker to taxon lookup line: {0}")]
    InvalidLookupLine(String),

    #[error("column {0} missing from the input header")]
    MissingColumn(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Invalid argument combinations. These surface before any work is done and
/// map to exit code 2 in the binaries.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unknown refdb format: {0}")]
    UnknownRefdbFormat(String),

    #[error("please provide either a refdb format, or taxon + marker regexes")]
    MissingRefdbPatterns,

    #[error("invalid refdb regex")]
    InvalidRegex(#[from] regex::Error),

    #[error("--num-reads required for calculating {0}")]
    NumReadsRequired(String),

    #[error("it is unwise to combine --min-read-mapq with filters that rely on secondary matches")]
    MapqWithSecondaryMatchFilters,

    #[error("--total-num-taxa required for fitting the noise model")]
    TotalNumTaxaRequired,

    #[error("--taxon-to-markers-beta-sample-size required for fitting the noise model")]
    BetaSampleSizeRequired,

    #[error("--total-num-taxa provided ({total}) is lower than the number of data rows ({rows})")]
    TotalNumTaxaTooLow { total: u64, rows: u64 },
}
