use snafu::prelude::*;
use std::path::PathBuf;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("IO error: {}", source))]
    IoGeneral { source: std::io::Error },
    #[snafu(display("Error creating file {}: {}", path.display(), source))]
    IoCreate {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error writing to file {}: {}", path.display(), source))]
    IoWrite {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error reading file {}: {}", path.display(), source))]
    IoRead {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error reading directory {}: {}", path.display(), source))]
    IoReadDir {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to stat {}: {}", path.display(), source))]
    IoStat {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Error walking files: {}", source))]
    WalkFile { source: walkdir::Error },

    #[snafu(display("Failed to load configuration file {}: {}", path.display(), source))]
    ConfigLoad {
        source: ini::Error,
        path: PathBuf,
    },
    #[snafu(display("Missing required key '{key}' in section [{section}] of {}", path.display()))]
    ConfigMissingKey {
        path: PathBuf,
        section: String,
        key: String,
    },
    #[snafu(display("Key '{key}' in {} is not a valid integer: {value}", path.display()))]
    ConfigBadInt {
        path: PathBuf,
        key: String,
        value: String,
    },

    #[snafu(display("Illegal filename rejected: {}", path.display()))]
    IllegalFilename { path: PathBuf },

    #[snafu(display("Manifest {} has no MANIFEST header", path.display()))]
    ManifestMissingHeader { path: PathBuf },
    #[snafu(display("Manifest {} has an unparseable format integer: {value}", path.display()))]
    ManifestBadFormat { path: PathBuf, value: String },
    #[snafu(display("Manifest {} has a truncated header block", path.display()))]
    ManifestTruncatedHeader { path: PathBuf },
    #[snafu(display("Manifest {} has an unknown type/status/modifier code '{code}' on line {line}", path.display()))]
    ManifestBadCode {
        path: PathBuf,
        line: usize,
        code: String,
    },
    #[snafu(display("Manifest {} body row on line {line} is missing fields", path.display()))]
    ManifestBadRow { path: PathBuf, line: usize },

    #[snafu(display("Failed to build archive at {}: {}", path.display(), source))]
    ArchiveWrite {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("No compression codec could archive {}", path.display()))]
    ArchiveNoCodec { path: PathBuf },

    #[snafu(display("Delta round-trip produced mismatched content for {}", path.display()))]
    DeltaRoundTripMismatch { path: PathBuf },
    #[snafu(display("Failed to fetch missing delta original from {url}: {source}"))]
    DeltaFetch {
        source: reqwest::Error,
        url: String,
    },

    #[snafu(display("Pack for bundle '{bundle}' from {from} to {to} is missing content for {}", path.display()))]
    PackIncomplete {
        bundle: String,
        from: u32,
        to: u32,
        path: PathBuf,
    },

    #[snafu(display("Build invariant violated: {details}"))]
    InvariantViolation { details: String },

    #[snafu(display(
        "{} changed type from '{old_kind}' to '{new_kind}' between version {old_version} and {new_version}; \
         an update pair cannot span incompatible file types",
        path.display()
    ))]
    TypeChange {
        path: PathBuf,
        old_kind: char,
        new_kind: char,
        old_version: u32,
        new_version: u32,
    },
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::IoGeneral { source }
    }
}

impl From<walkdir::Error> for Error {
    fn from(source: walkdir::Error) -> Self {
        Error::WalkFile { source }
    }
}
