//! Typed errors for the failures callers need to tell apart.
//!
//! Everything else in the crate travels as [`anyhow::Error`]; these types are
//! the ones a binary downcasts to decide between "record and continue" and
//! "abort with a non-zero status".
use std::path::PathBuf;
use thiserror::Error;

use crate::table::ConversionRow;

/// Per-file extraction failure. Never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// No `NatMEG_<digits>` or `sub-<digits>` token anywhere in the path.
    #[error("no participant identifier in '{0}'")]
    MalformedFilename(String),

    /// Every segment of the stem was a recognised token; nothing is left to name the task.
    #[error("no task label left in '{0}' after removing known tokens")]
    AmbiguousTask(String),
}

/// Operator mistakes in a configuration record. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("faulty '{key}' setting '{value}' (must be on or off)")]
    InvalidSwitch { key: String, value: String },

    #[error("no '{key}' file configured")]
    MissingReference { key: String },

    #[error("'{key}' file {} does not exist", path.display())]
    MissingReferenceFile { key: String, path: PathBuf },

    #[error("faulty '{key}' setting '{value}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("cannot read configuration {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Consistency violations found in a conversion table. Always fatal, and
/// raised before anything is written.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{} row(s) have an inconsistent task count; fix the conversion table before converting", rows.len())]
    InconsistentTaskCounts { rows: Vec<ConversionRow> },
}
