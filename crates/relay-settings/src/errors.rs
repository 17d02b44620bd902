//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a relay configuration could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Parser failure, with line and column.
        source: serde_json::Error,
    },
    /// The merged document has a field of the wrong type (e.g. a string
    /// where a port number belongs).
    #[error("settings have the wrong shape: {0}")]
    Shape(#[source] serde_json::Error),
    /// A field parsed but its value is unusable.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted camelCase path of the field, e.g. `tokens.ttlSecs`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Dotted path of the offending field, when the error is about one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
