//! Error types for csync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from settings, bookmark store and command building.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted file could not be written back.
    #[error("failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (settings save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Settings file exists but is malformed.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Engine config line that is neither a section, a key/value nor a comment.
    #[error("malformed line {line} in {path}: {content}")]
    Ini {
        path: PathBuf,
        line: usize,
        content: String,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("bookmark '{0}' does not exist")]
    BookmarkNotFound(String),

    #[error("bookmark '{0}' already exists")]
    BookmarkExists(String),

    /// Malformed bookmark name, missing required option, bad argument.
    #[error("{0}")]
    Validation(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn write_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::WriteFailure {
        path: path.into(),
        source,
    }
}
