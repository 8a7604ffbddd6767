use std::path::PathBuf;

use csync_core::{BookmarkName, ConfigError, Operation, ProcessKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no running {key} process")]
    NoSuchProcess { key: ProcessKey },

    #[error("a {key} process is already running")]
    AlreadyExists { key: ProcessKey },

    #[error("cannot start {requested} for '{bookmark}' while {running} is running")]
    ConcurrentSyncConflict {
        bookmark: BookmarkName,
        requested: Operation,
        running: Operation,
    },

    #[error("{key} could not open its listener: {message}")]
    BindConflict { key: ProcessKey, message: String },

    /// Failure reported by the engine itself (log line or exit status).
    #[error("{key}: {message}")]
    Engine { key: ProcessKey, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Validation(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{} {args}` failed: {message}", program.display())]
    OneShot {
        program: PathBuf,
        args: String,
        message: String,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("supervisor channel closed: {0}")]
    ChannelClosed(&'static str),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
