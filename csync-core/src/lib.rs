//! csync core library — domain types, settings, bookmark store, engine commands.
//!
//! - [`types`] — newtypes, process keys and the [`Bookmark`] model
//! - [`error`] — [`ConfigError`]
//! - [`settings`] — YAML application settings
//! - [`bookmarks`] — INI bookmark store (list / get / add / update / delete)
//! - [`command`] — engine argument vectors

pub mod bookmarks;
pub mod command;
pub mod error;
mod ini;
pub mod settings;
pub mod types;

use std::path::Path;

pub use command::{CommandBuilder, EngineCommand};
pub use error::ConfigError;
pub use settings::Settings;
pub use types::{
    Bookmark, BookmarkName, Operation, ProcessKey, ServeProtocol, SyncDirection,
    CUSTOM_ARGS_KEY, LOCAL_PATH_KEY, REMOTE_PATH_KEY,
};

/// Write flow: `.tmp` sibling → `chmod 0600` → `rename`.
/// The `.tmp` file lives in the target's directory so the rename never crosses filesystems.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp_path, bytes).map_err(|e| error::write_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path).map_err(|e| error::write_err(path, e))
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| error::write_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
