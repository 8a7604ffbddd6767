//! Domain types shared by every csync crate.
//!
//! All path fields use `PathBuf`; bookmark options stay as raw strings because
//! they belong to the engine's own configuration file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Extension keys stored next to the engine's own options
// ---------------------------------------------------------------------------

/// Local directory mapped to the remote root (required for sync).
pub const LOCAL_PATH_KEY: &str = "_rclonetray_local_path_map";
/// Bucket or sub-path appended to the remote spec.
pub const REMOTE_PATH_KEY: &str = "_rclonetray_remote_path";
/// Extra engine arguments for this bookmark only.
pub const CUSTOM_ARGS_KEY: &str = "_rclonetray_custom_args";

/// Provider types the engine supports but csync refuses to manage.
pub const UNSUPPORTED_PROVIDERS: &[&str] = &["union", "crypt"];

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed bookmark name (section name in the engine config).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookmarkName(pub String);

impl BookmarkName {
    /// Parse a user-supplied name: 1 to 32 of `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let valid = !raw.is_empty()
            && raw.len() <= 32
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(ConfigError::Validation(format!(
                "invalid bookmark name '{raw}': use 1 to 32 letters, digits, '-' or '_'"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookmarkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BookmarkName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BookmarkName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Protocols the engine can serve a remote over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeProtocol {
    Http,
    Ftp,
    Webdav,
    Restic,
}

impl ServeProtocol {
    pub fn all() -> [ServeProtocol; 4] {
        [Self::Http, Self::Ftp, Self::Webdav, Self::Restic]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Ftp => "ftp",
            Self::Webdav => "webdav",
            Self::Restic => "restic",
        }
    }

    /// Human-facing name used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Ftp => "FTP",
            Self::Webdav => "WebDAV",
            Self::Restic => "Restic",
        }
    }
}

impl fmt::Display for ServeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServeProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "ftp" => Ok(Self::Ftp),
            "webdav" => Ok(Self::Webdav),
            "restic" => Ok(Self::Restic),
            other => Err(ConfigError::Validation(format!(
                "unknown serve protocol '{other}'; expected: http, ftp, webdav, restic"
            ))),
        }
    }
}

/// Direction of a bisync run, named from the local side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Upload,
    Download,
}

impl SyncDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Upload => Self::Download,
            Self::Download => Self::Upload,
        }
    }

    pub fn operation(self) -> Operation {
        match self {
            Self::Upload => Operation::Upload,
            Self::Download => Operation::Download,
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.operation().fmt(f)
    }
}

/// The kind of engine process supervised for a bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Mount,
    Upload,
    Download,
    Serve(ServeProtocol),
}

impl Operation {
    pub fn name(&self) -> String {
        match self {
            Self::Mount => "mount".to_string(),
            Self::Upload => "upload".to_string(),
            Self::Download => "download".to_string(),
            Self::Serve(protocol) => format!("serve_{protocol}"),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Operation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mount" => Ok(Self::Mount),
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            other => match other.strip_prefix("serve_") {
                Some(protocol) => Ok(Self::Serve(protocol.parse()?)),
                None => Err(ConfigError::Validation(format!(
                    "unknown operation '{other}'"
                ))),
            },
        }
    }
}

/// Identity of one supervised process: `<bookmark>:<operation>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub bookmark: BookmarkName,
    pub operation: Operation,
}

impl ProcessKey {
    pub fn new(bookmark: BookmarkName, operation: Operation) -> Self {
        Self { bookmark, operation }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bookmark, self.operation)
    }
}

// ---------------------------------------------------------------------------
// Bookmark
// ---------------------------------------------------------------------------

/// One remote definition from the engine configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub name: BookmarkName,
    /// Every key/value pair of the section, `type` included.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Bookmark {
    pub fn new(name: impl Into<BookmarkName>, kind: &str) -> Self {
        let mut options = BTreeMap::new();
        options.insert("type".to_string(), kind.to_string());
        Self {
            name: name.into(),
            options,
        }
    }

    /// Provider type (`webdav`, `local`, ...).
    pub fn kind(&self) -> &str {
        self.options.get("type").map(String::as_str).unwrap_or("")
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        self.option(LOCAL_PATH_KEY).map(PathBuf::from)
    }

    pub fn custom_args(&self) -> Option<&str> {
        self.option(CUSTOM_ARGS_KEY)
    }

    /// `<name>:<remote path or />` as understood by the engine.
    pub fn remote_spec(&self) -> String {
        format!("{}:{}", self.name, self.option(REMOTE_PATH_KEY).unwrap_or("/"))
    }

    pub fn is_supported(&self) -> bool {
        !UNSUPPORTED_PROVIDERS.contains(&self.kind())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_key_display() {
        let key = ProcessKey::new(
            BookmarkName::from("work"),
            Operation::Serve(ServeProtocol::Webdav),
        );
        assert_eq!(key.to_string(), "work:serve_webdav");
    }

    #[test]
    fn operation_parse_roundtrips_names() {
        for op in [
            Operation::Mount,
            Operation::Upload,
            Operation::Download,
            Operation::Serve(ServeProtocol::Ftp),
        ] {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
        }
        assert!("serve_gopher".parse::<Operation>().is_err());
    }

    #[test]
    fn bookmark_name_validation() {
        assert!(BookmarkName::parse("nas-01_backup").is_ok());
        assert!(BookmarkName::parse("").is_err());
        assert!(BookmarkName::parse("has space").is_err());
        assert!(BookmarkName::parse(&"x".repeat(33)).is_err());
    }

    #[test]
    fn remote_spec_defaults_to_root() {
        let bookmark = Bookmark::new("nas", "webdav");
        assert_eq!(bookmark.remote_spec(), "nas:/");
        let bookmark = bookmark.with_option(REMOTE_PATH_KEY, "bucket/dir");
        assert_eq!(bookmark.remote_spec(), "nas:bucket/dir");
    }

    #[test]
    fn blank_local_path_is_absent() {
        let bookmark = Bookmark::new("nas", "webdav").with_option(LOCAL_PATH_KEY, "   ");
        assert!(bookmark.local_path().is_none());
    }

    #[test]
    fn sync_direction_opposites() {
        assert_eq!(SyncDirection::Upload.opposite(), SyncDirection::Download);
        assert_eq!(SyncDirection::Download.operation(), Operation::Download);
    }
}
