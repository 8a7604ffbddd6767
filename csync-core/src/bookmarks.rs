//! Bookmark store backed by the engine's INI config file.
//!
//! Bookmarks are sections of the engine config (`rclone.conf`). csync only
//! adds its own `_rclonetray_*` extension keys next to the engine options.
//!
//! # API pattern
//!
//! Every function takes the config file path explicitly (`fn_at(config, …)`),
//! so tests can point it at a `TempDir`. Writes are atomic (tmp + rename).

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{io_err, ConfigError};
use crate::ini::{IniDocument, IniSection};
use crate::types::{Bookmark, BookmarkName};

/// Options that must be non-empty for a given provider type.
fn required_options(kind: &str) -> &'static [&'static str] {
    match kind {
        "webdav" => &["url"],
        "s3" | "b2" | "swift" => &[crate::types::REMOTE_PATH_KEY],
        _ => &[],
    }
}

fn read_document(config: &Path) -> Result<IniDocument, ConfigError> {
    if !config.exists() {
        return Ok(IniDocument::default());
    }
    let contents = std::fs::read_to_string(config).map_err(|e| io_err(config, e))?;
    IniDocument::parse(config, &contents)
}

fn write_document(config: &Path, doc: &IniDocument) -> Result<(), ConfigError> {
    if let Some(parent) = config.parent() {
        std::fs::create_dir_all(parent).map_err(|e| crate::error::write_err(parent, e))?;
    }
    crate::atomic_write(config, doc.render().as_bytes())
}

fn to_bookmark(section: &IniSection) -> Bookmark {
    Bookmark {
        name: BookmarkName::from(section.name.as_str()),
        options: section.entries.iter().cloned().collect(),
    }
}

/// Check a bookmark's options against its provider's required fields.
pub fn validate(bookmark: &Bookmark) -> Result<(), ConfigError> {
    if bookmark.kind().is_empty() {
        return Err(ConfigError::Validation(format!(
            "bookmark '{}' has no provider type",
            bookmark.name
        )));
    }
    for key in required_options(bookmark.kind()) {
        if bookmark.option(key).is_none() {
            return Err(ConfigError::Validation(format!(
                "option '{key}' is required for {} bookmarks",
                bookmark.kind()
            )));
        }
    }
    Ok(())
}

/// All supported bookmarks, in file order. Unsupported provider types are hidden.
pub fn list_at(config: &Path) -> Result<Vec<Bookmark>, ConfigError> {
    Ok(read_document(config)?
        .sections
        .iter()
        .map(to_bookmark)
        .filter(Bookmark::is_supported)
        .collect())
}

/// Load one bookmark by name.
pub fn get_at(config: &Path, name: &BookmarkName) -> Result<Bookmark, ConfigError> {
    read_document(config)?
        .section(name.as_str())
        .map(to_bookmark)
        .filter(Bookmark::is_supported)
        .ok_or_else(|| ConfigError::BookmarkNotFound(name.to_string()))
}

/// Append a new bookmark section.
pub fn add_at(config: &Path, bookmark: &Bookmark) -> Result<(), ConfigError> {
    BookmarkName::parse(bookmark.name.as_str())?;
    validate(bookmark)?;

    let mut doc = read_document(config)?;
    if doc.section(bookmark.name.as_str()).is_some() {
        return Err(ConfigError::BookmarkExists(bookmark.name.to_string()));
    }

    let mut section = IniSection::new(bookmark.name.as_str());
    section.set("type", bookmark.kind());
    section.set("config_automatic", "no");
    for (key, value) in &bookmark.options {
        if key != "type" {
            section.set(key, value);
        }
    }
    doc.sections.push(section);
    write_document(config, &doc)?;
    tracing::info!(bookmark = %bookmark.name, "bookmark created");
    Ok(())
}

/// Merge `fields` into an existing bookmark and return the result.
pub fn update_at(
    config: &Path,
    name: &BookmarkName,
    fields: &BTreeMap<String, String>,
) -> Result<Bookmark, ConfigError> {
    let mut doc = read_document(config)?;
    let section = doc
        .section_mut(name.as_str())
        .ok_or_else(|| ConfigError::BookmarkNotFound(name.to_string()))?;
    for (key, value) in fields {
        section.set(key, value);
    }
    let updated = to_bookmark(section);
    validate(&updated)?;
    write_document(config, &doc)?;
    tracing::info!(bookmark = %name, "bookmark updated");
    Ok(updated)
}

/// Remove a bookmark section.
pub fn delete_at(config: &Path, name: &BookmarkName) -> Result<(), ConfigError> {
    let mut doc = read_document(config)?;
    if !doc.remove(name.as_str()) {
        return Err(ConfigError::BookmarkNotFound(name.to_string()));
    }
    write_document(config, &doc)?;
    tracing::info!(bookmark = %name, "bookmark deleted");
    Ok(())
}
