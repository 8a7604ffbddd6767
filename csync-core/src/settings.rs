//! Application settings persisted as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.csync/
//!   settings.yaml   (mode 0600, written atomically)
//! ```
//!
//! Every function has two forms, as in the bookmark store: `fn_at(home, …)`
//! takes an explicit home and is what tests use; `fn(…)` derives the home
//! from `dirs::home_dir()`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, write_err, ConfigError};
use crate::types::ServeProtocol;

/// `<home>/.csync`
pub fn csync_root(home: &Path) -> PathBuf {
    home.join(".csync")
}

/// `<home>/.csync/settings.yaml` — pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    csync_root(home).join("settings.yaml")
}

/// Default location of the engine's own config file.
pub fn default_engine_config_at(home: &Path) -> PathBuf {
    home.join(".config").join("rclone").join("rclone.conf")
}

/// User-tunable settings. Missing keys fall back to [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run the bundled engine binary instead of the one on `$PATH`.
    pub use_bundled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundled_binary: Option<PathBuf>,
    /// Engine config file; `None` means the engine's default location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_config: Option<PathBuf>,
    /// Extra arguments appended to every supervised command.
    pub custom_args: String,
    pub cache_files_secs: u64,
    pub cache_directories_secs: u64,
    pub serve_http: bool,
    pub serve_ftp: bool,
    pub serve_webdav: bool,
    pub serve_restic: bool,
    pub sync_enabled: bool,
    /// Period of the automatic download pull.
    pub sync_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_bundled: false,
            bundled_binary: None,
            engine_config: None,
            custom_args: String::new(),
            cache_files_secs: 3,
            cache_directories_secs: 10,
            serve_http: true,
            serve_ftp: true,
            serve_webdav: true,
            serve_restic: true,
            sync_enabled: true,
            sync_interval_secs: 60,
        }
    }
}

impl Settings {
    /// Protocols the user has enabled for serving.
    pub fn serve_protocols(&self) -> Vec<ServeProtocol> {
        ServeProtocol::all()
            .into_iter()
            .filter(|protocol| self.serve_enabled(*protocol))
            .collect()
    }

    pub fn serve_enabled(&self, protocol: ServeProtocol) -> bool {
        match protocol {
            ServeProtocol::Http => self.serve_http,
            ServeProtocol::Ftp => self.serve_ftp,
            ServeProtocol::Webdav => self.serve_webdav,
            ServeProtocol::Restic => self.serve_restic,
        }
    }

    /// Engine config path with the default location filled in.
    pub fn engine_config_at(&self, home: &Path) -> PathBuf {
        self.engine_config
            .clone()
            .unwrap_or_else(|| default_engine_config_at(home))
    }
}

/// Load settings; a missing file yields the defaults.
pub fn load_at(home: &Path) -> Result<Settings, ConfigError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, ConfigError> {
    load_at(&home()?)
}

/// Atomically save settings: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let root = csync_root(home);
    std::fs::create_dir_all(&root).map_err(|e| write_err(&root, e))?;
    let path = settings_path_at(home);
    let yaml = serde_yaml::to_string(settings)?;
    crate::atomic_write(&path, yaml.as_bytes())
}

/// `save_at` convenience wrapper.
pub fn save(settings: &Settings) -> Result<(), ConfigError> {
    save_at(&home()?, settings)
}

pub(crate) fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("home");
        let settings = load_at(home.path()).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.sync_interval_secs, 60);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let home = TempDir::new().expect("home");
        std::fs::create_dir_all(csync_root(home.path())).expect("mkdir");
        std::fs::write(
            settings_path_at(home.path()),
            "serve_ftp: false\nsync_interval_secs: 15\n",
        )
        .expect("write");

        let settings = load_at(home.path()).expect("load");
        assert!(!settings.serve_ftp);
        assert_eq!(settings.sync_interval_secs, 15);
        assert_eq!(settings.cache_files_secs, 3);
        assert_eq!(
            settings.serve_protocols(),
            vec![ServeProtocol::Http, ServeProtocol::Webdav, ServeProtocol::Restic]
        );
    }

    #[test]
    fn save_then_load() {
        let home = TempDir::new().expect("home");
        let settings = Settings {
            use_bundled: true,
            custom_args: "--fast-list".to_string(),
            ..Settings::default()
        };
        save_at(home.path(), &settings).expect("save");
        assert_eq!(load_at(home.path()).expect("load"), settings);
        assert!(!settings_path_at(home.path())
            .with_file_name("settings.yaml.tmp")
            .exists());
    }

    #[test]
    fn corrupt_file_reports_path() {
        let home = TempDir::new().expect("home");
        std::fs::create_dir_all(csync_root(home.path())).expect("mkdir");
        std::fs::write(settings_path_at(home.path()), "- not: [a mapping").expect("write");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("settings.yaml"));
    }
}
