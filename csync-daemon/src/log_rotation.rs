//! Size-based rotation for the journal and the daemon's own logs.
//!
//! A file that reaches the threshold is shifted down a numbered chain,
//! `journal.log` → `journal.log.1` → … → `journal.log.5`, and the oldest
//! copy falls off the end.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            max_files: MAX_ROTATED_FILES,
        }
    }
}

impl RotationPolicy {
    /// Rotate `log_path` when it has reached `max_bytes`.
    ///
    /// Returns `true` if rotation occurred. A missing file is not an error.
    /// The live path is recreated empty so writers that reopen by path keep
    /// working.
    pub fn rotate(&self, log_path: &Path) -> io::Result<bool> {
        let size = match fs::metadata(log_path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes || self.max_files == 0 {
            return Ok(false);
        }

        let oldest = numbered_path(log_path, self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_files).rev() {
            let src = numbered_path(log_path, n);
            if src.exists() {
                fs::rename(&src, numbered_path(log_path, n + 1))?;
            }
        }
        fs::rename(log_path, numbered_path(log_path, 1))?;

        fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(log_path)?;
        Ok(true)
    }

    /// Rotate every path; a failure on one file does not block the others.
    /// Returns how many files were rotated.
    pub fn rotate_all<'a>(&self, paths: impl IntoIterator<Item = &'a PathBuf>) -> usize {
        let mut rotated = 0;
        for path in paths {
            match self.rotate(path) {
                Ok(true) => {
                    rotated += 1;
                    tracing::info!(path = %path.display(), "log file rotated");
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "log rotation failed")
                }
            }
        }
        rotated
    }
}

/// `journal.log` + 2 → `journal.log.2`
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("csync.log");
    base.with_file_name(format!("{name}.{n}"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
