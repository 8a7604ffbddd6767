use std::path::{Path, PathBuf};
use std::time::Duration;

pub use csync_core::settings::csync_root;

/// Coalescing window for bursts of config file events.
pub const CONFIG_DEBOUNCE: Duration = Duration::from_millis(500);

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const JOURNAL_LOG: &str = "journal.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    csync_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    csync_root(home).join("logs")
}

pub fn journal_path(home: &Path) -> PathBuf {
    logs_dir(home).join(JOURNAL_LOG)
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}

/// Every file the rotation task keeps bounded.
pub fn rotated_logs(home: &Path) -> [PathBuf; 3] {
    [
        journal_path(home),
        stdout_log_path(home),
        stderr_log_path(home),
    ]
}
