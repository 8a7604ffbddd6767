pub mod bookmark;
pub mod control;
pub mod daemon;
pub mod notifications;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

use csync_daemon::{DaemonError, DaemonRequest};

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Send one request to the daemon and return its payload.
pub fn send(request: DaemonRequest) -> Result<Value> {
    let home = home_dir()?;
    match csync_daemon::request(&home, &request) {
        Ok(data) => Ok(data),
        Err(err @ DaemonError::DaemonNotRunning { .. }) => {
            Err(err).context("no daemon to talk to; start one with `csync daemon start --detach`")
        }
        Err(err) => Err(err).with_context(|| format!("'{}' request failed", request.cmd)),
    }
}
