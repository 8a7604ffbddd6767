//! `csync status` — what the daemon is running, per bookmark.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use tabled::{settings::Style, Table, Tabled};

use csync_daemon::{paths::socket_path, request_status, DaemonError};

use super::home_dir;

/// Arguments for `csync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    pid: u32,
    uptime_secs: u64,
    processes: usize,
    #[serde(default)]
    engine: Option<EngineState>,
    #[serde(default)]
    bookmarks: Vec<BookmarkState>,
}

#[derive(Debug, Deserialize)]
struct EngineState {
    version: String,
}

#[derive(Debug, Deserialize)]
struct BookmarkState {
    name: String,
    kind: String,
    mountpoint: Option<String>,
    upload: bool,
    download: bool,
    automatic_upload: bool,
    failed: bool,
    #[serde(default)]
    serving: BTreeMap<String, String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "bookmark")]
    name: String,
    #[tabled(rename = "type")]
    kind: String,
    #[tabled(rename = "mount")]
    mount: String,
    #[tabled(rename = "sync")]
    sync: String,
    #[tabled(rename = "auto")]
    auto: String,
    #[tabled(rename = "serving")]
    serving: String,
    #[tabled(rename = "state")]
    state: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                if self.json {
                    let payload = serde_json::json!({
                        "running": false,
                        "socket": socket_path(&home).display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render status JSON")?
                    );
                } else {
                    println!("daemon is not running; start it with `csync daemon start --detach`");
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to render status JSON")?
            );
            return Ok(());
        }

        let payload: StatusPayload =
            serde_json::from_value(status).context("unexpected status payload from daemon")?;
        print_table(payload);
        Ok(())
    }
}

fn print_table(payload: StatusPayload) {
    let engine = match &payload.engine {
        Some(engine) => format!("rclone {}", engine.version),
        None => "rclone unavailable".red().to_string(),
    };
    println!(
        "csync v{} | {} | daemon pid {} | up {} | {} process(es)",
        env!("CARGO_PKG_VERSION"),
        engine,
        payload.pid,
        format_uptime(payload.uptime_secs),
        payload.processes,
    );

    if payload.bookmarks.is_empty() {
        println!("No bookmarks configured.");
        return;
    }

    let rows: Vec<StatusTableRow> = payload
        .bookmarks
        .into_iter()
        .map(|bookmark| StatusTableRow {
            sync: sync_label(&bookmark),
            auto: if bookmark.automatic_upload { "on" } else { "-" }.to_string(),
            mount: bookmark.mountpoint.unwrap_or_else(|| "-".to_string()),
            serving: serving_label(&bookmark.serving),
            state: if bookmark.failed {
                "FAILED".red().bold().to_string()
            } else {
                "ok".green().to_string()
            },
            name: bookmark.name,
            kind: bookmark.kind,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn sync_label(bookmark: &BookmarkState) -> String {
    match (bookmark.upload, bookmark.download) {
        (true, _) => "uploading".yellow().to_string(),
        (_, true) => "downloading".yellow().to_string(),
        _ => "-".to_string(),
    }
}

fn serving_label(serving: &BTreeMap<String, String>) -> String {
    if serving.is_empty() {
        return "-".to_string();
    }
    serving
        .iter()
        .map(|(protocol, uri)| {
            if uri.is_empty() {
                format!("{protocol} (starting)")
            } else {
                format!("{protocol} {uri}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_uptime(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d{:02}h", s / 86_400, (s % 86_400) / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_compact() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m");
        assert_eq!(format_uptime(3 * 3600 + 5 * 60), "3h05m");
        assert_eq!(format_uptime(2 * 86_400 + 3600), "2d01h");
    }

    #[test]
    fn servers_without_an_address_are_starting() {
        let mut serving = BTreeMap::new();
        assert_eq!(serving_label(&serving), "-");
        serving.insert("http".to_string(), "http://127.0.0.1:8080/".to_string());
        serving.insert("ftp".to_string(), String::new());
        assert_eq!(
            serving_label(&serving),
            "ftp (starting)\nhttp http://127.0.0.1:8080/"
        );
    }
}
