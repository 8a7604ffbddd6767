//! `csync notifications` — the daemon's most recent user-facing messages.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use csync_daemon::DaemonRequest;

use super::send;

#[derive(Args, Debug)]
pub struct NotificationsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Only show the last N notifications.
    #[arg(long, short = 'n')]
    pub last: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Notification {
    at: DateTime<Utc>,
    message: String,
}

impl NotificationsArgs {
    pub fn run(self) -> Result<()> {
        let data = send(DaemonRequest::new("notifications"))?;
        let mut notifications: Vec<Notification> =
            serde_json::from_value(data).context("unexpected notifications payload")?;
        if let Some(last) = self.last {
            let skip = notifications.len().saturating_sub(last);
            notifications.drain(..skip);
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&notifications)
                    .context("failed to render notifications JSON")?
            );
            return Ok(());
        }
        if notifications.is_empty() {
            println!("No notifications yet.");
            return Ok(());
        }
        for notification in notifications {
            let at = notification.at.with_timezone(&Local);
            println!(
                "{}  {}",
                at.format("%Y-%m-%d %H:%M:%S").to_string().bright_black(),
                notification.message
            );
        }
        Ok(())
    }
}
