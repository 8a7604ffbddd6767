//! Bidirectional sync runs with automatic `--resync` recovery.
//!
//! A run starts as a normal bisync. When the engine reports that it needs
//! `--resync`, the run is force-killed, and once its exit has been handled a
//! single resync run replaces it under the same key. The caller awaits one
//! [`SyncSession::settle`] regardless of whether the recovery happened.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use csync_core::{Bookmark, BookmarkName, CommandBuilder, EngineCommand, ProcessKey, SyncDirection};

use crate::classifier::classify_line;
use crate::error::EngineError;
use crate::journal::JournalEntry;
use crate::registry::{KillSignal, OK_FIELD};
use crate::signals::{transferred_bytes, RESYNC_MARKER};
use crate::supervisor::{ExitReport, SpawnOptions, Supervisor};

/// Pause between the aborted run's exit and the resync spawn.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Final result of one sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub bookmark: BookmarkName,
    pub direction: SyncDirection,
    pub exit_code: Option<i32>,
    pub success: bool,
    /// `true` when the run was replaced by a `--resync` run.
    pub resynced: bool,
    pub bytes_transferred: u64,
}

#[derive(Clone)]
pub struct BisyncOrchestrator {
    supervisor: Supervisor,
    settle_delay: Duration,
    /// Set while the most recent resync attempt has failed.
    resync_failing: Arc<AtomicBool>,
}

impl BisyncOrchestrator {
    pub fn new(supervisor: Supervisor, settle_delay: Duration) -> Self {
        Self {
            supervisor,
            settle_delay,
            resync_failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a sync of `bookmark` in `direction`.
    ///
    /// Fails synchronously when the opposite direction is running, when the
    /// same direction is already running, or when the bookmark has no usable
    /// local directory.
    pub fn start(
        &self,
        direction: SyncDirection,
        bookmark: &Bookmark,
        commands: &CommandBuilder,
    ) -> Result<SyncSession, EngineError> {
        let local = sync_local_path(bookmark)?;
        let key = ProcessKey::new(bookmark.name.clone(), direction.operation());
        let opposite = ProcessKey::new(bookmark.name.clone(), direction.opposite().operation());

        let remote = bookmark.remote_spec();
        let command = commands.supervised(bisync_args(&local, &remote, false), Some(bookmark));
        let resync_command =
            commands.supervised(bisync_args(&local, &remote, true), Some(bookmark));

        let (tap_tx, tap_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        self.supervisor.create(
            key.clone(),
            &command,
            SpawnOptions::report(exit_tx)
                .with_tap(tap_tx)
                .excluding(opposite.clone()),
        )?;

        let ctx = self.supervisor.context();
        ctx.registry.set(&key, OK_FIELD, true);
        ctx.broadcaster.trigger();
        tracing::info!(key = %key, local = %local.display(), "sync started");

        Ok(SyncSession {
            orchestrator: self.clone(),
            key,
            opposite,
            direction,
            resync_command,
            tap_rx,
            exit_rx,
        })
    }
}

/// Handle to a running sync; await [`SyncSession::settle`] for the result.
pub struct SyncSession {
    orchestrator: BisyncOrchestrator,
    key: ProcessKey,
    opposite: ProcessKey,
    direction: SyncDirection,
    resync_command: EngineCommand,
    tap_rx: mpsc::UnboundedReceiver<String>,
    exit_rx: oneshot::Receiver<ExitReport>,
}

impl SyncSession {
    pub fn key(&self) -> &ProcessKey {
        &self.key
    }

    /// Wait for the sync, including any resync recovery, to finish.
    pub async fn settle(mut self) -> Result<SyncOutcome, EngineError> {
        let mut bytes = 0u64;
        let mut resync_requested = false;
        let report = self
            .watch(&mut bytes, &mut resync_requested)
            .await?;

        if !resync_requested {
            return Ok(self.finish_plain(report, bytes));
        }
        self.run_resync().await
    }

    async fn watch(
        &mut self,
        bytes: &mut u64,
        resync_requested: &mut bool,
    ) -> Result<ExitReport, EngineError> {
        let report = loop {
            tokio::select! {
                biased;
                line = self.tap_rx.recv() => match line {
                    Some(line) => self.observe(&line, bytes, resync_requested),
                    None => {
                        break (&mut self.exit_rx)
                            .await
                            .map_err(|_| EngineError::ChannelClosed("exit report"))?;
                    }
                },
                report = &mut self.exit_rx => {
                    break report.map_err(|_| EngineError::ChannelClosed("exit report"))?;
                }
            }
        };
        while let Ok(line) = self.tap_rx.try_recv() {
            self.observe(&line, bytes, resync_requested);
        }
        Ok(report)
    }

    fn observe(&self, line: &str, bytes: &mut u64, resync_requested: &mut bool) {
        if let Some(total) = stats_total(line) {
            *bytes = (*bytes).max(total);
        }
        if !*resync_requested && line.contains(RESYNC_MARKER) {
            *resync_requested = true;
            tracing::warn!(key = %self.key, "engine asks for --resync, aborting run");
            let registry = &self.orchestrator.supervisor.context().registry;
            if let Err(err) = registry.kill(&self.key, KillSignal::Kill) {
                tracing::debug!(error = %err, "run already gone");
            }
        }
    }

    fn finish_plain(&self, report: ExitReport, bytes: u64) -> SyncOutcome {
        let ctx = self.orchestrator.supervisor.context();
        let bookmark = &self.key.bookmark;
        if report.success() {
            ctx.reporter.clear_failed(bookmark);
        }
        if report.ok && bytes > 0 {
            ctx.notifier.notify(&match self.direction {
                SyncDirection::Upload => format!("Upload to {bookmark} completed"),
                SyncDirection::Download => format!("Download from {bookmark} completed"),
            });
        }
        tracing::info!(key = %self.key, code = ?report.code, bytes, "sync settled");
        SyncOutcome {
            bookmark: bookmark.clone(),
            direction: self.direction,
            exit_code: report.code,
            success: report.success(),
            resynced: false,
            bytes_transferred: bytes,
        }
    }

    async fn run_resync(self) -> Result<SyncOutcome, EngineError> {
        let orchestrator = &self.orchestrator;
        let ctx = orchestrator.supervisor.context();
        let bookmark = self.key.bookmark.clone();

        tokio::time::sleep(orchestrator.settle_delay).await;

        ctx.notifier
            .notify(&format!("First synchronization for {bookmark}: running initial resync"));
        let (exit_tx, exit_rx) = oneshot::channel();
        orchestrator.supervisor.create(
            self.key.clone(),
            &self.resync_command,
            SpawnOptions::report(exit_tx).excluding(self.opposite.clone()),
        )?;
        ctx.broadcaster.trigger();

        let report = exit_rx
            .await
            .map_err(|_| EngineError::ChannelClosed("resync exit report"))?;

        if report.success() {
            orchestrator.resync_failing.store(false, Ordering::SeqCst);
            ctx.reporter.clear_failed(&bookmark);
            ctx.notifier
                .notify(&format!("Initial resync for {bookmark} completed"));
        } else {
            let err = EngineError::Engine {
                key: self.key.clone(),
                message: format!("resync exited with {:?}", report.code),
            };
            tracing::warn!(error = %err, "resync failed");
            ctx.journal.record(JournalEntry::text(err.to_string()));
            if !orchestrator.resync_failing.swap(true, Ordering::SeqCst) {
                ctx.notifier
                    .notify(&format!("Initial resync for {bookmark} failed"));
            }
        }

        Ok(SyncOutcome {
            bookmark,
            direction: self.direction,
            exit_code: report.code,
            success: report.success(),
            resynced: true,
            bytes_transferred: 0,
        })
    }
}

/// Byte total from a stats line, decoding `--log-format json` escapes first.
fn stats_total(line: &str) -> Option<u64> {
    transferred_bytes(&classify_line(line).message)
}

fn sync_local_path(bookmark: &Bookmark) -> Result<PathBuf, EngineError> {
    let local = bookmark.local_path().ok_or_else(|| {
        EngineError::Validation(format!("bookmark '{}' has no local directory", bookmark.name))
    })?;
    if local.parent().is_none() {
        return Err(EngineError::Validation(format!(
            "refusing to sync '{}' with the filesystem root",
            bookmark.name
        )));
    }
    Ok(local)
}

fn bisync_args(local: &Path, remote: &str, resync: bool) -> Vec<String> {
    let mut args = vec!["bisync".to_string()];
    if resync {
        args.push("--resync".to_string());
    } else {
        args.push("--force".to_string());
        args.push("--recover".to_string());
    }
    args.extend([
        "--create-empty-src-dirs".to_string(),
        "--log-format".to_string(),
        "json".to_string(),
        local.display().to_string(),
        remote.to_string(),
        "-v".to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bisync_argument_layout() {
        let args = bisync_args(Path::new("/home/me/Nas"), "nas:/", false);
        assert_eq!(
            args,
            vec![
                "bisync", "--force", "--recover", "--create-empty-src-dirs", "--log-format",
                "json", "/home/me/Nas", "nas:/", "-v",
            ]
        );
        let args = bisync_args(Path::new("/home/me/Nas"), "nas:/", true);
        assert_eq!(args[1], "--resync");
        assert!(!args.contains(&"--force".to_string()));
    }

    #[test]
    fn json_stats_block_is_decoded_before_counting() {
        let line = r#"{"time":"2024-01-01T10:00:00.000000+00:00","level":"info","msg":"\nTransferred:   \t    2.000 KiB / 2.000 KiB, 100%, 1 KiB/s, ETA 0s\nChecks:                 4 / 4, 100%\n"}"#;
        assert_eq!(transferred_bytes(line), None);
        assert_eq!(stats_total(line), Some(2048));
        assert_eq!(
            stats_total("2024/01/01 10:00:00 INFO  : Transferred:   512 B / 512 B, 100%"),
            Some(512)
        );
    }

    #[test]
    fn root_local_path_is_rejected() {
        let bookmark = Bookmark::new("nas", "webdav")
            .with_option(csync_core::LOCAL_PATH_KEY, "/");
        assert!(matches!(
            sync_local_path(&bookmark),
            Err(EngineError::Validation(_))
        ));
        let bookmark = Bookmark::new("nas", "webdav");
        assert!(sync_local_path(&bookmark).is_err());
    }
}
