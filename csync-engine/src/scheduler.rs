//! Automatic sync: upload after local changes settle, download on an interval.
//!
//! Each enabled bookmark owns a recursive watcher on its local directory and
//! one task holding both timers. Disabling removes the entry under the same
//! lock every callback checks before it runs, so nothing fires afterwards.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use csync_core::{BookmarkName, SyncDirection};

use crate::bisync::SyncOutcome;
use crate::error::EngineError;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// Starts sync runs on behalf of the scheduler.
#[async_trait]
pub trait SyncTrigger: Send + Sync + 'static {
    async fn sync(
        &self,
        bookmark: &BookmarkName,
        direction: SyncDirection,
    ) -> Result<SyncOutcome, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSyncConfig {
    pub debounce: Duration,
    pub interval: Duration,
}

struct Entry {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

type Entries = Arc<Mutex<HashMap<BookmarkName, Entry>>>;

pub struct AutoSyncScheduler<T: SyncTrigger> {
    trigger: Arc<T>,
    entries: Entries,
}

impl<T: SyncTrigger> Clone for AutoSyncScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            trigger: self.trigger.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<T: SyncTrigger> AutoSyncScheduler<T> {
    pub fn new(trigger: Arc<T>) -> Self {
        Self {
            trigger,
            entries: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BookmarkName, Entry>> {
        lock_entries(&self.entries)
    }

    pub fn is_enabled(&self, bookmark: &BookmarkName) -> bool {
        self.lock().contains_key(bookmark)
    }

    pub fn enabled(&self) -> Vec<BookmarkName> {
        let mut names: Vec<BookmarkName> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Watch `local` and start both timers for `bookmark`. Enabling an
    /// already enabled bookmark is a no-op.
    pub fn enable(
        &self,
        bookmark: &BookmarkName,
        local: &Path,
        config: AutoSyncConfig,
    ) -> Result<(), EngineError> {
        let mut entries = self.lock();
        if entries.contains_key(bookmark) {
            return Ok(());
        }
        if !local.is_dir() {
            return Err(EngineError::Validation(format!(
                "local directory {} does not exist",
                local.display()
            )));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) if is_change(&event.kind) => {
                let _ = event_tx.send(());
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "auto-sync watcher error"),
        })?;
        watcher.watch(local, RecursiveMode::Recursive)?;

        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_entry(
            self.trigger.clone(),
            self.entries.clone(),
            bookmark.clone(),
            active.clone(),
            event_rx,
            config,
        ));
        entries.insert(
            bookmark.clone(),
            Entry {
                _watcher: watcher,
                task,
                active,
            },
        );
        tracing::info!(
            bookmark = %bookmark,
            local = %local.display(),
            interval_secs = config.interval.as_secs(),
            "automatic sync enabled"
        );
        Ok(())
    }

    /// Stop watching and cancel both timers. Returns `false` when the
    /// bookmark was not enabled.
    pub fn disable(&self, bookmark: &BookmarkName) -> bool {
        let entry = {
            let mut entries = self.lock();
            let Some(entry) = entries.remove(bookmark) else {
                return false;
            };
            entry.active.store(false, Ordering::SeqCst);
            entry
        };
        entry.task.abort();
        tracing::info!(bookmark = %bookmark, "automatic sync disabled");
        true
    }

    /// Flip the state of `bookmark`; returns `true` when it is now enabled.
    pub fn toggle(
        &self,
        bookmark: &BookmarkName,
        local: &Path,
        config: AutoSyncConfig,
    ) -> Result<bool, EngineError> {
        if self.disable(bookmark) {
            return Ok(false);
        }
        self.enable(bookmark, local, config)?;
        Ok(true)
    }

    pub fn disable_all(&self) {
        let drained: Vec<(BookmarkName, Entry)> = {
            let mut entries = self.lock();
            for entry in entries.values() {
                entry.active.store(false, Ordering::SeqCst);
            }
            entries.drain().collect()
        };
        for (bookmark, entry) in drained {
            entry.task.abort();
            tracing::debug!(bookmark = %bookmark, "automatic sync disabled");
        }
    }
}

fn lock_entries(entries: &Entries) -> MutexGuard<'_, HashMap<BookmarkName, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

async fn run_entry<T: SyncTrigger>(
    trigger: Arc<T>,
    entries: Entries,
    bookmark: BookmarkName,
    active: Arc<AtomicBool>,
    mut events: mpsc::UnboundedReceiver<()>,
    config: AutoSyncConfig,
) {
    let syncing = Arc::new(AtomicBool::new(false));
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut upload_at: Option<Instant> = None;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(()) => upload_at = Some(Instant::now() + config.debounce),
                None => break,
            },
            _ = sleep_until_some(upload_at), if upload_at.is_some() => {
                upload_at = None;
                let trigger = trigger.clone();
                let bookmark = bookmark.clone();
                spawn_if_active(&entries, &active, async move {
                    log_result(&bookmark, trigger.sync(&bookmark, SyncDirection::Upload).await);
                });
            }
            _ = ticker.tick() => {
                if syncing.swap(true, Ordering::SeqCst) {
                    tracing::debug!(bookmark = %bookmark, "interval download skipped, previous still running");
                    continue;
                }
                let trigger = trigger.clone();
                let bookmark = bookmark.clone();
                let flag = syncing.clone();
                let spawned = spawn_if_active(&entries, &active, async move {
                    log_result(&bookmark, trigger.sync(&bookmark, SyncDirection::Download).await);
                    flag.store(false, Ordering::SeqCst);
                });
                if !spawned {
                    syncing.store(false, Ordering::SeqCst);
                }
            }
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Spawn `job` only while the entry is still enabled. The check runs under
/// the entries lock, which `disable` also takes.
fn spawn_if_active<F>(entries: &Entries, active: &AtomicBool, job: F) -> bool
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let _guard = lock_entries(entries);
    if !active.load(Ordering::SeqCst) {
        return false;
    }
    tokio::spawn(job);
    true
}

fn log_result(bookmark: &BookmarkName, result: Result<SyncOutcome, EngineError>) {
    match result {
        Ok(outcome) => tracing::info!(
            bookmark = %bookmark,
            direction = %outcome.direction,
            success = outcome.success,
            bytes = outcome.bytes_transferred,
            "automatic sync finished"
        ),
        Err(err) => tracing::warn!(bookmark = %bookmark, error = %err, "automatic sync not started"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTrigger {
        uploads: AtomicUsize,
        downloads: AtomicUsize,
        download_time: Duration,
    }

    #[async_trait]
    impl SyncTrigger for CountingTrigger {
        async fn sync(
            &self,
            bookmark: &BookmarkName,
            direction: SyncDirection,
        ) -> Result<SyncOutcome, EngineError> {
            match direction {
                SyncDirection::Upload => self.uploads.fetch_add(1, Ordering::SeqCst),
                SyncDirection::Download => {
                    let n = self.downloads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(self.download_time).await;
                    n
                }
            };
            Ok(SyncOutcome {
                bookmark: bookmark.clone(),
                direction,
                exit_code: Some(0),
                success: true,
                resynced: false,
                bytes_transferred: 0,
            })
        }
    }

    fn nas() -> BookmarkName {
        BookmarkName::from("nas")
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn interval_skips_while_previous_download_runs() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let trigger = Arc::new(CountingTrigger {
            download_time: Duration::from_secs(10),
            ..CountingTrigger::default()
        });
        let scheduler = AutoSyncScheduler::new(trigger.clone());
        let config = AutoSyncConfig {
            debounce: DEFAULT_DEBOUNCE,
            interval: Duration::from_secs(1),
        };
        scheduler.enable(&nas(), dir.path(), config).expect("enable");

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(trigger.downloads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(trigger.downloads.load(Ordering::SeqCst), 2);
        assert!(scheduler.disable(&nas()));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn disabled_bookmark_never_fires() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let trigger = Arc::new(CountingTrigger::default());
        let scheduler = AutoSyncScheduler::new(trigger.clone());
        let config = AutoSyncConfig {
            debounce: Duration::from_millis(50),
            interval: Duration::from_secs(1),
        };

        assert!(scheduler.toggle(&nas(), dir.path(), config).expect("enable"));
        assert!(scheduler.is_enabled(&nas()));
        assert!(!scheduler.toggle(&nas(), dir.path(), config).expect("disable"));
        assert!(!scheduler.is_enabled(&nas()));
        assert!(!scheduler.disable(&nas()), "second disable is a no-op");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(trigger.downloads.load(Ordering::SeqCst), 0);
        assert_eq!(trigger.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_change_triggers_one_debounced_upload() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let trigger = Arc::new(CountingTrigger::default());
        let scheduler = AutoSyncScheduler::new(trigger.clone());
        let config = AutoSyncConfig {
            debounce: Duration::from_millis(300),
            interval: Duration::from_secs(3600),
        };
        scheduler.enable(&nas(), dir.path(), config).expect("enable");
        tokio::time::sleep(Duration::from_millis(100)).await;

        for i in 0..3 {
            std::fs::write(dir.path().join(format!("file{i}.txt")), b"x").expect("write");
        }

        for _ in 0..100 {
            if trigger.uploads.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(trigger.uploads.load(Ordering::SeqCst), 1);

        scheduler.disable_all();
        std::fs::write(dir.path().join("late.txt"), b"x").expect("write");
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(trigger.uploads.load(Ordering::SeqCst), 1, "no upload after disable");
    }

    #[test]
    fn enable_requires_existing_directory() {
        let scheduler = AutoSyncScheduler::new(Arc::new(CountingTrigger::default()));
        let config = AutoSyncConfig {
            debounce: DEFAULT_DEBOUNCE,
            interval: Duration::from_secs(60),
        };
        let err = scheduler
            .enable(&nas(), Path::new("/definitely/not/here"), config)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(!scheduler.is_enabled(&nas()));
    }
}
