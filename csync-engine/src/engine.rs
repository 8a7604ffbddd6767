//! The engine facade: every operation a front end can ask for.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use csync_core::{
    bookmarks, Bookmark, BookmarkName, CommandBuilder, Operation, ProcessKey, ServeProtocol,
    Settings, SyncDirection,
};

use crate::bisync::{BisyncOrchestrator, SyncOutcome, SyncSession, DEFAULT_SETTLE_DELAY};
use crate::broadcaster::{UpdateBroadcaster, DEFAULT_COOLDOWN, DEFAULT_WINDOW};
use crate::error::{io_err, EngineError};
use crate::journal::{Journal, JournalEntry};
use crate::notify::Notifier;
use crate::probe::{self, EngineInfo};
use crate::registry::{KillSignal, ProcessRegistry, MOUNTPOINT_FIELD, PROTOCOL_FIELD, URI_FIELD};
use crate::scheduler::{AutoSyncConfig, AutoSyncScheduler, SyncTrigger, DEFAULT_DEBOUNCE};
use crate::supervisor::{EngineContext, SpawnOptions, Supervisor};

/// Delays used by the engine's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub broadcast_window: Duration,
    pub broadcast_cooldown: Duration,
    pub resync_settle: Duration,
    pub autosync_debounce: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            broadcast_window: DEFAULT_WINDOW,
            broadcast_cooldown: DEFAULT_COOLDOWN,
            resync_settle: DEFAULT_SETTLE_DELAY,
            autosync_debounce: DEFAULT_DEBOUNCE,
        }
    }
}

pub struct EngineOptions {
    pub home: PathBuf,
    pub settings: Settings,
    pub notifier: Arc<dyn Notifier>,
    pub journal: Arc<dyn Journal>,
    /// Directory mountpoints are created in. Defaults to the home directory
    /// (`/Volumes` on macOS).
    pub mount_root: Option<PathBuf>,
    pub timing: Timing,
}

impl EngineOptions {
    pub fn new(
        home: impl Into<PathBuf>,
        settings: Settings,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            home: home.into(),
            settings,
            notifier,
            journal,
            mount_root: None,
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = Some(root.into());
        self
    }
}

/// Per-bookmark view of everything that is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkStatus {
    pub name: BookmarkName,
    pub kind: String,
    pub mountpoint: Option<PathBuf>,
    pub upload: bool,
    pub download: bool,
    pub automatic_upload: bool,
    pub failed: bool,
    /// Protocol name → announced address (empty until the server reports it).
    pub serving: BTreeMap<String, String>,
}

struct EngineState {
    settings: Settings,
    commands: CommandBuilder,
    config_path: PathBuf,
    home: PathBuf,
    bookmarks: BTreeMap<BookmarkName, Bookmark>,
    engine_info: Option<EngineInfo>,
}

impl EngineState {
    fn bookmark(&self, name: &BookmarkName) -> Result<Bookmark, EngineError> {
        self.bookmarks
            .get(name)
            .cloned()
            .ok_or_else(|| csync_core::ConfigError::BookmarkNotFound(name.to_string()).into())
    }
}

type SharedState = Arc<RwLock<EngineState>>;

fn read(state: &SharedState) -> RwLockReadGuard<'_, EngineState> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(state: &SharedState) -> RwLockWriteGuard<'_, EngineState> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

/// Starts sync sessions from the current bookmark cache.
pub struct SyncLauncher {
    state: SharedState,
    bisync: BisyncOrchestrator,
}

impl SyncLauncher {
    fn start(
        &self,
        name: &BookmarkName,
        direction: SyncDirection,
    ) -> Result<SyncSession, EngineError> {
        let (bookmark, commands) = {
            let state = read(&self.state);
            (state.bookmark(name)?, state.commands.clone())
        };
        self.bisync.start(direction, &bookmark, &commands)
    }
}

#[async_trait]
impl SyncTrigger for SyncLauncher {
    async fn sync(
        &self,
        bookmark: &BookmarkName,
        direction: SyncDirection,
    ) -> Result<SyncOutcome, EngineError> {
        self.start(bookmark, direction)?.settle().await
    }
}

struct Inner {
    ctx: EngineContext,
    supervisor: Supervisor,
    launcher: Arc<SyncLauncher>,
    scheduler: AutoSyncScheduler<SyncLauncher>,
    state: SharedState,
    mount_root: PathBuf,
    autosync_debounce: Duration,
}

/// Cheap to clone; all clones drive the same processes.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Build the engine and load the bookmark cache. Requires a tokio runtime.
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        let EngineOptions {
            home,
            settings,
            notifier,
            journal,
            mount_root,
            timing,
        } = options;

        let broadcaster =
            UpdateBroadcaster::with_timing(timing.broadcast_window, timing.broadcast_cooldown);
        let ctx = EngineContext::new(broadcaster, notifier, journal);
        let supervisor = Supervisor::new(ctx.clone());

        let config_path = settings.engine_config_at(&home);
        let commands = CommandBuilder::new(&settings, Some(&config_path));
        let bookmarks = load_bookmarks(&config_path)?;
        let state = Arc::new(RwLock::new(EngineState {
            settings,
            commands,
            config_path,
            home: home.clone(),
            bookmarks,
            engine_info: None,
        }));

        let launcher = Arc::new(SyncLauncher {
            state: state.clone(),
            bisync: BisyncOrchestrator::new(supervisor.clone(), timing.resync_settle),
        });
        let scheduler = AutoSyncScheduler::new(launcher.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                supervisor,
                launcher,
                scheduler,
                state,
                mount_root: mount_root.unwrap_or_else(|| default_mount_root(&home)),
                autosync_debounce: timing.autosync_debounce,
            }),
        })
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.inner.ctx.registry
    }

    pub fn context(&self) -> &EngineContext {
        &self.inner.ctx
    }

    /// Register a listener for coalesced state-change notifications.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.ctx.broadcaster.on_update(callback);
    }

    // -----------------------------------------------------------------------
    // Bookmarks and settings
    // -----------------------------------------------------------------------

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        read(&self.inner.state).bookmarks.values().cloned().collect()
    }

    pub fn bookmark(&self, name: &BookmarkName) -> Result<Bookmark, EngineError> {
        read(&self.inner.state).bookmark(name)
    }

    pub fn settings(&self) -> Settings {
        read(&self.inner.state).settings.clone()
    }

    pub fn config_path(&self) -> PathBuf {
        read(&self.inner.state).config_path.clone()
    }

    /// Result of the last successful [`Engine::probe`] since the settings
    /// last changed.
    pub fn engine_info(&self) -> Option<EngineInfo> {
        read(&self.inner.state).engine_info.clone()
    }

    /// Check that the configured engine binary runs and remember what it
    /// reports. A failure is announced once per call and returned.
    pub async fn probe(&self) -> Result<EngineInfo, EngineError> {
        let (commands, config_path) = {
            let state = read(&self.inner.state);
            (state.commands.clone(), state.config_path.clone())
        };
        let ctx = &self.inner.ctx;
        match probe::probe(&commands).await {
            Ok(info) => {
                if let Some(reported) = &info.config_file {
                    if reported != &config_path {
                        tracing::warn!(
                            reported = %reported.display(),
                            config = %config_path.display(),
                            "engine resolves a different config file",
                        );
                    }
                }
                write(&self.inner.state).engine_info = Some(info.clone());
                Ok(info)
            }
            Err(err) => {
                tracing::error!(error = %err, "sync engine is not usable");
                ctx.journal.record(JournalEntry::text(err.to_string()));
                ctx.notifier
                    .notify(&format!("Sync engine is not available: {err}"));
                Err(err)
            }
        }
    }

    /// Re-read the bookmark store.
    pub fn reload(&self) -> Result<(), EngineError> {
        let config_path = self.config_path();
        let bookmarks = load_bookmarks(&config_path)?;
        let count = bookmarks.len();
        write(&self.inner.state).bookmarks = bookmarks;
        tracing::info!(bookmarks = count, config = %config_path.display(), "bookmarks reloaded");
        self.inner.ctx.broadcaster.trigger();
        Ok(())
    }

    /// Replace the settings and rebuild engine commands from them. Running
    /// processes keep the arguments they were started with.
    pub fn apply_settings(&self, settings: Settings) -> Result<(), EngineError> {
        {
            let mut state = write(&self.inner.state);
            let config_path = settings.engine_config_at(&state.home);
            state.commands = CommandBuilder::new(&settings, Some(&config_path));
            state.config_path = config_path;
            state.settings = settings;
            state.engine_info = None;
        }
        self.reload()
    }

    /// Stop everything the bookmark runs, then remove it from the store.
    pub fn delete_bookmark(&self, name: &BookmarkName) -> Result<(), EngineError> {
        let config_path = self.config_path();
        bookmarks::delete_at(&config_path, name)?;
        self.inner.scheduler.disable(name);
        self.kill_all(Some(name));
        self.inner.ctx.reporter.forget(name);
        self.reload()?;
        self.inner
            .ctx
            .notifier
            .notify(&format!("Bookmark {name} deleted"));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mount
    // -----------------------------------------------------------------------

    pub fn mount(&self, name: &BookmarkName) -> Result<PathBuf, EngineError> {
        let (bookmark, commands, settings) = self.snapshot(name)?;
        let key = ProcessKey::new(name.clone(), Operation::Mount);
        if self.registry().exists(&key) {
            return Err(EngineError::AlreadyExists { key });
        }

        let mountpoint = self.inner.mount_root.join(mountpoint_name(&bookmark));
        let created = prepare_mountpoint(&mountpoint)?;
        let command = commands.supervised(
            [
                "mount".to_string(),
                bookmark.remote_spec(),
                mountpoint.display().to_string(),
            ]
            .into_iter()
            .chain(cache_args(&settings))
            .chain([
                "--allow-non-empty".to_string(),
                "--volname".to_string(),
                name.to_string(),
                "-vv".to_string(),
                "--vfs-cache-mode=writes".to_string(),
            ]),
            Some(&bookmark),
        );

        let cleanup = mountpoint.clone();
        let options = SpawnOptions::default().after_exit(move || release_mountpoint(&cleanup));
        if let Err(err) = self.inner.supervisor.create(key.clone(), &command, options) {
            if created {
                release_mountpoint(&mountpoint);
            }
            return Err(err);
        }
        self.registry()
            .set(&key, MOUNTPOINT_FIELD, mountpoint.display().to_string());
        self.inner.ctx.broadcaster.trigger();
        Ok(mountpoint)
    }

    /// Ask the mount to stop. Returns `false` when nothing was mounted.
    pub fn unmount(&self, name: &BookmarkName) -> Result<bool, EngineError> {
        self.inner.ctx.reporter.reset_notifications(name);
        let key = ProcessKey::new(name.clone(), Operation::Mount);
        match self.registry().kill(&key, KillSignal::Term) {
            Ok(()) => Ok(true),
            Err(EngineError::NoSuchProcess { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The mountpoint, when a mount process is running and its directory exists.
    pub fn mount_status(&self, name: &BookmarkName) -> Option<PathBuf> {
        let key = ProcessKey::new(name.clone(), Operation::Mount);
        let mountpoint = self
            .registry()
            .get(&key, MOUNTPOINT_FIELD)
            .and_then(|value| value.as_str().map(PathBuf::from))?;
        mountpoint.is_dir().then_some(mountpoint)
    }

    pub fn is_mounted(&self, name: &BookmarkName) -> bool {
        let key = ProcessKey::new(name.clone(), Operation::Mount);
        self.registry().is_ok(&key) && self.mount_status(name).is_some()
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    pub fn upload(&self, name: &BookmarkName) -> Result<SyncSession, EngineError> {
        self.inner.launcher.start(name, SyncDirection::Upload)
    }

    pub fn download(&self, name: &BookmarkName) -> Result<SyncSession, EngineError> {
        self.inner.launcher.start(name, SyncDirection::Download)
    }

    pub fn stop_upload(&self, name: &BookmarkName) -> Result<(), EngineError> {
        self.stop_sync(name, SyncDirection::Upload)
    }

    pub fn stop_download(&self, name: &BookmarkName) -> Result<(), EngineError> {
        self.stop_sync(name, SyncDirection::Download)
    }

    fn stop_sync(&self, name: &BookmarkName, direction: SyncDirection) -> Result<(), EngineError> {
        let key = ProcessKey::new(name.clone(), direction.operation());
        self.registry().kill(&key, KillSignal::Term)
    }

    pub fn is_upload(&self, name: &BookmarkName) -> bool {
        self.registry()
            .exists(&ProcessKey::new(name.clone(), Operation::Upload))
    }

    pub fn is_download(&self, name: &BookmarkName) -> bool {
        self.registry()
            .exists(&ProcessKey::new(name.clone(), Operation::Download))
    }

    pub fn is_automatic_upload(&self, name: &BookmarkName) -> bool {
        self.inner.scheduler.is_enabled(name)
    }

    /// Turn automatic sync on or off; returns `true` when it is now on.
    pub fn toggle_automatic_upload(&self, name: &BookmarkName) -> Result<bool, EngineError> {
        let (bookmark, _, settings) = self.snapshot(name)?;
        if !self.inner.scheduler.is_enabled(name) && !settings.sync_enabled {
            return Err(EngineError::Validation(
                "automatic sync is turned off in settings".to_string(),
            ));
        }
        let local = bookmark.local_path().ok_or_else(|| {
            EngineError::Validation(format!("bookmark '{name}' has no local directory"))
        })?;
        let config = AutoSyncConfig {
            debounce: self.inner.autosync_debounce,
            interval: Duration::from_secs(settings.sync_interval_secs.max(1)),
        };
        let enabled = self.inner.scheduler.toggle(name, &local, config)?;
        self.inner.ctx.broadcaster.trigger();
        Ok(enabled)
    }

    // -----------------------------------------------------------------------
    // Serve
    // -----------------------------------------------------------------------

    pub fn serve_start(
        &self,
        protocol: ServeProtocol,
        name: &BookmarkName,
    ) -> Result<(), EngineError> {
        let (bookmark, commands, settings) = self.snapshot(name)?;
        if !settings.serve_enabled(protocol) {
            return Err(EngineError::Validation(format!(
                "serving over {} is disabled in settings",
                protocol.label()
            )));
        }
        let key = ProcessKey::new(name.clone(), Operation::Serve(protocol));
        let command = commands.supervised(
            [
                "serve".to_string(),
                protocol.as_str().to_string(),
                bookmark.remote_spec(),
            ]
            .into_iter()
            .chain(cache_args(&settings))
            .chain(["-vv".to_string()]),
            Some(&bookmark),
        );
        self.inner
            .supervisor
            .create(key.clone(), &command, SpawnOptions::default())?;
        self.registry().set(&key, PROTOCOL_FIELD, protocol.as_str());
        self.inner.ctx.broadcaster.trigger();
        Ok(())
    }

    pub fn serve_stop(
        &self,
        protocol: ServeProtocol,
        name: &BookmarkName,
    ) -> Result<bool, EngineError> {
        let key = ProcessKey::new(name.clone(), Operation::Serve(protocol));
        match self.registry().kill(&key, KillSignal::Term) {
            Ok(()) => Ok(true),
            Err(EngineError::NoSuchProcess { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// `None` when not serving; otherwise the announced address, or an empty
    /// string until the server has announced one.
    pub fn serve_status(&self, protocol: ServeProtocol, name: &BookmarkName) -> Option<String> {
        let key = ProcessKey::new(name.clone(), Operation::Serve(protocol));
        if !self.registry().exists(&key) {
            return None;
        }
        Some(
            self.registry()
                .get(&key, URI_FIELD)
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default(),
        )
    }

    // -----------------------------------------------------------------------
    // Aggregate
    // -----------------------------------------------------------------------

    pub fn kill_all(&self, bookmark: Option<&BookmarkName>) -> usize {
        let signalled = self.registry().kill_all(bookmark);
        self.inner.ctx.broadcaster.trigger();
        signalled
    }

    pub fn is_failed(&self, name: &BookmarkName) -> bool {
        self.inner.ctx.reporter.is_failed(name)
    }

    pub fn bookmark_status(&self, bookmark: &Bookmark) -> BookmarkStatus {
        let name = &bookmark.name;
        let serving = ServeProtocol::all()
            .into_iter()
            .filter_map(|protocol| {
                self.serve_status(protocol, name)
                    .map(|uri| (protocol.as_str().to_string(), uri))
            })
            .collect();
        BookmarkStatus {
            name: name.clone(),
            kind: bookmark.kind().to_string(),
            mountpoint: self.mount_status(name),
            upload: self.is_upload(name),
            download: self.is_download(name),
            automatic_upload: self.is_automatic_upload(name),
            failed: self.is_failed(name),
            serving,
        }
    }

    pub fn status(&self) -> Vec<BookmarkStatus> {
        self.bookmarks()
            .iter()
            .map(|bookmark| self.bookmark_status(bookmark))
            .collect()
    }

    /// Stop automatic sync and every process. Waits up to `grace` for the
    /// processes to exit; returns `true` when none is left.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.scheduler.disable_all();
        self.kill_all(None);
        let deadline = tokio::time::Instant::now() + grace;
        while !self.registry().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining = self.registry().len(), "processes still running after shutdown grace");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    fn snapshot(
        &self,
        name: &BookmarkName,
    ) -> Result<(Bookmark, CommandBuilder, Settings), EngineError> {
        let state = read(&self.inner.state);
        Ok((
            state.bookmark(name)?,
            state.commands.clone(),
            state.settings.clone(),
        ))
    }
}

fn load_bookmarks(config: &Path) -> Result<BTreeMap<BookmarkName, Bookmark>, EngineError> {
    Ok(bookmarks::list_at(config)?
        .into_iter()
        .map(|bookmark| (bookmark.name.clone(), bookmark))
        .collect())
}

#[cfg(target_os = "macos")]
fn default_mount_root(_home: &Path) -> PathBuf {
    PathBuf::from("/Volumes")
}

#[cfg(not(target_os = "macos"))]
fn default_mount_root(home: &Path) -> PathBuf {
    home.to_path_buf()
}

#[cfg(target_os = "macos")]
fn mountpoint_name(bookmark: &Bookmark) -> String {
    format!("{}.{}", bookmark.kind(), bookmark.name)
}

#[cfg(not(target_os = "macos"))]
fn mountpoint_name(bookmark: &Bookmark) -> String {
    format!("mount.{}.{}", bookmark.kind(), bookmark.name)
}

/// Make sure `mountpoint` can be used. Returns `true` when it was created here.
/// VFS cache timeouts, at least one second each.
fn cache_args(settings: &Settings) -> [String; 4] {
    [
        "--attr-timeout".to_string(),
        format!("{}s", settings.cache_files_secs.max(1)),
        "--dir-cache-time".to_string(),
        format!("{}s", settings.cache_directories_secs.max(1)),
    ]
}

fn prepare_mountpoint(mountpoint: &Path) -> Result<bool, EngineError> {
    if mountpoint.exists() {
        let mut entries = std::fs::read_dir(mountpoint).map_err(|e| io_err(mountpoint, e))?;
        if entries.next().is_some() {
            return Err(EngineError::Validation(format!(
                "mountpoint {} is not empty",
                mountpoint.display()
            )));
        }
        return Ok(false);
    }
    if cfg!(target_os = "macos") {
        return Ok(false);
    }
    std::fs::create_dir_all(mountpoint).map_err(|e| io_err(mountpoint, e))?;
    Ok(true)
}

/// Remove the mountpoint directory when it is empty.
fn release_mountpoint(mountpoint: &Path) {
    let empty = std::fs::read_dir(mountpoint)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if !empty {
        return;
    }
    if let Err(err) = std::fs::remove_dir(mountpoint) {
        tracing::warn!(path = %mountpoint.display(), error = %err, "could not remove mountpoint");
    }
}
