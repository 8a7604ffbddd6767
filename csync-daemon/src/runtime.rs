use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use csync_core::settings::{self, csync_root};
use csync_core::{BookmarkName, ServeProtocol};
use csync_engine::{Engine, EngineOptions, FileJournal, NotificationLog, SyncSession};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::RotationPolicy;
use crate::paths::{journal_path, logs_dir, rotated_logs, socket_path, CONFIG_DEBOUNCE};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// How long shutdown waits for supervised processes to exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const ROTATION_INTERVAL: Duration = Duration::from_secs(5);

/// Everything a socket client can reach.
pub struct DaemonState {
    home: PathBuf,
    engine: Engine,
    notifications: NotificationLog,
    revision: Arc<AtomicU64>,
    started_at_unix: u64,
}

impl DaemonState {
    pub fn new(home: PathBuf, engine: Engine, notifications: NotificationLog) -> Self {
        let revision = Arc::new(AtomicU64::new(0));
        let counter = revision.clone();
        engine.on_update(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        Self {
            home,
            engine,
            notifications,
            revision,
            started_at_unix: unix_seconds_now(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Bumped once per coalesced engine state change.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConfigFile {
    Settings,
    Bookmarks,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let settings = settings::load_at(&home)?;
    let notifications = NotificationLog::default();
    let journal = FileJournal::open(journal_path(&home));
    let engine = Engine::new(EngineOptions::new(
        &home,
        settings,
        Arc::new(notifications.clone()),
        Arc::new(journal),
    ))?;
    let engine_version = match engine.probe().await {
        Ok(info) => info.version,
        Err(_) => "unavailable".to_string(),
    };
    tracing::info!(
        home = %home.display(),
        engine = %engine_version,
        bookmarks = engine.bookmarks().len(),
        config = %engine.config_path().display(),
        "daemon starting",
    );
    let state = Arc::new(DaemonState::new(home.clone(), engine, notifications));

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = config_watcher_task(state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = termination_signal() => {
                    match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "received signal, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("signal handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, socket_result, rotation_result, signal_result) =
        tokio::join!(watcher_handle, socket_handle, rotation_handle, signal_handle);

    if !state.engine.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!("some engine processes outlived the shutdown grace period");
    }
    tracing::info!("daemon stopped");

    handle_join("config_watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Config watcher
// ---------------------------------------------------------------------------

/// Reload settings and bookmarks when their files change on disk.
async fn config_watcher_task(
    state: Arc<DaemonState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let settings_file = settings::settings_path_at(&state.home);
    let mut config_file = state.engine.config_path();
    let mut watched_dirs = HashSet::new();
    watch_parent(&mut watcher, &mut watched_dirs, &settings_file)?;
    watch_parent(&mut watcher, &mut watched_dirs, &config_file)?;

    let mut pending = PendingReload::default();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep_until_some(pending.deadline()) => {
                let Some(file) = pending.take() else { continue };
                match reload_config(&state, file) {
                    Ok(()) => tracing::info!(file = ?file, "configuration reloaded"),
                    Err(err) => tracing::error!(file = ?file, error = %err, "configuration reload failed"),
                }

                let current = state.engine.config_path();
                if current != config_file {
                    watch_parent(&mut watcher, &mut watched_dirs, &current)?;
                    config_file = current;
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if is_same_file(&path, &settings_file) {
                        pending.note(ConfigFile::Settings, Instant::now());
                    } else if is_same_file(&path, &config_file) {
                        pending.note(ConfigFile::Bookmarks, Instant::now());
                    }
                }
            }
        }
    }

    Ok(())
}

/// Trailing-edge coalescing of config file events: editors and atomic saves
/// produce bursts, and the file is only complete after the last one.
#[derive(Debug, Default)]
struct PendingReload {
    files: HashSet<ConfigFile>,
    deadline: Option<Instant>,
}

impl PendingReload {
    fn note(&mut self, file: ConfigFile, now: Instant) {
        self.files.insert(file);
        self.deadline = Some(now + CONFIG_DEBOUNCE);
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A settings reload re-reads the bookmarks as well.
    fn take(&mut self) -> Option<ConfigFile> {
        self.deadline = None;
        let files = std::mem::take(&mut self.files);
        [ConfigFile::Settings, ConfigFile::Bookmarks]
            .into_iter()
            .find(|file| files.contains(file))
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn reload_config(state: &DaemonState, file: ConfigFile) -> Result<(), DaemonError> {
    match file {
        ConfigFile::Settings => {
            state
                .engine
                .apply_settings(settings::load_at(&state.home)?)?;
            let engine = state.engine.clone();
            // The binary may have changed; failures are announced by probe().
            tokio::spawn(async move { engine.probe().await.ok() });
        }
        ConfigFile::Bookmarks => state.engine.reload()?,
    }
    Ok(())
}

/// Files are replaced by rename, so the directory is what gets watched.
fn watch_parent(
    watcher: &mut RecommendedWatcher,
    watched: &mut HashSet<PathBuf>,
    file: &Path,
) -> Result<(), DaemonError> {
    let Some(dir) = file.parent() else {
        return Ok(());
    };
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "config directory missing; changes will not be picked up");
        return Ok(());
    }
    if watched.insert(dir.to_path_buf()) {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(dir = %dir.display(), "watching config directory");
    }
    Ok(())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Event paths may arrive canonicalized (`/private/var/...` on macOS).
fn is_same_file(event_path: &Path, target: &Path) -> bool {
    if event_path == target {
        return true;
    }
    if event_path.file_name() != target.file_name() {
        return false;
    }
    let canonical_parent = |p: &Path| p.parent().and_then(|dir| fs::canonicalize(dir).ok());
    match (canonical_parent(event_path), canonical_parent(target)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = csync_root(&state.home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };
        tracing::debug!(cmd = %request.cmd, bookmark = ?request.bookmark, "request");

        if request.cmd == "stop" {
            let _ = shutdown_tx.send(());
            write_response(&mut writer, &DaemonResponse::ok(json!({ "stopping": true }))).await?;
            break;
        }

        let response = DaemonResponse::from(handle_request(&state, &request));
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

/// Dispatch one request against the engine. `stop` is handled by the caller.
fn handle_request(state: &DaemonState, request: &DaemonRequest) -> Result<Value, DaemonError> {
    let engine = &state.engine;
    match request.cmd.as_str() {
        "status" => Ok(status_payload(state)),
        "notifications" => Ok(json!(state.notifications.recent())),
        "reload" => {
            reload_config(state, ConfigFile::Settings)?;
            Ok(json!({ "bookmarks": engine.bookmarks().len() }))
        }
        "mount" => {
            let mountpoint = engine.mount(&bookmark_field(request)?)?;
            Ok(json!({ "mountpoint": mountpoint }))
        }
        "unmount" => Ok(json!({ "unmounted": engine.unmount(&bookmark_field(request)?)? })),
        "upload" => start_sync(engine.upload(&bookmark_field(request)?)?),
        "download" => start_sync(engine.download(&bookmark_field(request)?)?),
        "stop_upload" => {
            engine.stop_upload(&bookmark_field(request)?)?;
            Ok(json!({ "stopped": true }))
        }
        "stop_download" => {
            engine.stop_download(&bookmark_field(request)?)?;
            Ok(json!({ "stopped": true }))
        }
        "serve_start" => {
            let protocol = protocol_field(request)?;
            let name = bookmark_field(request)?;
            engine.serve_start(protocol, &name)?;
            Ok(json!({ "bookmark": name.as_str(), "protocol": protocol.as_str() }))
        }
        "serve_stop" => {
            let protocol = protocol_field(request)?;
            let stopped = engine.serve_stop(protocol, &bookmark_field(request)?)?;
            Ok(json!({ "stopped": stopped }))
        }
        "auto_toggle" => {
            let enabled = engine.toggle_automatic_upload(&bookmark_field(request)?)?;
            Ok(json!({ "automatic_upload": enabled }))
        }
        "kill_all" => {
            let scope = request.bookmark.as_deref().map(BookmarkName::from);
            Ok(json!({ "killed": engine.kill_all(scope.as_ref()) }))
        }
        "delete_bookmark" => {
            let name = bookmark_field(request)?;
            engine.delete_bookmark(&name)?;
            Ok(json!({ "deleted": name.as_str() }))
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    }
}

fn bookmark_field(request: &DaemonRequest) -> Result<BookmarkName, DaemonError> {
    request
        .bookmark
        .as_deref()
        .map(BookmarkName::from)
        .ok_or_else(|| DaemonError::MissingField {
            cmd: request.cmd.clone(),
            field: "bookmark",
        })
}

fn protocol_field(request: &DaemonRequest) -> Result<ServeProtocol, DaemonError> {
    let raw = request
        .protocol
        .as_deref()
        .ok_or_else(|| DaemonError::MissingField {
            cmd: request.cmd.clone(),
            field: "protocol",
        })?;
    Ok(raw.parse()?)
}

/// Respond as soon as the run is underway; the outcome only goes to the log.
fn start_sync(session: SyncSession) -> Result<Value, DaemonError> {
    let key = session.key().to_string();
    tokio::spawn(async move {
        match session.settle().await {
            Ok(outcome) => tracing::info!(
                bookmark = %outcome.bookmark,
                direction = %outcome.direction,
                success = outcome.success,
                resynced = outcome.resynced,
                bytes = outcome.bytes_transferred,
                "sync settled",
            ),
            Err(err) => tracing::error!(error = %err, "sync did not settle"),
        }
    });
    Ok(json!({ "started": key }))
}

fn status_payload(state: &DaemonState) -> Value {
    let engine = &state.engine;
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": state.started_at_unix,
        "uptime_secs": unix_seconds_now().saturating_sub(state.started_at_unix),
        "revision": state.revision(),
        "processes": engine.registry().len(),
        "process_keys": process_keys(engine),
        "config": engine.config_path(),
        "engine": engine.engine_info(),
        "bookmarks": engine.status(),
        "notifications": state.notifications.recent(),
    })
}

fn process_keys(engine: &Engine) -> Vec<String> {
    let mut keys: Vec<String> = engine
        .registry()
        .keys()
        .iter()
        .map(ToString::to_string)
        .collect();
    keys.sort();
    keys
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    let files = rotated_logs(&home);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let files = files.clone();
                // Failures are traced per file inside rotate_all.
                tokio::task::spawn_blocking(move || RotationPolicy::default().rotate_all(&files))
                    .await
                    .ok();
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [csync_root(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var_os("CSYNC_LOG_JSON").is_some() {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
