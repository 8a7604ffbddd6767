//! Spawns engine processes and owns their lifecycle.
//!
//! Every process gets one monitor task. The task reads stderr in arrival
//! order, classifies complete lines, applies the transition for each event,
//! delivers kill requests, and on exit removes the registry record exactly
//! once before running the configured exit action.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};

use csync_core::{EngineCommand, Operation, ProcessKey};

use crate::broadcaster::UpdateBroadcaster;
use crate::classifier::{classify_line, LineBuffer, LogLevel};
use crate::error::EngineError;
use crate::journal::{Journal, JournalEntry};
use crate::notify::Notifier;
use crate::registry::{KillSignal, ProcessRegistry, RecordSnapshot, OK_FIELD, URI_FIELD};
use crate::reporter::ErrorReporter;
use crate::signals::{LogSignal, BISYNC_SUCCESS};

const READ_CHUNK: usize = 8 * 1024;
/// How long stderr may stay open after the process itself has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Collaborators shared by every part of the engine.
#[derive(Clone)]
pub struct EngineContext {
    pub registry: ProcessRegistry,
    pub broadcaster: UpdateBroadcaster,
    pub notifier: Arc<dyn Notifier>,
    pub journal: Arc<dyn Journal>,
    pub reporter: ErrorReporter,
}

impl EngineContext {
    pub fn new(
        broadcaster: UpdateBroadcaster,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            registry: ProcessRegistry::new(),
            broadcaster,
            reporter: ErrorReporter::new(notifier.clone(), journal.clone()),
            notifier,
            journal,
        }
    }
}

/// Exit code and final metadata of a process, for callers that wait on it.
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub ok: bool,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// What happens after the record has been removed.
#[derive(Debug, Default)]
pub enum ExitAction {
    /// Announce completion when the process had reached its OK state.
    #[default]
    NotifyCompletion,
    /// Hand the exit report to the caller; no notification.
    Report(oneshot::Sender<ExitReport>),
}

#[derive(Default)]
pub struct SpawnOptions {
    pub exit: ExitAction,
    /// Receives every complete raw stderr line, before classification.
    pub line_tap: Option<mpsc::UnboundedSender<String>>,
    /// Runs once, right after the record is removed.
    pub after_exit: Option<Box<dyn FnOnce() + Send>>,
    /// Keys that must not be running for this process to start.
    pub excludes: Vec<ProcessKey>,
}

impl SpawnOptions {
    pub fn report(tx: oneshot::Sender<ExitReport>) -> Self {
        Self {
            exit: ExitAction::Report(tx),
            ..Self::default()
        }
    }

    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<String>) -> Self {
        self.line_tap = Some(tap);
        self
    }

    pub fn excluding(mut self, key: ProcessKey) -> Self {
        self.excludes.push(key);
        self
    }

    pub fn after_exit<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.after_exit = Some(Box::new(hook));
        self
    }
}

#[derive(Clone)]
pub struct Supervisor {
    ctx: EngineContext,
}

impl Supervisor {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Start `command` under `key`. Fails without spawning anything when a
    /// process with the same key (or one of `options.excludes`) is running.
    pub fn create(
        &self,
        key: ProcessKey,
        command: &EngineCommand,
        options: SpawnOptions,
    ) -> Result<(), EngineError> {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.ctx
            .registry
            .reserve(&key, control_tx, &options.excludes)?;

        let spawned = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.ctx.registry.remove(&key);
                return Err(EngineError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
        };

        tracing::info!(key = %key, pid = ?child.id(), args = ?command.args, "engine process started");
        tokio::spawn(self.clone().monitor(key, child, control_rx, options));
        Ok(())
    }

    async fn monitor(
        self,
        key: ProcessKey,
        mut child: Child,
        mut control_rx: mpsc::UnboundedReceiver<KillSignal>,
        options: SpawnOptions,
    ) {
        let SpawnOptions {
            exit,
            line_tap,
            after_exit,
            ..
        } = options;
        let mut stderr = child.stderr.take();
        let mut lines = LineBuffer::default();
        let mut chunk = vec![0u8; READ_CHUNK];

        let status = loop {
            tokio::select! {
                biased;
                read = read_chunk(&mut stderr, &mut chunk), if stderr.is_some() => match read {
                    Ok(n) if n > 0 => self.dispatch(&key, lines.push(&chunk[..n]), line_tap.as_ref()),
                    _ => stderr = None,
                },
                Some(signal) = control_rx.recv() => deliver(&key, &mut child, signal),
                status = child.wait() => break status,
            }
        };

        if let Some(mut rest) = stderr {
            let drain = async {
                loop {
                    match rest.read(&mut chunk).await {
                        Ok(n) if n > 0 => {
                            self.dispatch(&key, lines.push(&chunk[..n]), line_tap.as_ref())
                        }
                        _ => break,
                    }
                }
            };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                tracing::debug!(key = %key, "stderr still open after exit");
            }
        }
        let tail: Vec<String> = lines.finish().into_iter().collect();
        self.dispatch(&key, tail, line_tap.as_ref());

        self.teardown(&key, status, exit, after_exit);
    }

    fn dispatch(
        &self,
        key: &ProcessKey,
        lines: Vec<String>,
        tap: Option<&mpsc::UnboundedSender<String>>,
    ) {
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(tap) = tap {
                let _ = tap.send(line.clone());
            }
            self.apply(key, &line);
        }
    }

    /// Apply the state transition for one complete stderr line.
    fn apply(&self, key: &ProcessKey, line: &str) {
        let event = classify_line(line);
        let ctx = &self.ctx;
        match LogSignal::from_event(&event) {
            LogSignal::Finishing => ctx.broadcaster.trigger(),
            LogSignal::Error { stale_mount } => {
                ctx.reporter.report(key, &event);
                if matches!(key.operation, Operation::Upload | Operation::Download) {
                    ctx.registry.set(key, OK_FIELD, false);
                }
                if stale_mount {
                    let mount = ProcessKey::new(key.bookmark.clone(), Operation::Mount);
                    if ctx.registry.kill(&mount, KillSignal::Term).is_ok() {
                        tracing::warn!(key = %mount, "stopping unresponsive mount");
                    }
                }
                ctx.broadcaster.trigger();
            }
            LogSignal::BindConflict { message } => {
                let err = EngineError::BindConflict {
                    key: key.clone(),
                    message,
                };
                tracing::warn!(error = %err, "listener bind failed");
                ctx.notifier.notify(&err.to_string());
                ctx.journal.record(JournalEntry::text(err.to_string()));
                let _ = ctx.registry.kill(key, KillSignal::Term);
                ctx.broadcaster.trigger();
            }
            LogSignal::Mounted { path } => {
                ctx.registry.set(key, OK_FIELD, true);
                tracing::info!(key = %key, mountpoint = %path, "mounted");
                ctx.notifier.notify(&format!("Mounted {}", key.bookmark));
                ctx.broadcaster.trigger();
            }
            LogSignal::Serving { announcement, uri } => {
                ctx.registry.set(key, OK_FIELD, true);
                ctx.registry.set(key, URI_FIELD, uri);
                ctx.notifier
                    .notify(&format!("{}: {announcement}", key.bookmark));
                ctx.broadcaster.trigger();
            }
            LogSignal::Plain => {
                if event.message.contains(BISYNC_SUCCESS) {
                    ctx.reporter.reset_notifications(&key.bookmark);
                }
                let level = event.level;
                match level {
                    LogLevel::Notice | LogLevel::Info => ctx.journal.record(JournalEntry::Event {
                        key: key.clone(),
                        event,
                    }),
                    _ => tracing::debug!(key = %key, line, "engine output"),
                }
            }
        }
    }

    fn teardown(
        &self,
        key: &ProcessKey,
        status: std::io::Result<ExitStatus>,
        exit: ExitAction,
        after_exit: Option<Box<dyn FnOnce() + Send>>,
    ) {
        let record = self.ctx.registry.remove(key).unwrap_or_default();
        let code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "wait on engine process failed");
                None
            }
        };
        if let Some(hook) = after_exit {
            hook();
        }
        tracing::info!(key = %key, code = ?code, ok = record.ok(), "engine process exited");

        match exit {
            ExitAction::NotifyCompletion => {
                if let Some(message) = completion_message(key, &record) {
                    self.ctx.notifier.notify(&message);
                }
            }
            ExitAction::Report(tx) => {
                let _ = tx.send(ExitReport {
                    code,
                    ok: record.ok(),
                });
            }
        }
        self.ctx.broadcaster.trigger();
    }
}

async fn read_chunk(stderr: &mut Option<ChildStderr>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stderr {
        Some(stderr) => stderr.read(buf).await,
        None => std::future::pending().await,
    }
}

fn deliver(key: &ProcessKey, child: &mut Child, signal: KillSignal) {
    tracing::debug!(key = %key, signal = ?signal, "delivering signal");
    match signal {
        KillSignal::Kill => {
            if let Err(err) = child.start_kill() {
                tracing::warn!(key = %key, error = %err, "SIGKILL failed");
            }
        }
        KillSignal::Term => terminate(key, child),
    }
}

#[cfg(unix)]
fn terminate(key: &ProcessKey, child: &mut Child) {
    let Some(pid) = child.id() else { return };
    // SAFETY: the pid belongs to a child we have not reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::warn!(key = %key, error = %std::io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(key: &ProcessKey, child: &mut Child) {
    if let Err(err) = child.start_kill() {
        tracing::warn!(key = %key, error = %err, "terminate failed");
    }
}

fn completion_message(key: &ProcessKey, record: &RecordSnapshot) -> Option<String> {
    if !record.ok() {
        return None;
    }
    let bookmark = &key.bookmark;
    Some(match key.operation {
        Operation::Download => format!("Download from {bookmark} completed"),
        Operation::Upload => format!("Upload to {bookmark} completed"),
        Operation::Mount => format!("Unmounted {bookmark}"),
        Operation::Serve(protocol) => format!("{} server for {bookmark} stopped", protocol.label()),
    })
}
