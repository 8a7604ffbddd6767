//! Coalesces bursts of state-change triggers into few listener calls.
//!
//! ```text
//!          trigger                 window elapsed (no extra trigger)
//!   Idle ───────────▶ Pending ──────────────────────────────────────▶ Idle
//!                      │  ▲ trigger: restart window, remember follow-up
//!                      │  │
//!                      ▼  │ window elapsed with follow-up
//!                    Cooldown ── cooldown elapsed or trigger ──▶ Pending
//! ```
//!
//! A burst of triggers inside one window produces one call, plus one more
//! call after the cooldown when the burst had more than one trigger.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(100);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(100);

pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending { deadline: Instant, follow_up: bool },
    Cooldown { until: Instant },
}

/// Cloneable handle; every clone feeds the same timer task.
#[derive(Clone)]
pub struct UpdateBroadcaster {
    tx: mpsc::UnboundedSender<()>,
    callbacks: Arc<Mutex<Vec<UpdateCallback>>>,
}

impl UpdateBroadcaster {
    /// Spawn the timer task with the default timing. Requires a tokio runtime.
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_WINDOW, DEFAULT_COOLDOWN)
    }

    pub fn with_timing(window: Duration, cooldown: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let callbacks: Arc<Mutex<Vec<UpdateCallback>>> = Arc::default();
        tokio::spawn(run(rx, callbacks.clone(), window, cooldown));
        Self { tx, callbacks }
    }

    /// Non-blocking; safe to call from any context.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<()>,
    callbacks: Arc<Mutex<Vec<UpdateCallback>>>,
    window: Duration,
    cooldown: Duration,
) {
    let mut state = State::Idle;
    loop {
        state = match state {
            State::Idle => match rx.recv().await {
                Some(()) => State::Pending {
                    deadline: Instant::now() + window,
                    follow_up: false,
                },
                None => break,
            },
            State::Pending {
                deadline,
                follow_up,
            } => {
                tokio::select! {
                    biased;
                    _ = sleep_until(deadline) => {
                        fire(&callbacks);
                        if follow_up {
                            State::Cooldown { until: Instant::now() + cooldown }
                        } else {
                            State::Idle
                        }
                    }
                    msg = rx.recv() => match msg {
                        Some(()) => State::Pending {
                            deadline: Instant::now() + window,
                            follow_up: true,
                        },
                        None => break,
                    },
                }
            }
            State::Cooldown { until } => {
                tokio::select! {
                    _ = sleep_until(until) => State::Pending {
                        deadline: Instant::now() + window,
                        follow_up: false,
                    },
                    msg = rx.recv() => match msg {
                        Some(()) => State::Pending {
                            deadline: Instant::now() + window,
                            follow_up: false,
                        },
                        None => break,
                    },
                }
            }
        };
    }
}

fn fire(callbacks: &Mutex<Vec<UpdateCallback>>) {
    let snapshot: Vec<UpdateCallback> = callbacks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    tracing::trace!(listeners = snapshot.len(), "broadcasting state update");
    for callback in snapshot {
        callback();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
