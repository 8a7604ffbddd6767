//! # csync-engine
//!
//! Supervision of external sync-engine processes.
//!
//! - [`Supervisor`] spawns processes and feeds their stderr through the
//!   [`classifier`] and the transition rules in [`signals`]
//! - [`ProcessRegistry`] tracks which `(bookmark, operation)` pairs are alive
//! - [`BisyncOrchestrator`] runs bidirectional syncs and recovers with `--resync`
//! - [`AutoSyncScheduler`] uploads on local changes and downloads on an interval
//! - [`UpdateBroadcaster`] coalesces state-change notifications for front ends
//! - [`probe`] checks the engine binary with one-shot `version` / `config file` calls
//! - [`Engine`] ties it all together behind one facade

pub mod bisync;
pub mod broadcaster;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod journal;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod reporter;
pub mod scheduler;
pub mod signals;
pub mod supervisor;

pub use bisync::{BisyncOrchestrator, SyncOutcome, SyncSession};
pub use broadcaster::UpdateBroadcaster;
pub use classifier::{classify_line, LogClassifier, LogEvent, LogLevel};
pub use engine::{BookmarkStatus, Engine, EngineOptions, Timing};
pub use error::EngineError;
pub use journal::{FileJournal, Journal, JournalEntry, MemoryJournal};
pub use notify::{Notification, NotificationLog, Notifier, TracingNotifier};
pub use probe::EngineInfo;
pub use registry::{KillSignal, MetaValue, ProcessRegistry};
pub use scheduler::{AutoSyncConfig, AutoSyncScheduler, SyncTrigger};
pub use supervisor::{EngineContext, ExitReport, SpawnOptions, Supervisor};
