//! Process registry: the single source of truth for which engine processes
//! are alive, keyed by `(bookmark, operation)`.
//!
//! Records are created only by [`crate::Supervisor::create`] and destroyed
//! only by the supervisor's exit handling, once per process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

use csync_core::{BookmarkName, ProcessKey};

use crate::error::EngineError;

pub const OK_FIELD: &str = "OK";
pub const MOUNTPOINT_FIELD: &str = "mountpoint";
pub const URI_FIELD: &str = "URI";
pub const PROTOCOL_FIELD: &str = "protocol";

/// A metadata value attached to a running process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Flag(bool),
    Text(String),
}

impl MetaValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Flag(_) => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

impl From<String> for MetaValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MetaValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Signal delivered to a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// Graceful stop (SIGTERM).
    Term,
    /// Forced stop (SIGKILL).
    Kill,
}

#[derive(Debug)]
struct ProcessRecord {
    control: mpsc::UnboundedSender<KillSignal>,
    metadata: HashMap<String, MetaValue>,
}

/// What was left of a record when its process exited.
#[derive(Debug, Clone, Default)]
pub struct RecordSnapshot {
    pub metadata: HashMap<String, MetaValue>,
}

impl RecordSnapshot {
    pub fn ok(&self) -> bool {
        self.metadata
            .get(OK_FIELD)
            .and_then(MetaValue::as_bool)
            .unwrap_or(false)
    }
}

/// Shared handle to the registry. Clones see the same records.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<ProcessKey, ProcessRecord>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProcessKey, ProcessRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `key` before the process is spawned. Fails when `key` or any
    /// of `excludes` is already present; the check and the insert happen
    /// under one lock.
    pub(crate) fn reserve(
        &self,
        key: &ProcessKey,
        control: mpsc::UnboundedSender<KillSignal>,
        excludes: &[ProcessKey],
    ) -> Result<(), EngineError> {
        let mut records = self.lock();
        if let Some(running) = excludes.iter().find(|other| records.contains_key(*other)) {
            return Err(EngineError::ConcurrentSyncConflict {
                bookmark: key.bookmark.clone(),
                requested: key.operation,
                running: running.operation,
            });
        }
        if records.contains_key(key) {
            return Err(EngineError::AlreadyExists { key: key.clone() });
        }
        let mut metadata = HashMap::new();
        metadata.insert(OK_FIELD.to_string(), MetaValue::Flag(false));
        records.insert(
            key.clone(),
            ProcessRecord {
                control,
                metadata,
            },
        );
        Ok(())
    }

    /// Drop the record for `key`. Only the supervisor calls this: on exit,
    /// or to roll back a reservation whose spawn failed.
    pub(crate) fn remove(&self, key: &ProcessKey) -> Option<RecordSnapshot> {
        self.lock().remove(key).map(|record| RecordSnapshot {
            metadata: record.metadata,
        })
    }

    pub fn exists(&self, key: &ProcessKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn get(&self, key: &ProcessKey, field: &str) -> Option<MetaValue> {
        self.lock()
            .get(key)
            .and_then(|record| record.metadata.get(field).cloned())
    }

    /// Set a metadata field. Returns `false` when no such process exists.
    pub fn set(&self, key: &ProcessKey, field: &str, value: impl Into<MetaValue>) -> bool {
        match self.lock().get_mut(key) {
            Some(record) => {
                record.metadata.insert(field.to_string(), value.into());
                true
            }
            None => false,
        }
    }

    pub fn is_ok(&self, key: &ProcessKey) -> bool {
        self.get(key, OK_FIELD)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// Ask the process behind `key` to stop. The record stays until the
    /// process has actually exited.
    pub fn kill(&self, key: &ProcessKey, signal: KillSignal) -> Result<(), EngineError> {
        let records = self.lock();
        let record = records
            .get(key)
            .ok_or_else(|| EngineError::NoSuchProcess { key: key.clone() })?;
        if record.control.send(signal).is_err() {
            tracing::debug!(key = %key, "process monitor already gone");
        }
        Ok(())
    }

    /// Send SIGTERM to every process of `bookmark`, or to every process when
    /// `bookmark` is `None`. Returns how many processes were signalled.
    pub fn kill_all(&self, bookmark: Option<&BookmarkName>) -> usize {
        let records = self.lock();
        let mut signalled = 0;
        for (key, record) in records.iter() {
            if bookmark.map_or(true, |name| key.bookmark == *name) {
                let _ = record.control.send(KillSignal::Term);
                signalled += 1;
            }
        }
        tracing::info!(
            bookmark = bookmark.map(|b| b.as_str()).unwrap_or("*"),
            signalled,
            "kill_all"
        );
        signalled
    }

    pub fn keys(&self) -> Vec<ProcessKey> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csync_core::Operation;

    fn key(bookmark: &str, operation: Operation) -> ProcessKey {
        ProcessKey::new(BookmarkName::from(bookmark), operation)
    }

    #[test]
    fn reserve_rejects_duplicates_and_excluded_keys() {
        let registry = ProcessRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let download = key("nas", Operation::Download);
        let upload = key("nas", Operation::Upload);

        registry
            .reserve(&download, tx.clone(), &[upload.clone()])
            .expect("first reserve");
        assert!(matches!(
            registry.reserve(&download, tx.clone(), &[]),
            Err(EngineError::AlreadyExists { .. })
        ));
        assert!(matches!(
            registry.reserve(&upload, tx, &[download.clone()]),
            Err(EngineError::ConcurrentSyncConflict {
                running: Operation::Download,
                ..
            })
        ));
        assert!(!registry.exists(&upload));
        assert!(!registry.is_ok(&download), "OK starts false");
    }

    #[test]
    fn metadata_and_kill_routing() {
        let registry = ProcessRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mount = key("nas", Operation::Mount);
        registry.reserve(&mount, tx, &[]).expect("reserve");

        assert!(registry.set(&mount, MOUNTPOINT_FIELD, "/mnt/nas"));
        assert_eq!(
            registry.get(&mount, MOUNTPOINT_FIELD).and_then(|v| v.as_str().map(String::from)),
            Some("/mnt/nas".to_string())
        );
        assert!(!registry.set(&key("other", Operation::Mount), OK_FIELD, true));

        registry.kill(&mount, KillSignal::Kill).expect("kill");
        assert_eq!(rx.try_recv().ok(), Some(KillSignal::Kill));
        assert!(registry.exists(&mount), "kill must not remove the record");

        let missing = registry.kill(&key("nas", Operation::Upload), KillSignal::Term);
        assert!(matches!(missing, Err(EngineError::NoSuchProcess { .. })));

        let snapshot = registry.remove(&mount).expect("snapshot");
        assert!(!snapshot.ok());
        assert!(registry.remove(&mount).is_none());
    }

    #[test]
    fn kill_all_targets_one_bookmark() {
        let registry = ProcessRegistry::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        registry.reserve(&key("a", Operation::Mount), a_tx, &[]).expect("a");
        registry.reserve(&key("b", Operation::Mount), b_tx, &[]).expect("b");

        assert_eq!(registry.kill_all(Some(&BookmarkName::from("a"))), 1);
        assert_eq!(a_rx.try_recv().ok(), Some(KillSignal::Term));
        assert!(b_rx.try_recv().is_err());
        assert_eq!(registry.kill_all(None), 2);
    }
}
