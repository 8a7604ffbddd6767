//! User-facing notifications.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sink for user-facing messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes notifications to the tracing output only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(notification = %message, "notify");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Bounded in-memory history of the most recent notifications.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<Notification>>>,
}

impl NotificationLog {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.recent().into_iter().map(|n| n.message).collect()
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Notifier for NotificationLog {
    fn notify(&self, message: &str) {
        tracing::info!(notification = %message, "notify");
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(Notification {
            at: Utc::now(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_keeps_most_recent_entries() {
        let log = NotificationLog::new(2);
        for message in ["one", "two", "three"] {
            log.notify(message);
        }
        assert_eq!(log.messages(), vec!["two", "three"]);
    }
}
