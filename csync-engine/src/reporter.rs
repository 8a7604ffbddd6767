//! Turns engine `ERROR` lines into user notifications.
//!
//! Known failures are matched against a small catalogue of substrings and
//! rewritten into readable messages. Each bookmark gets at most one such
//! notification until its flag is reset (on unmount, or when a bisync run
//! reports success), unless the catalogue entry asks to always notify.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use regex::Regex;

use csync_core::{BookmarkName, ProcessKey};

use crate::classifier::LogEvent;
use crate::journal::{Journal, JournalEntry};
use crate::notify::Notifier;

struct CatalogEntry {
    /// Lowercase substring looked up in the lowercased message.
    needle: &'static str,
    message: &'static str,
    always_notify: bool,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        needle: "webdav root '': statfs failed: propfind",
        message: "WebDAV error: the server did not answer. Check the address {url}",
        always_notify: false,
    },
    CatalogEntry {
        needle: "io error: couldn't list files: propfind",
        message: "I/O error: could not list files. Check the address {url}",
        always_notify: false,
    },
    CatalogEntry {
        needle: "critical error: couldn't list files: propfind",
        message: "Sync error: could not list files. Check your connection.",
        always_notify: false,
    },
    CatalogEntry {
        needle: "webdav root '': statfs failed: 401",
        message: "WebDAV error: wrong login or password",
        always_notify: false,
    },
    CatalogEntry {
        needle: "failed to copy: 403",
        message: "Access denied: the remote is read-only",
        always_notify: false,
    },
];

static QUOTED_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(https?://[^"]+)""#).expect("valid regex"));

#[derive(Default)]
struct ReporterState {
    notified: HashSet<BookmarkName>,
    failed: HashSet<BookmarkName>,
}

/// Shared error reporter. Clones see the same per-bookmark flags.
#[derive(Clone)]
pub struct ErrorReporter {
    notifier: Arc<dyn Notifier>,
    journal: Arc<dyn Journal>,
    state: Arc<Mutex<ReporterState>>,
}

impl ErrorReporter {
    pub fn new(notifier: Arc<dyn Notifier>, journal: Arc<dyn Journal>) -> Self {
        Self {
            notifier,
            journal,
            state: Arc::new(Mutex::new(ReporterState::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record and, when appropriate, announce an `ERROR` event of `key`.
    pub fn report(&self, key: &ProcessKey, event: &LogEvent) {
        self.journal.record(JournalEntry::Event {
            key: key.clone(),
            event: event.clone(),
        });

        let bookmark = &key.bookmark;
        let message = match catalog_message(&event.message) {
            Some((message, always_notify)) => {
                let first = self.state().notified.insert(bookmark.clone());
                (first || always_notify).then_some(message)
            }
            None => {
                let first = self.state().failed.insert(bookmark.clone());
                first.then(|| format!("{bookmark}: {}", event.message))
            }
        };
        if let Some(message) = message {
            self.notifier.notify(&message);
        }
    }

    /// Allow the next catalogued error of `bookmark` to notify again.
    pub fn reset_notifications(&self, bookmark: &BookmarkName) {
        self.state().notified.remove(bookmark);
    }

    /// Forget the failed status of `bookmark` after a successful run.
    pub fn clear_failed(&self, bookmark: &BookmarkName) {
        self.state().failed.remove(bookmark);
    }

    /// `true` when an uncatalogued error was seen since the last success.
    pub fn is_failed(&self, bookmark: &BookmarkName) -> bool {
        self.state().failed.contains(bookmark)
    }

    /// Forget every flag of `bookmark`.
    pub fn forget(&self, bookmark: &BookmarkName) {
        let mut state = self.state();
        state.notified.remove(bookmark);
        state.failed.remove(bookmark);
    }
}

fn catalog_message(raw: &str) -> Option<(String, bool)> {
    let lowered = raw.to_lowercase();
    let entry = CATALOG.iter().find(|entry| lowered.contains(entry.needle))?;
    let url = QUOTED_URL
        .captures(raw)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default();
    Some((
        entry.message.replace("{url}", &url).trim().to_string(),
        entry.always_notify,
    ))
}
