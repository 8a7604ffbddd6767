//! Durable log of engine events worth keeping after the process is gone.
//!
//! Each entry is one line: `[<RFC3339 timestamp>] <text>`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use csync_core::ProcessKey;

use crate::classifier::LogEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// A log line emitted by a supervised process.
    Event { key: ProcessKey, event: LogEvent },
    /// A message produced by csync itself.
    Text { message: String },
}

impl JournalEntry {
    pub fn text(message: impl Into<String>) -> Self {
        Self::Text {
            message: message.into(),
        }
    }

    /// Text written after the timestamp.
    pub fn render(&self) -> String {
        match self {
            Self::Event { key, event } => {
                format!("{key} {} {}: {}", event.time, event.level, event.message)
            }
            Self::Text { message } => message.clone(),
        }
    }
}

pub trait Journal: Send + Sync {
    fn record(&self, entry: JournalEntry);
}

/// Appends entries to a file from a background task.
///
/// The file is reopened for every entry so an external rotation never leaves
/// the writer holding a renamed file.
#[derive(Debug, Clone)]
pub struct FileJournal {
    path: PathBuf,
    tx: mpsc::UnboundedSender<String>,
}

impl FileJournal {
    /// Start the writer task. Must be called from within a tokio runtime.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(path.clone(), rx));
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn record(&self, entry: JournalEntry) {
        let line = format!("[{}] {}\n", Utc::now().to_rfc3339(), entry.render());
        if self.tx.send(line).is_err() {
            tracing::warn!(path = %self.path.display(), "journal writer stopped");
        }
    }
}

async fn writer_task(path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
    if let Some(parent) = path.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(path = %parent.display(), error = %err, "cannot create journal directory");
        }
    }
    while let Some(line) = rx.recv().await {
        if let Err(err) = append(&path, line.as_bytes()).await {
            tracing::warn!(path = %path.display(), error = %err, "journal append failed");
        }
    }
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

/// In-memory journal, handy for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl MemoryJournal {
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Journal for MemoryJournal {
    fn record(&self, entry: JournalEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LogLevel;
    use csync_core::{BookmarkName, Operation};
    use std::time::Duration;

    #[tokio::test]
    async fn file_journal_appends_timestamped_lines() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("logs").join("journal.log");
        let journal = FileJournal::open(&path);

        journal.record(JournalEntry::Event {
            key: ProcessKey::new(BookmarkName::from("nas"), Operation::Mount),
            event: LogEvent {
                time: "2024/01/01 10:00:00".to_string(),
                level: LogLevel::Notice,
                message: "vfs cache: cleaned".to_string(),
            },
        });
        journal.record(JournalEntry::text("Download from nas completed"));

        let mut contents = String::new();
        for _ in 0..100 {
            contents = std::fs::read_to_string(&path).unwrap_or_default();
            if contents.lines().count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2, "journal contents: {contents}");
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] nas:mount 2024/01/01 10:00:00 NOTICE: vfs cache: cleaned"));
        assert!(lines[1].ends_with("] Download from nas completed"));
    }
}
