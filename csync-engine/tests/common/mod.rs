//! Shared fixtures: a temporary home with a fake engine script.
//!
//! The fake engine is a `/bin/sh` script. With `--config` always present the
//! operation lands in `$3` (`mount`, `serve`, `bisync`) and `$4` tells a
//! resync (`--resync`) from a normal bisync (`--force`).

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use csync_core::{BookmarkName, Settings, LOCAL_PATH_KEY};
use csync_engine::{Engine, EngineOptions, MemoryJournal, NotificationLog, Timing};
use tempfile::TempDir;

pub struct Harness {
    pub home: TempDir,
    pub engine: Engine,
    pub notifications: NotificationLog,
    pub journal: MemoryJournal,
    pub invocations: PathBuf,
}

impl Harness {
    /// Must be called from inside a tokio runtime.
    pub fn new(script_body: &str) -> Self {
        let home = TempDir::new().expect("home tempdir");
        let invocations = home.path().join("invocations.log");
        let script = home.path().join("fake-rclone");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$*\" >> \"{}\"\n{script_body}\n",
                invocations.display()
            ),
        )
        .expect("write fake engine");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

        let config = home.path().join("rclone.conf");
        let mut ini = String::new();
        for name in ["nas", "other"] {
            let local = home.path().join(format!("local-{name}"));
            fs::create_dir_all(&local).expect("local dir");
            ini.push_str(&format!(
                "[{name}]\ntype = webdav\nurl = https://dav.example.com/{name}\n{LOCAL_PATH_KEY} = {}\n\n",
                local.display()
            ));
        }
        fs::write(&config, ini).expect("write config");

        let settings = Settings {
            use_bundled: true,
            bundled_binary: Some(script),
            engine_config: Some(config),
            ..Settings::default()
        };
        let notifications = NotificationLog::default();
        let journal = MemoryJournal::default();
        let timing = Timing {
            broadcast_window: Duration::from_millis(10),
            broadcast_cooldown: Duration::from_millis(10),
            resync_settle: Duration::from_millis(20),
            autosync_debounce: Duration::from_millis(100),
        };
        let options = EngineOptions::new(
            home.path(),
            settings,
            Arc::new(notifications.clone()),
            Arc::new(journal.clone()),
        )
        .with_timing(timing)
        .with_mount_root(home.path().join("mounts"));
        let engine = Engine::new(options).expect("engine");

        Self {
            home,
            engine,
            notifications,
            journal,
            invocations,
        }
    }

    pub fn path(&self) -> &Path {
        self.home.path()
    }

    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.invocations)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn has_notification(&self, needle: &str) -> bool {
        self.notifications
            .messages()
            .iter()
            .any(|message| message.contains(needle))
    }
}

pub fn nas() -> BookmarkName {
    BookmarkName::from("nas")
}

pub fn other() -> BookmarkName {
    BookmarkName::from("other")
}

pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub const WAIT: Duration = Duration::from_secs(10);

/// Emit a plain engine log line on stderr.
pub fn log_line(level: &str, message: &str) -> String {
    format!("echo '2024/01/01 10:00:00 {level}: {message}' >&2")
}
