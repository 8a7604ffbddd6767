//! Maps classified log events to the supervisor's state transitions.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! | event                                   | signal                       |
//! |-----------------------------------------|------------------------------|
//! | `rclone … finishing`                    | [`LogSignal::Finishing`]     |
//! | `ERROR`                                 | [`LogSignal::Error`]         |
//! | `Opening listener … address already …`  | [`LogSignal::BindConflict`]  |
//! | `Mounting on "…"`                       | [`LogSignal::Mounted`]       |
//! | `Serving on …` and friends              | [`LogSignal::Serving`]       |
//! | anything else                           | [`LogSignal::Plain`]         |

use once_cell::sync::Lazy;
use regex::Regex;

use crate::classifier::{LogEvent, LogLevel};

static FINISHING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rclone.*finishing").expect("valid regex"));
static STALE_MOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(Statfs failed|IO error: couldn't list files: Propfind)").expect("valid regex")
});
static BIND_CONFLICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Opening listener.*address already in use").expect("valid regex")
});
static MOUNTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)Mounting on "([^"]*)"#).expect("valid regex"));
static SERVING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(Serving FTP on|Serving on|Server started on|Serving restic REST API on)\s*(.*)$",
    )
    .expect("valid regex")
});
static TRANSFERRED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Transferred:\s*([0-9]+(?:\.[0-9]+)?)\s*(B|KiB|MiB|GiB|TiB|PiB)\b")
        .expect("valid regex")
});

/// Emitted by the engine when a bisync cannot continue without `--resync`.
pub const RESYNC_MARKER: &str = "--resync";
/// Emitted at the end of a clean bisync run.
pub const BISYNC_SUCCESS: &str = "Bisync successful";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSignal {
    /// The engine is shutting down.
    Finishing,
    /// An `ERROR` line. `stale_mount` asks for the bookmark's mount to be
    /// stopped.
    Error { stale_mount: bool },
    /// The process could not bind its listener.
    BindConflict { message: String },
    Mounted { path: String },
    /// A serve process announced its address. `announcement` is the matched
    /// text from the log line, `uri` the address alone.
    Serving { announcement: String, uri: String },
    Plain,
}

impl LogSignal {
    pub fn from_event(event: &LogEvent) -> Self {
        let message = event.message.as_str();
        if FINISHING.is_match(message) {
            return Self::Finishing;
        }
        if event.level == LogLevel::Error {
            return Self::Error {
                stale_mount: STALE_MOUNT.is_match(message),
            };
        }
        if BIND_CONFLICT.is_match(message) {
            return Self::BindConflict {
                message: message.to_string(),
            };
        }
        if let Some(caps) = MOUNTED.captures(message) {
            return Self::Mounted {
                path: caps[1].to_string(),
            };
        }
        if let Some(caps) = SERVING.captures(message) {
            let uri = caps[2].trim();
            if !uri.is_empty() {
                let uri = if caps[1].eq_ignore_ascii_case("Serving FTP on") {
                    format!("ftp://{uri}")
                } else {
                    uri.to_string()
                };
                return Self::Serving {
                    announcement: caps[0].trim().to_string(),
                    uri,
                };
            }
        }
        Self::Plain
    }
}

/// Cumulative bytes reported by a `Transferred:` stats line.
pub fn transferred_bytes(line: &str) -> Option<u64> {
    let caps = TRANSFERRED.captures(line)?;
    let value: f64 = caps[1].parse().ok()?;
    let exponent = match caps[2].to_ascii_lowercase().as_str() {
        "b" => 0,
        "kib" => 1,
        "mib" => 2,
        "gib" => 3,
        "tib" => 4,
        _ => 5,
    };
    Some((value * 1024f64.powi(exponent)).round() as u64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_line;
    use rstest::rstest;

    fn signal(line: &str) -> LogSignal {
        LogSignal::from_event(&classify_line(line))
    }

    #[test]
    fn finishing_wins_over_error() {
        assert_eq!(
            signal("2024/01/01 10:00:00 ERROR : rclone: Signal received, finishing"),
            LogSignal::Finishing
        );
    }

    #[rstest]
    #[case("2024/01/01 10:00:00 ERROR : nas: Statfs failed: 401", true)]
    #[case("2024/01/01 10:00:00 ERROR : IO error: couldn't list files: Propfind x", true)]
    #[case("2024/01/01 10:00:00 ERROR : file.txt: failed to copy: 403", false)]
    fn error_lines(#[case] line: &str, #[case] stale_mount: bool) {
        assert_eq!(signal(line), LogSignal::Error { stale_mount });
    }

    #[test]
    fn unknown_lines_are_plain() {
        assert_eq!(signal("Statfs failed without a level"), LogSignal::Plain);
    }

    #[test]
    fn bind_conflict() {
        let line = "2024/01/01 10:00:00 NOTICE: Opening listener: listen tcp 127.0.0.1:8080: bind: address already in use";
        assert!(matches!(signal(line), LogSignal::BindConflict { .. }));
    }

    #[test]
    fn mounted_path() {
        assert_eq!(
            signal(r#"2024/01/01 10:00:00 INFO  : nas: Mounting on "/home/u/mount.webdav.nas""#),
            LogSignal::Mounted {
                path: "/home/u/mount.webdav.nas".to_string()
            }
        );
    }

    #[rstest]
    #[case("Serving on http://127.0.0.1:8080/", "http://127.0.0.1:8080/")]
    #[case("Serving FTP on 127.0.0.1:2121", "ftp://127.0.0.1:2121")]
    #[case("Server started on [http://127.0.0.1:8081/]", "[http://127.0.0.1:8081/]")]
    #[case("Serving restic REST API on http://127.0.0.1:8082/", "http://127.0.0.1:8082/")]
    fn serving_uri(#[case] message: &str, #[case] uri: &str) {
        let line = format!("2024/01/01 10:00:00 NOTICE: {message}");
        match signal(&line) {
            LogSignal::Serving {
                announcement,
                uri: got,
            } => {
                assert_eq!(got, uri);
                assert_eq!(announcement, message);
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn serving_without_address_is_plain() {
        assert_eq!(signal("2024/01/01 10:00:00 NOTICE: Serving on"), LogSignal::Plain);
    }

    #[rstest]
    #[case("Transferred:   \t  512 B / 512 B, 100%, 0 B/s, ETA -", Some(512))]
    #[case("Transferred:        1.5 KiB / 1.5 KiB, 100%", Some(1536))]
    #[case("Transferred:          2 MiB / 4 MiB, 50%", Some(2 * 1024 * 1024))]
    #[case("Transferred:            0 / 0, -", None)]
    #[case("Checks: 4 / 4, 100%", None)]
    fn transferred(#[case] line: &str, #[case] expected: Option<u64>) {
        assert_eq!(transferred_bytes(line), expected);
    }
}
