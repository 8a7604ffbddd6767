//! Turns the engine's stderr byte stream into structured [`LogEvent`]s.
//!
//! Chunks may end anywhere, including inside a multi-byte character; the
//! unterminated tail is carried over to the next chunk, so the resulting
//! event sequence does not depend on how the stream was split.
//!
//! Plain lines look like `2024/01/01 10:00:00 NOTICE: message`: the first 19
//! characters are the timestamp, the text up to the next `:` is the level.
//! Lines produced with `--log-format json` are decoded from their JSON object.

use std::fmt;

use serde::{Deserialize, Serialize};

const TIMESTAMP_CHARS: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Notice,
    Info,
    Debug,
    Unknown,
}

impl LogLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "ERROR" => Some(Self::Error),
            "NOTICE" => Some(Self::Notice),
            "INFO" => Some(Self::Info),
            "DEBUG" => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub time: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}

// ---------------------------------------------------------------------------
// Line splitting
// ---------------------------------------------------------------------------

/// Byte-level line splitter with carry-over between chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    /// Append `chunk` and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        let Some(last_newline) = self.carry.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);
        complete[..last_newline]
            .split(|b| *b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Flush the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.carry);
        Some(decode_line(&tail))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Stateful classifier: feed raw chunks, get events for completed lines.
#[derive(Debug, Default)]
pub struct LogClassifier {
    buffer: LineBuffer,
}

impl LogClassifier {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LogEvent> {
        self.buffer
            .push(chunk)
            .iter()
            .map(|line| classify_line(line))
            .collect()
    }

    pub fn finish(&mut self) -> Option<LogEvent> {
        self.buffer.finish().map(|line| classify_line(&line))
    }
}

/// Classify a single complete line.
pub fn classify_line(line: &str) -> LogEvent {
    let line = line.trim();
    if line.starts_with('{') {
        if let Some(event) = classify_json(line) {
            return event;
        }
    }

    let split = line
        .char_indices()
        .nth(TIMESTAMP_CHARS)
        .map(|(idx, _)| idx)
        .unwrap_or(line.len());
    let (time, rest) = line.split_at(split);
    let rest = rest.trim();
    let (level, message) = rest.split_once(':').unwrap_or((rest, ""));

    match LogLevel::parse(level) {
        Some(level) => LogEvent {
            time: time.to_string(),
            level,
            message: message.trim().to_string(),
        },
        None => LogEvent {
            time: time.to_string(),
            level: LogLevel::Unknown,
            message: rest.to_string(),
        },
    }
}

#[derive(Deserialize)]
struct JsonLine {
    #[serde(default)]
    time: String,
    #[serde(default)]
    level: String,
    msg: String,
}

fn classify_json(line: &str) -> Option<LogEvent> {
    let parsed: JsonLine = serde_json::from_str(line).ok()?;
    let level = match parsed.level.to_lowercase().as_str() {
        "warning" => LogLevel::Notice,
        "critical" | "alert" | "emergency" => LogLevel::Error,
        other => LogLevel::parse(other).unwrap_or(LogLevel::Unknown),
    };
    Some(LogEvent {
        time: plain_timestamp(&parsed.time),
        level,
        message: parsed.msg.trim().to_string(),
    })
}

/// `2024-01-01T10:00:02.123+01:00` becomes `2024/01/01 10:00:02`.
fn plain_timestamp(rfc3339: &str) -> String {
    rfc3339
        .chars()
        .take(TIMESTAMP_CHARS)
        .enumerate()
        .map(|(idx, c)| match (idx, c) {
            (4 | 7, '-') => '/',
            (10, 'T') => ' ',
            _ => c,
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const STREAM: &str = "2024/01/01 10:00:00 NOTICE: Serving on http://127.0.0.1:8080/\r\n\
        2024/01/01 10:00:01 ERROR : Zürich.txt: failed to copy: 403 Forbidden\n\
        {\"time\":\"2024-01-01T10:00:02.123456+01:00\",\"level\":\"info\",\"msg\":\"Bisync successful\"}\n\
        2024/01/01 10:00:03 DEBUG : pacer: low level retry\n\
        garbage line without a level\n\
        2024/01/01 10:00:04 INFO  : tail without newline";

    fn classify_split(chunks: &[&[u8]]) -> Vec<LogEvent> {
        let mut classifier = LogClassifier::default();
        let mut events: Vec<LogEvent> = chunks.iter().flat_map(|c| classifier.push(c)).collect();
        events.extend(classifier.finish());
        events
    }

    #[test]
    fn plain_line_fields() {
        let event = classify_line("2024/01/01 10:00:00 ERROR : something failed");
        assert_eq!(event.time, "2024/01/01 10:00:00");
        assert_eq!(event.level, LogLevel::Error);
        assert_eq!(event.message, "something failed");
    }

    #[test]
    fn only_first_colon_separates_level() {
        let event = classify_line("2024/01/01 10:00:00 NOTICE: Serving on http://127.0.0.1:8080/");
        assert_eq!(event.level, LogLevel::Notice);
        assert_eq!(event.message, "Serving on http://127.0.0.1:8080/");
    }

    #[rstest]
    #[case("2024/01/01 10:00:00 error: lower case", LogLevel::Error)]
    #[case("2024/01/01 10:00:00 Notice : mixed", LogLevel::Notice)]
    #[case("2024/01/01 10:00:00 INFO  : padded", LogLevel::Info)]
    #[case("2024/01/01 10:00:00 DEBUG : debug", LogLevel::Debug)]
    #[case("2024/01/01 10:00:00 WARN: not a level", LogLevel::Unknown)]
    #[case("short", LogLevel::Unknown)]
    #[case("", LogLevel::Unknown)]
    fn level_recognition(#[case] line: &str, #[case] expected: LogLevel) {
        assert_eq!(classify_line(line).level, expected);
    }

    #[test]
    fn unknown_keeps_whole_remainder() {
        let event = classify_line("2024/01/01 10:00:00 Transferred: 1 KiB / 1 KiB");
        assert_eq!(event.level, LogLevel::Unknown);
        assert_eq!(event.message, "Transferred: 1 KiB / 1 KiB");
    }

    #[test]
    fn json_lines_are_decoded() {
        let event = classify_line(
            r#"{"time":"2024-01-01T10:00:02.123456+01:00","level":"warning","msg":" slow "}"#,
        );
        assert_eq!(event.time, "2024/01/01 10:00:02");
        assert_eq!(event.level, LogLevel::Notice);
        assert_eq!(event.message, "slow");
    }

    #[rstest]
    #[case("critical")]
    #[case("alert")]
    #[case("EMERGENCY")]
    fn severe_json_levels_are_errors(#[case] level: &str) {
        let line = format!(r#"{{"time":"2024-01-01T10:00:02Z","level":"{level}","msg":"boom"}}"#);
        let event = classify_line(&line);
        assert_eq!(event.level, LogLevel::Error);
        assert_eq!(event.time, "2024/01/01 10:00:02");
    }

    #[test]
    fn chunk_boundaries_do_not_change_events() {
        let bytes = STREAM.as_bytes();
        let whole = classify_split(&[bytes]);
        assert_eq!(whole.len(), 6);
        assert_eq!(whole[1].message, "Zürich.txt: failed to copy: 403 Forbidden");
        assert_eq!(whole[2].message, "Bisync successful");
        assert_eq!(whole[5].message, "tail without newline");

        for size in [1, 2, 3, 7, 64] {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(classify_split(&chunks), whole, "chunk size {size}");
        }
        for split in 0..bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(classify_split(&[a, b]), whole, "split at {split}");
        }
    }

    #[test]
    fn line_buffer_holds_partial_line() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"2024/01/01 10:00:00 ERR").is_empty());
        assert_eq!(buffer.push(b"OR : x\r\nnext"), vec!["2024/01/01 10:00:00 ERROR : x"]);
        assert_eq!(buffer.finish().as_deref(), Some("next"));
        assert_eq!(buffer.finish(), None);
    }
}
