//! Bisync runs, conflicts and `--resync` recovery against a fake engine.

#![cfg(unix)]

mod common;

use common::{nas, wait_until, Harness, WAIT};
use csync_core::{Operation, SyncDirection};
use csync_engine::EngineError;

const NEEDS_RESYNC: &str = r#"echo '{"time":"2024-01-01T10:00:00.000000+00:00","level":"error","msg":"Bisync aborted. Must run --resync to recover."}' >&2"#;
/// rclone's JSON stats block keeps its tabs and newlines escaped; `printf '%s'`
/// leaves the backslashes untouched where `echo` would expand them.
const TRANSFERRED: &str = r#"printf '%s\n' '{"time":"2024-01-01T10:00:00.000000+00:00","level":"info","msg":"\nTransferred:   \t    2.000 KiB / 2.000 KiB, 100%, 1 KiB/s, ETA 0s\nChecks:                 4 / 4, 100%\nElapsed time:         0.1s\n","source":"accounting/stats.go:482"}' >&2"#;
const SUCCESS: &str = r#"echo '{"time":"2024-01-01T10:00:01.000000+00:00","level":"info","msg":"Bisync successful"}' >&2"#;

fn engine_script(normal: &str, resync: &str) -> String {
    format!(
        "case \"$4\" in\n  --resync)\n    {resync} ;;\n  *)\n    {normal} ;;\nesac"
    )
}

#[tokio::test]
async fn transferred_bytes_produce_completion_notice() {
    let h = Harness::new(&engine_script(
        &format!("{TRANSFERRED}; {SUCCESS}; exit 0"),
        "exit 0",
    ));
    let outcome = h
        .engine
        .upload(&nas())
        .expect("start")
        .settle()
        .await
        .expect("settle");

    assert!(outcome.success);
    assert!(!outcome.resynced);
    assert_eq!(outcome.direction, SyncDirection::Upload);
    assert_eq!(outcome.bytes_transferred, 2048);
    assert!(h.has_notification("Upload to nas completed"));
    assert!(h.engine.registry().is_empty());

    let args = &h.invocations()[0];
    assert!(
        args.contains("bisync --force --recover --create-empty-src-dirs --log-format json"),
        "args: {args}"
    );
    assert!(args.contains(" nas:/ -v --auto-confirm"), "args: {args}");
}

#[tokio::test]
async fn nothing_transferred_stays_quiet() {
    let h = Harness::new(&engine_script(&format!("{SUCCESS}; exit 0"), "exit 0"));
    let outcome = h
        .engine
        .download(&nas())
        .expect("start")
        .settle()
        .await
        .expect("settle");

    assert!(outcome.success);
    assert_eq!(outcome.bytes_transferred, 0);
    assert!(!h.has_notification("completed"));
}

#[tokio::test]
async fn opposite_direction_is_rejected_while_running() {
    let h = Harness::new(&engine_script("exec sleep 30", "exit 0"));
    let session = h.engine.download(&nas()).expect("download");

    match h.engine.upload(&nas()) {
        Err(EngineError::ConcurrentSyncConflict {
            requested, running, ..
        }) => {
            assert_eq!(requested, Operation::Upload);
            assert_eq!(running, Operation::Download);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upload must be rejected while downloading"),
    }
    assert!(matches!(
        h.engine.download(&nas()),
        Err(EngineError::AlreadyExists { .. })
    ));
    assert!(h.engine.is_download(&nas()));
    assert!(!h.engine.is_upload(&nas()));

    h.engine.stop_download(&nas()).expect("stop");
    let outcome = session.settle().await.expect("settle");
    assert!(!outcome.success);
    assert!(matches!(
        h.engine.stop_upload(&nas()),
        Err(EngineError::NoSuchProcess { .. })
    ));
    assert!(h.engine.upload(&nas()).is_ok(), "allowed once the download is gone");
    h.engine.kill_all(None);
}

#[tokio::test]
async fn resync_replaces_the_run_exactly_once() {
    let h = Harness::new(&engine_script(
        &format!("{NEEDS_RESYNC}; {NEEDS_RESYNC}; exec sleep 30"),
        &format!("{SUCCESS}; exit 0"),
    ));
    let session = h.engine.download(&nas()).expect("start");
    let outcome = tokio::time::timeout(WAIT, session.settle())
        .await
        .expect("the aborted run must be killed, not waited out")
        .expect("settle");

    assert!(outcome.resynced);
    assert!(outcome.success);

    let invocations = h.invocations();
    assert_eq!(invocations.len(), 2, "invocations: {invocations:?}");
    assert!(invocations[0].contains("bisync --force --recover"));
    assert!(invocations[1].contains("bisync --resync"));

    assert!(h.has_notification("running initial resync"));
    assert!(h.has_notification("Initial resync for nas completed"));
    assert!(!h.engine.is_failed(&nas()));
    assert!(h.engine.registry().is_empty());
}

#[tokio::test]
async fn failing_resync_is_announced_once() {
    let h = Harness::new(&engine_script(
        &format!("{NEEDS_RESYNC}; exec sleep 30"),
        "exit 7",
    ));
    for _ in 0..2 {
        let outcome = h
            .engine
            .upload(&nas())
            .expect("start")
            .settle()
            .await
            .expect("settle");
        assert!(outcome.resynced);
        assert_eq!(outcome.exit_code, Some(7));
    }

    let failures = h
        .notifications
        .messages()
        .into_iter()
        .filter(|m| m.contains("Initial resync for nas failed"))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(h.invocations().len(), 4);
}

#[tokio::test]
async fn sync_requires_a_local_directory() {
    let h = Harness::new("exit 0");
    std::fs::write(
        h.engine.config_path(),
        "[bare]\ntype = webdav\nurl = https://dav.example.com\n",
    )
    .expect("rewrite config");
    h.engine.reload().expect("reload");

    let err = h
        .engine
        .upload(&csync_core::BookmarkName::from("bare"))
        .err()
        .expect("must fail");
    assert!(matches!(err, EngineError::Validation(_)), "got: {err}");
    assert!(h.invocations().is_empty());
}

#[tokio::test]
async fn automatic_upload_toggles() {
    let h = Harness::new(&engine_script(&format!("{SUCCESS}; exit 0"), "exit 0"));
    assert!(h.engine.toggle_automatic_upload(&nas()).expect("on"));
    assert!(h.engine.is_automatic_upload(&nas()));

    let local = h.path().join("local-nas");
    std::fs::write(local.join("new.txt"), b"hello").expect("write");
    assert!(
        wait_until(WAIT, || h
            .invocations()
            .iter()
            .any(|args| args.contains("bisync")))
        .await
    );

    assert!(!h.engine.toggle_automatic_upload(&nas()).expect("off"));
    assert!(!h.engine.is_automatic_upload(&nas()));
}
