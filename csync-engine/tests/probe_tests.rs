//! One-shot `version` / `config file` calls against a fake engine.

#![cfg(unix)]

mod common;

use common::Harness;
use csync_engine::EngineError;

const FAKE_ENGINE: &str = r#"case "$3" in
  version)
    echo "rclone v1.66.0"
    echo "- os/version: fake" ;;
  config)
    echo "Configuration file is stored at:"
    echo "$2" ;;
esac"#;

#[tokio::test]
async fn probe_reports_version_and_config_file() {
    let h = Harness::new(FAKE_ENGINE);
    assert_eq!(h.engine.engine_info(), None);

    let info = h.engine.probe().await.expect("probe");
    assert_eq!(info.version, "v1.66.0");
    assert_eq!(info.config_file.as_deref(), Some(h.engine.config_path().as_path()));
    assert_eq!(h.engine.engine_info(), Some(info));

    let invocations = h.invocations();
    assert_eq!(invocations.len(), 2, "invocations: {invocations:?}");
    assert!(invocations[0].ends_with("version --auto-confirm"));
    assert!(invocations[1].ends_with("config file --auto-confirm"));
    assert!(h.notifications.messages().is_empty());
}

#[tokio::test]
async fn failing_version_call_is_announced() {
    let h = Harness::new("echo 'Failed to load config' >&2; exit 3");
    let err = h.engine.probe().await.expect_err("must fail");
    match &err {
        EngineError::OneShot { args, message, .. } => {
            assert!(args.ends_with("version --auto-confirm"), "args: {args}");
            assert_eq!(message, "Failed to load config");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.has_notification("Sync engine is not available"));
    assert_eq!(h.journal.entries().len(), 1);
    assert_eq!(h.engine.engine_info(), None);
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let h = Harness::new("exit 0");
    std::fs::remove_file(h.path().join("fake-rclone")).expect("remove engine");

    let err = h.engine.probe().await.expect_err("must fail");
    assert!(matches!(err, EngineError::Spawn { .. }), "got: {err}");
    assert!(h.has_notification("Sync engine is not available"));
}
