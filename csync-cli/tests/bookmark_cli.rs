use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use csync_core::{bookmarks, BookmarkName, LOCAL_PATH_KEY};

fn csync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("csync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

fn config(home: &Path) -> std::path::PathBuf {
    home.join(".config").join("rclone").join("rclone.conf")
}

#[test]
fn add_list_show_update_delete() {
    let home = TempDir::new().expect("home");
    let local = home.path().join("documents");
    fs::create_dir_all(&local).expect("local dir");

    csync_cmd(home.path())
        .args(["bookmark", "add", "nas", "--type", "webdav"])
        .args(["-o", "url=https://dav.example.com/remote.php/webdav"])
        .arg("--local")
        .arg(&local)
        .assert()
        .success()
        .stdout(contains("Added bookmark 'nas'"));

    let stored = bookmarks::get_at(&config(home.path()), &BookmarkName::from("nas"))
        .expect("stored bookmark");
    assert_eq!(stored.kind(), "webdav");
    assert_eq!(stored.option("config_automatic"), Some("no"));
    assert_eq!(
        stored.option(LOCAL_PATH_KEY),
        Some(local.display().to_string().as_str())
    );

    csync_cmd(home.path())
        .args(["bookmark", "list"])
        .assert()
        .success()
        .stdout(contains("nas").and(contains("webdav")).and(contains("nas:/")));

    csync_cmd(home.path())
        .args(["bookmark", "update", "nas", "--remote-path", "backups"])
        .assert()
        .success()
        .stdout(contains("_rclonetray_remote_path = backups"));

    csync_cmd(home.path())
        .args(["bookmark", "show", "nas"])
        .assert()
        .success()
        .stdout(contains("url = https://dav.example.com/remote.php/webdav"));

    csync_cmd(home.path())
        .args(["bookmark", "delete", "nas"])
        .assert()
        .success();
    csync_cmd(home.path())
        .args(["bookmark", "list", "--json"])
        .assert()
        .success()
        .stdout(contains("[]"));
}

#[test]
fn invalid_names_and_duplicates_are_rejected() {
    let home = TempDir::new().expect("home");

    csync_cmd(home.path())
        .args(["bookmark", "add", "bad name", "--type", "local"])
        .assert()
        .failure()
        .stderr(contains("failed to add bookmark 'bad name'"));

    csync_cmd(home.path())
        .args(["bookmark", "add", "disk", "--type", "local"])
        .assert()
        .success();
    csync_cmd(home.path())
        .args(["bookmark", "add", "disk", "--type", "local"])
        .assert()
        .failure()
        .stderr(contains("already exists"));
}

#[test]
fn webdav_requires_a_url() {
    let home = TempDir::new().expect("home");
    csync_cmd(home.path())
        .args(["bookmark", "add", "dav", "--type", "webdav"])
        .assert()
        .failure()
        .stderr(contains("'url' is required"));
    assert!(!config(home.path()).exists());
}

#[test]
fn hidden_provider_types_are_not_listed() {
    let home = TempDir::new().expect("home");
    let path = config(home.path());
    fs::create_dir_all(path.parent().expect("parent")).expect("config dir");
    fs::write(
        &path,
        "[vault]\ntype = crypt\nremote = nas:secret\n\n[disk]\ntype = local\n",
    )
    .expect("write config");

    csync_cmd(home.path())
        .args(["bookmark", "list"])
        .assert()
        .success()
        .stdout(contains("disk").and(contains("vault").not()));
    csync_cmd(home.path())
        .args(["bookmark", "show", "vault"])
        .assert()
        .failure();
}

#[test]
fn update_needs_something_to_change() {
    let home = TempDir::new().expect("home");
    csync_cmd(home.path())
        .args(["bookmark", "update", "nas"])
        .assert()
        .failure()
        .stderr(contains("nothing to update"));
}
