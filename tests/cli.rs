use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

use gradebook::{AuthService, Permission, SledStore};

fn admin(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gradebook-admin").unwrap();
    cmd.arg("--data-dir").arg(dir.path());
    cmd
}

#[test]
fn cli_no_args() {
    Command::cargo_bin("gradebook-admin")
        .unwrap()
        .assert()
        .failure();
}

#[test]
fn cli_version() {
    Command::cargo_bin("gradebook-server")
        .unwrap()
        .args(["-V"])
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn add_account_then_list() {
    let dir = TempDir::new().unwrap();
    admin(&dir)
        .args(["add-account", "alice", "pw", "--role", "admin"])
        .assert()
        .success()
        .stdout(contains("Added alice (admin)"));
    admin(&dir)
        .args(["add-account", "bob", "pw"])
        .assert()
        .success();

    admin(&dir)
        .arg("list-accounts")
        .assert()
        .success()
        .stdout(contains("alice\tadmin").and(contains("bob\tuser")))
        .stdout(contains("pw").not());
}

#[test]
fn passwd_updates_hash() {
    let dir = TempDir::new().unwrap();
    admin(&dir)
        .args(["add-account", "carol", "old"])
        .assert()
        .success();
    admin(&dir)
        .args(["passwd", "carol", "new"])
        .assert()
        .success();

    let auth = AuthService::new(SledStore::open(dir.path()).unwrap());
    assert!(auth.authenticate("carol", "old").is_err());
    assert_eq!(
        auth.authenticate("carol", "new").unwrap().permission,
        Permission::User
    );
}

#[test]
fn passwd_for_missing_account_fails() {
    let dir = TempDir::new().unwrap();
    admin(&dir)
        .args(["passwd", "nobody", "pw"])
        .assert()
        .failure()
        .stderr(contains("Account not found: nobody"));
}

#[test]
fn invalid_role_is_rejected() {
    let dir = TempDir::new().unwrap();
    admin(&dir)
        .args(["add-account", "dave", "pw", "--role", "root"])
        .assert()
        .failure();
}

fn server_banner(extra: &[&str]) -> String {
    let output = assert_cmd::Command::cargo_bin("gradebook-server")
        .unwrap()
        .args(["--addr", "127.0.0.1:0", "--data-dir", ":memory:"])
        .args(extra)
        .env("RUST_LOG", "info")
        .timeout(Duration::from_secs(2))
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn open_server_warns_about_anonymous_writes() {
    let stderr = server_banner(&[]);
    assert!(stderr.contains("Anonymous requests may modify the roster"), "{stderr}");
}

#[test]
fn gated_server_does_not_warn() {
    let stderr = server_banner(&["--require-auth"]);
    assert!(stderr.contains("Credentials required on privileged requests"), "{stderr}");
    assert!(!stderr.contains("Anonymous requests"));
}
