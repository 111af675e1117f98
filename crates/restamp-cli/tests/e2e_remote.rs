//! E2E tests for `restamp remote`, `push` and `rewrite --push`.

use assert_cmd::Command;
use git2::{Oid, Repository};
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn restamp(dir: &Path, home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("restamp"));
    cmd.current_dir(dir);
    cmd.env("RESTAMP_LOG", "error");
    cmd.env("XDG_CONFIG_HOME", home);
    cmd.env("HOME", home);
    cmd
}

fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn seed_repo(dir: &Path) -> Oid {
    let repo = Repository::init(dir).unwrap();
    let sig =
        git2::Signature::new("Pusher", "pusher@example.com", &git2::Time::new(1_000, 0)).unwrap();
    let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let oid = repo
        .commit(Some("refs/heads/main"), &sig, &sig, "only\n", &tree, &[])
        .unwrap();
    repo.set_head("refs/heads/main").unwrap();
    oid
}

fn remote_tip(remote: &Path, name: &str) -> Option<Oid> {
    Repository::open_bare(remote)
        .unwrap()
        .find_reference(name)
        .ok()
        .and_then(|r| r.target())
}

#[test]
fn remote_is_added_then_updated() {
    let root = TempDir::new().unwrap();
    let repo = root.path().join("work");
    std::fs::create_dir_all(&repo).unwrap();
    seed_repo(&repo);

    restamp(&repo, root.path())
        .args(["remote", "--name", "origin", "--url", "https://example.com/a.git"])
        .assert()
        .success()
        .stdout(predicate::str::contains("remote origin added"));

    let output = restamp(&repo, root.path())
        .args(["--json", "remote", "--name", "origin", "--url", "https://example.com/b.git"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["change"], "updated");

    let git = Repository::open(&repo).unwrap();
    assert_eq!(
        git.find_remote("origin").unwrap().url(),
        Some("https://example.com/b.git")
    );
}

#[test]
fn rewrite_then_push_updates_the_remote() {
    if !git_available() {
        eprintln!("skipping: git binary not found");
        return;
    }
    let root = TempDir::new().unwrap();
    let repo = root.path().join("work");
    let bare = root.path().join("remote.git");
    std::fs::create_dir_all(&repo).unwrap();
    seed_repo(&repo);
    Repository::init_bare(&bare).unwrap();

    restamp(&repo, root.path())
        .args(["remote", "--name", "origin", "--url"])
        .arg(&bare)
        .assert()
        .success();

    let output = restamp(&repo, root.path())
        .args([
            "--json",
            "rewrite",
            "--author",
            "Pushed <pushed@example.com>",
            "--push",
            "origin",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "rewrite --push failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["repos"][0]["push"]["remote"], "origin");

    let local = Repository::open(&repo)
        .unwrap()
        .find_reference("refs/heads/main")
        .unwrap()
        .target();
    assert_eq!(remote_tip(&bare, "refs/heads/main"), local);

    // Re-publishing the same state is idempotent.
    restamp(&repo, root.path())
        .args(["push", "--remote", "origin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+refs/heads/*:refs/heads/*"));
    assert_eq!(remote_tip(&bare, "refs/heads/main"), local);
}

#[test]
fn rewrite_with_detached_head_still_pushes_branches() {
    if !git_available() {
        eprintln!("skipping: git binary not found");
        return;
    }
    let root = TempDir::new().unwrap();
    let repo = root.path().join("work");
    let bare = root.path().join("remote.git");
    std::fs::create_dir_all(&repo).unwrap();
    let original = seed_repo(&repo);
    Repository::open(&repo)
        .unwrap()
        .set_head_detached(original)
        .unwrap();
    Repository::init_bare(&bare).unwrap();

    restamp(&repo, root.path())
        .args(["remote", "--name", "origin", "--url"])
        .arg(&bare)
        .assert()
        .success();

    let output = restamp(&repo, root.path())
        .args([
            "--json",
            "rewrite",
            "--author",
            "Detached <detached@example.com>",
            "--push",
            "origin",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "rewrite --push failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    let refspecs = json["repos"][0]["push"]["refspecs"].as_array().unwrap();
    assert!(refspecs.iter().all(|spec| spec.as_str().unwrap().contains(":refs/")));

    let git = Repository::open(&repo).unwrap();
    let local = git.find_reference("refs/heads/main").unwrap().target();
    assert_ne!(local, Some(original));
    assert_eq!(git.head().unwrap().target(), local);
    assert_eq!(remote_tip(&bare, "refs/heads/main"), local);
}

#[test]
fn push_to_unknown_remote_keeps_local_rewrite() {
    if !git_available() {
        eprintln!("skipping: git binary not found");
        return;
    }
    let root = TempDir::new().unwrap();
    let repo = root.path().join("work");
    std::fs::create_dir_all(&repo).unwrap();
    let original = seed_repo(&repo);

    let output = restamp(&repo, root.path())
        .args([
            "--json",
            "rewrite",
            "--author",
            "Local <local@example.com>",
            "--push",
            "nowhere",
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    let report = &json["repos"][0];
    assert_eq!(report["outcome"]["applied"], true);
    assert_eq!(report["error"]["error_code"], "E5001");
    assert_eq!(report["error"]["retryable"], true);

    let local = Repository::open(&repo)
        .unwrap()
        .find_reference("refs/heads/main")
        .unwrap()
        .target();
    assert_ne!(local, Some(original));
}

#[test]
fn push_failure_has_code() {
    if !git_available() {
        eprintln!("skipping: git binary not found");
        return;
    }
    let root = TempDir::new().unwrap();
    let repo = root.path().join("work");
    std::fs::create_dir_all(&repo).unwrap();
    seed_repo(&repo);

    restamp(&repo, root.path())
        .args(["push", "--remote", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E5001]"));
}
