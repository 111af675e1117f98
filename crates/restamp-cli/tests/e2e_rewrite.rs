//! E2E tests for `restamp rewrite`, `verify` and `info` on real repositories.

use assert_cmd::Command;
use git2::{Oid, Repository};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn restamp(dir: &Path, home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("restamp"));
    cmd.current_dir(dir);
    cmd.env("RESTAMP_LOG", "error");
    cmd.env("XDG_CONFIG_HOME", home);
    cmd.env("HOME", home);
    cmd.env_remove("RESTAMP_TIMING");
    cmd
}

fn commit(repo: &Repository, secs: i64, parents: &[Oid], msg: &str) -> Oid {
    let sig = git2::Signature::new("Before", "before@example.com", &git2::Time::new(secs, 0))
        .unwrap();
    let blob = repo.blob(msg.as_bytes()).unwrap();
    let mut builder = repo.treebuilder(None).unwrap();
    builder.insert("notes.txt", blob, 0o100_644).unwrap();
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();
    let parents: Vec<git2::Commit<'_>> =
        parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(Some("refs/heads/master"), &sig, &sig, msg, &tree, &parent_refs)
        .unwrap()
}

/// Three commits on master whose dates run backwards.
fn scrambled_repo(dir: &Path) -> Vec<Oid> {
    let repo = Repository::init(dir).unwrap();
    let a = commit(&repo, 3_000, &[], "first\n");
    let b = commit(&repo, 2_000, &[a], "second\n");
    let c = commit(&repo, 1_000, &[b], "third\n");
    repo.set_head("refs/heads/master").unwrap();
    vec![a, b, c]
}

struct Fixture {
    _root: TempDir,
    home: std::path::PathBuf,
    repo: std::path::PathBuf,
}

fn fixture() -> (Fixture, Vec<Oid>) {
    let root = TempDir::new().unwrap();
    let home = root.path().join("home");
    let repo = root.path().join("repo");
    fs::create_dir_all(&home).unwrap();
    fs::create_dir_all(&repo).unwrap();
    let oids = scrambled_repo(&repo);
    (
        Fixture {
            _root: root,
            home,
            repo,
        },
        oids,
    )
}

const WINDOW: [&str; 4] = [
    "--since",
    "2020-01-01T00:00:00Z",
    "--until",
    "2021-01-01T00:00:00Z",
];

fn tip(repo: &Path, name: &str) -> Option<Oid> {
    Repository::open(repo)
        .unwrap()
        .find_reference(name)
        .ok()
        .and_then(|r| r.target())
}

#[test]
fn verify_flags_backwards_history() {
    let (fx, _) = fixture();
    restamp(&fx.repo, &fx.home)
        .args(["verify"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("is not after parent"))
        .stderr(predicate::str::contains("chronology violations"));
}

#[test]
fn rewrite_fixes_chronology_and_identity() {
    let (fx, oids) = fixture();

    let output = restamp(&fx.repo, &fx.home)
        .args([
            "--json",
            "rewrite",
            "--author",
            "After <after@example.com>",
            "--date-mode",
            "randomize",
            "--seed",
            "42",
        ])
        .args(WINDOW)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "rewrite failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: Value = serde_json::from_slice(&output.stdout).expect("rewrite --json must parse");
    assert_eq!(json["failed"], 0);
    let outcome = &json["repos"][0]["outcome"];
    assert_eq!(outcome["seed"], 42);
    assert_eq!(outcome["date_mode"], "randomize");
    assert_eq!(outcome["commits"], 3);
    assert_eq!(outcome["changed"], 3);
    assert_eq!(outcome["applied"], true);

    let new_tip = tip(&fx.repo, "refs/heads/master").unwrap();
    assert_ne!(new_tip, oids[2]);
    let repo = Repository::open(&fx.repo).unwrap();
    let head = repo.find_commit(new_tip).unwrap();
    assert_eq!(head.author().name(), Some("After"));
    assert_eq!(head.committer().email(), Some("after@example.com"));
    assert!(head.time().seconds() >= 1_577_836_800);

    restamp(&fx.repo, &fx.home)
        .args(["verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 commits in chronological order"));
}

#[test]
fn same_seed_gives_same_ids_on_copies() {
    let (first, _) = fixture();
    let (second, _) = fixture();
    for fx in [&first, &second] {
        restamp(&fx.repo, &fx.home)
            .args(["rewrite", "--date-mode", "distribute", "--seed", "7"])
            .args(WINDOW)
            .assert()
            .success();
    }
    assert_eq!(
        tip(&first.repo, "refs/heads/master"),
        tip(&second.repo, "refs/heads/master")
    );
}

#[test]
fn dry_run_reports_plan_and_writes_nothing() {
    let (fx, oids) = fixture();
    restamp(&fx.repo, &fx.home)
        .args(["rewrite", "--dry-run", "--date-mode", "randomize", "--seed", "1"])
        .args(WINDOW)
        .assert()
        .success()
        .stdout(predicate::str::contains("planned (dry run)"))
        .stdout(predicate::str::is_match(r"seed:\s+1\n").unwrap());
    assert_eq!(tip(&fx.repo, "refs/heads/master"), Some(oids[2]));
}

#[test]
fn rename_branch_moves_head() {
    let (fx, _) = fixture();
    restamp(&fx.repo, &fx.home)
        .args(["rewrite", "--rename-branch", "master=main", "--seed", "3"])
        .args(["--date-mode", "randomize"])
        .args(WINDOW)
        .assert()
        .success()
        .stdout(predicate::str::contains("master -> main"));

    assert_eq!(tip(&fx.repo, "refs/heads/master"), None);
    assert!(tip(&fx.repo, "refs/heads/main").is_some());
    let repo = Repository::open(&fx.repo).unwrap();
    assert_eq!(
        repo.find_reference("HEAD").unwrap().symbolic_target(),
        Some("refs/heads/main")
    );
}

#[test]
fn config_file_supplies_settings_and_flags_override() {
    let (fx, _) = fixture();
    let config = fx.repo.join("restamp.toml");
    fs::write(
        &config,
        r#"
author = "From Config <config@example.com>"
date_mode = "randomize"
seed = 5
since = "2020-01-01T00:00:00Z"
until = "2021-01-01T00:00:00Z"
"#,
    )
    .unwrap();

    let output = restamp(&fx.repo, &fx.home)
        .args(["--json", "--config", "restamp.toml", "rewrite", "--seed", "6"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["repos"][0]["outcome"]["seed"], 6);

    let repo = Repository::open(&fx.repo).unwrap();
    let head = repo
        .find_commit(tip(&fx.repo, "refs/heads/master").unwrap())
        .unwrap();
    assert_eq!(head.author().name(), Some("From Config"));
}

#[test]
fn user_config_is_read_from_config_home() {
    let (fx, _) = fixture();
    let dir = fx.home.join("restamp");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("config.toml"),
        "committer = \"User Level <user@example.com>\"\n",
    )
    .unwrap();

    restamp(&fx.repo, &fx.home)
        .args(["rewrite"])
        .assert()
        .success();

    let repo = Repository::open(&fx.repo).unwrap();
    let head = repo
        .find_commit(tip(&fx.repo, "refs/heads/master").unwrap())
        .unwrap();
    assert_eq!(head.committer().name(), Some("User Level"));
    assert_eq!(head.author().name(), Some("Before"));
}

#[test]
fn invalid_identity_is_a_coded_error() {
    let (fx, oids) = fixture();
    let output = restamp(&fx.repo, &fx.home)
        .args(["--json", "rewrite", "--author", "no brackets here"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let err: Value = serde_json::from_slice(&output.stderr).expect("error must be JSON");
    assert_eq!(err["error"]["error_code"], "E1002");
    assert!(err["error"]["hint"].is_string());
    assert_eq!(tip(&fx.repo, "refs/heads/master"), Some(oids[2]));
}

#[test]
fn one_bad_repository_fails_the_batch_but_not_the_others() {
    let (fx, oids) = fixture();
    let missing = fx.home.join("not-a-repo");
    fs::create_dir_all(&missing).unwrap();

    let output = restamp(&fx.repo, &fx.home)
        .args(["--json", "rewrite", "--repo", "."])
        .arg("--repo")
        .arg(&missing)
        .args(["--author", "After <after@example.com>"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["failed"], 1);
    assert_eq!(json["repos"][0]["outcome"]["applied"], true);
    assert!(json["repos"][1]["error"]["message"].is_string());
    assert_ne!(tip(&fx.repo, "refs/heads/master"), Some(oids[2]));
}

#[test]
fn info_lists_branches() {
    let (fx, _) = fixture();
    let output = restamp(&fx.repo, &fx.home)
        .args(["info", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["head"], "master");
    assert_eq!(json["commits"], 3);
    assert_eq!(json["branches"][0]["name"], "master");
    assert_eq!(json["branches"][0]["is_head"], true);
}

#[test]
fn timing_report_goes_to_stderr() {
    let (fx, _) = fixture();
    restamp(&fx.repo, &fx.home)
        .args(["--timing", "rewrite", "--dry-run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("timing report"))
        .stderr(predicate::str::contains("cmd.rewrite"));
}
