//! `restamp rewrite`: one pass per repository, optional push afterwards.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use restamp_core::config::{FileConfig, resolve_config};
use restamp_core::lock::DEFAULT_LOCK_TIMEOUT;
use restamp_core::push::{GitCliPusher, PushReport, Pusher};
use restamp_core::refs::display_name;
use restamp_core::{
    CancelToken, DateMode, GitBackend, RestampError, RewriteOutcome, RewriteRequest,
    run_rewrite as run_pass,
};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::output::{self, CliError, OutputMode};

#[derive(Args, Debug, Clone, Default)]
pub struct RewriteArgs {
    /// Repository to rewrite. Repeat for several; defaults to the current directory.
    #[arg(long = "repo", value_name = "PATH")]
    pub repos: Vec<PathBuf>,

    /// Replace every author (and committer, unless --committer is given).
    #[arg(long, value_name = "NAME <EMAIL>")]
    pub author: Option<String>,

    /// Replace every committer.
    #[arg(long, value_name = "NAME <EMAIL>")]
    pub committer: Option<String>,

    /// Map one original email to a new identity.
    #[arg(long = "identity", value_name = "EMAIL=NAME <EMAIL>", value_parser = parse_pair)]
    pub identities: Vec<(String, String)>,

    /// preserve, randomize or distribute.
    #[arg(long, value_name = "MODE")]
    pub date_mode: Option<DateMode>,

    /// Seed for the date generator; reported after every run.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Start of the date window (RFC 3339).
    #[arg(long, value_name = "TIME")]
    pub since: Option<String>,

    /// End of the date window (RFC 3339). Defaults to now.
    #[arg(long, value_name = "TIME")]
    pub until: Option<String>,

    /// Rename a branch as part of the reference batch.
    #[arg(long = "rename-branch", value_name = "OLD=NEW", value_parser = parse_pair)]
    pub rename_branches: Vec<(String, String)>,

    /// Plan the rewrite and report it without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Force-push the rewritten references to this remote afterwards.
    #[arg(long, value_name = "REMOTE")]
    pub push: Option<String>,

    /// How long to wait for another restamp process, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub lock_timeout_ms: Option<u64>,
}

impl RewriteArgs {
    /// The command line as the topmost config layer.
    pub fn to_file_config(&self) -> FileConfig {
        FileConfig {
            author: self.author.clone(),
            committer: self.committer.clone(),
            date_mode: self.date_mode,
            seed: self.seed,
            since: self.since.clone(),
            until: self.until.clone(),
            identities: self.identities.iter().cloned().collect(),
            rename_branches: self.rename_branches.iter().cloned().collect(),
            push_remote: self.push.clone(),
        }
    }

    fn lock_timeout(&self) -> Duration {
        self.lock_timeout_ms
            .map_or(DEFAULT_LOCK_TIMEOUT, Duration::from_millis)
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((left, right)) if !left.trim().is_empty() && !right.trim().is_empty() => {
            Ok((left.trim().to_string(), right.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Per-repository result.
#[derive(Debug, Serialize)]
pub struct RepoReport {
    pub repo: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RewriteOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<PushReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

impl RepoReport {
    const fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything `restamp rewrite` did.
#[derive(Debug, Serialize)]
pub struct RewriteReport {
    pub repos: Vec<RepoReport>,
    pub failed: usize,
}

/// Run the pass over every requested repository.
///
/// A failure in one repository does not stop the others.
///
/// # Errors
///
/// Fails if configuration cannot be resolved, or after reporting if any
/// repository failed.
pub fn run_rewrite(
    args: &RewriteArgs,
    config_path: Option<&Path>,
    output: OutputMode,
    cwd: &Path,
) -> Result<()> {
    let explicit = config_path.map(|path| cwd.join(path));
    let config = resolve_config(explicit.as_deref(), args.to_file_config())?;
    let request = config.to_request(args.dry_run)?;
    let remote = config.push_remote.clone();

    let repos = if args.repos.is_empty() {
        vec![cwd.to_path_buf()]
    } else {
        args.repos.iter().map(|repo| cwd.join(repo)).collect()
    };

    let cancel = CancelToken::new();
    let mut reports = Vec::with_capacity(repos.len());
    for repo in repos {
        let report = rewrite_repo(
            &repo,
            &request,
            remote.as_deref(),
            args.lock_timeout(),
            &cancel,
        );
        if let Some(error) = &report.error {
            warn!(repo = %repo.display(), error = %error.message, "repository failed");
        }
        reports.push(report);
    }

    let failed = reports.iter().filter(|r| r.failed()).count();
    let report = RewriteReport {
        repos: reports,
        failed,
    };
    output::render(output, &report, |report, w| render_human(report, w))?;

    if failed > 0 {
        bail!("{failed} of {} repositories failed", report.repos.len());
    }
    Ok(())
}

fn rewrite_repo(
    repo: &Path,
    request: &RewriteRequest,
    remote: Option<&str>,
    lock_timeout: Duration,
    cancel: &CancelToken,
) -> RepoReport {
    let mut report = RepoReport {
        repo: repo.to_path_buf(),
        outcome: None,
        push: None,
        error: None,
    };

    let outcome = match rewrite_locked(repo, request, lock_timeout, cancel) {
        Ok(outcome) => outcome,
        Err(err) => {
            report.error = Some(CliError::from(&err));
            return report;
        }
    };

    if let Some(remote) = remote
        && outcome.applied
    {
        let pusher = GitCliPusher::new(repo);
        match pusher.push(remote, &outcome.updates) {
            Ok(pushed) => report.push = Some(pushed),
            Err(e) => {
                let err = anyhow::Error::new(RestampError::Push(e));
                report.error = Some(CliError::from(&err));
            }
        }
    }
    report.outcome = Some(outcome);
    report
}

fn rewrite_locked(
    repo: &Path,
    request: &RewriteRequest,
    lock_timeout: Duration,
    cancel: &CancelToken,
) -> Result<RewriteOutcome> {
    let mut backend = GitBackend::open(repo)
        .with_context(|| format!("Failed to open repository at {}", repo.display()))?;
    let lock = backend.lock(lock_timeout)?;

    let outcome = run_pass(&mut backend, request, cancel)
        .with_context(|| format!("Rewrite of {} failed", backend.root().display()))?;
    lock.release();

    info!(
        repo = %repo.display(),
        changed = outcome.changed,
        applied = outcome.applied,
        "repository done"
    );
    Ok(outcome)
}

fn render_human(report: &RewriteReport, w: &mut dyn Write) -> io::Result<()> {
    for repo in &report.repos {
        output::section(w, &repo.repo.display().to_string())?;
        if let Some(outcome) = &repo.outcome {
            let verb = if outcome.applied {
                "rewritten"
            } else {
                "planned (dry run)"
            };
            output::kv(w, "status", verb)?;
            output::kv(w, "commits", format!("{} ({} changed)", outcome.commits, outcome.changed))?;
            output::kv(w, "date mode", outcome.date_mode.to_string())?;
            output::kv(w, "seed", outcome.seed.to_string())?;
            for update in &outcome.updates {
                writeln!(
                    w,
                    "  {:<30} {} -> {}",
                    display_name(update),
                    update.expected.short(),
                    update.new_target.short()
                )?;
            }
        }
        if let Some(push) = &repo.push {
            output::kv(w, "pushed", format!("{} ({} refspecs)", push.remote, push.refspecs.len()))?;
        }
        if let Some(error) = &repo.error {
            output::kv(w, "error", &error.message)?;
            if let Some(hint) = &error.hint {
                output::kv(w, "hint", hint)?;
            }
        }
        writeln!(w)?;
    }
    if report.failed > 0 {
        writeln!(w, "{} of {} repositories failed", report.failed, report.repos.len())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parser_splits_on_first_equals() {
        assert_eq!(
            parse_pair("old@example.com=New <new@example.com>"),
            Ok(("old@example.com".into(), "New <new@example.com>".into()))
        );
        assert_eq!(parse_pair(" master = main "), Ok(("master".into(), "main".into())));
        assert!(parse_pair("main").is_err());
        assert!(parse_pair("=main").is_err());
    }

    #[test]
    fn cli_layer_carries_every_flag() {
        let args = RewriteArgs {
            author: Some("A <a@example.com>".into()),
            date_mode: Some(DateMode::RandomizeChronological),
            seed: Some(9),
            identities: vec![("x@example.com".into(), "X <x@example.com>".into())],
            rename_branches: vec![("master".into(), "main".into())],
            push: Some("origin".into()),
            ..RewriteArgs::default()
        };
        let layer = args.to_file_config();
        assert_eq!(layer.seed, Some(9));
        assert_eq!(layer.rename_branches["master"], "main");
        assert_eq!(layer.identities.len(), 1);
        assert_eq!(layer.push_remote.as_deref(), Some("origin"));
    }

    #[test]
    fn lock_timeout_defaults() {
        assert_eq!(RewriteArgs::default().lock_timeout(), DEFAULT_LOCK_TIMEOUT);
        let args = RewriteArgs {
            lock_timeout_ms: Some(250),
            ..RewriteArgs::default()
        };
        assert_eq!(args.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn missing_repository_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let report = rewrite_repo(
            &dir.path().join("nope"),
            &RewriteRequest::default(),
            None,
            DEFAULT_LOCK_TIMEOUT,
            &CancelToken::new(),
        );
        assert!(report.failed());
        assert!(report.outcome.is_none());
        assert_eq!(report.error.unwrap().error_code.as_deref(), Some("E3002"));
    }
}
