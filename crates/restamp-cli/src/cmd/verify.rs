use anyhow::{Context as _, Result, bail};
use clap::Args;
use restamp_core::GitBackend;
use restamp_core::pipeline::ChronologyReport;
use restamp_core::verify_chronology;
use std::io::{self, Write};
use std::path::Path;

use super::RepoArg;
use crate::output::{self, OutputMode};

/// Arguments for `restamp verify`.
#[derive(Args, Debug, Default)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub repo: RepoArg,
}

/// Report every commit that is not strictly later than one of its parents.
///
/// # Errors
///
/// Fails if the history cannot be read, or after reporting when any
/// violation was found.
pub fn run_verify(args: &VerifyArgs, output: OutputMode, cwd: &Path) -> Result<()> {
    let path = args.repo.resolve(cwd);
    let backend = GitBackend::open(&path)
        .with_context(|| format!("Failed to open repository at {}", path.display()))?;
    let report = verify_chronology(&backend)?;
    output::render(output, &report, render_human)?;

    if !report.is_clean() {
        bail!(
            "{} chronology violations in {}",
            report.violations.len(),
            path.display()
        );
    }
    Ok(())
}

fn render_human(report: &ChronologyReport, w: &mut dyn Write) -> io::Result<()> {
    if report.is_clean() {
        return writeln!(w, "ok: {} commits in chronological order", report.commits);
    }
    for violation in &report.violations {
        writeln!(
            w,
            "{} at {} is not after parent {} at {}",
            violation.commit.short(),
            violation.commit_time,
            violation.parent.short(),
            violation.parent_time
        )?;
    }
    writeln!(
        w,
        "{} of {} commits checked have violations",
        report.violations.len(),
        report.commits
    )
}
