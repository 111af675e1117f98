use anyhow::{Context as _, Result};
use clap::Args;
use restamp_core::push::GitCliPusher;
use restamp_core::{GitBackend, RestampError};
use std::io::Write;
use std::path::Path;

use super::RepoArg;
use crate::output::{self, OutputMode};

/// Arguments for `restamp push`.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Remote to force-push to.
    #[arg(long)]
    pub remote: String,

    #[command(flatten)]
    pub repo: RepoArg,
}

/// Force-push every local branch and tag.
///
/// # Errors
///
/// Fails with [`RestampError::Push`] if the remote refuses.
pub fn run_push(args: &PushArgs, output: OutputMode, cwd: &Path) -> Result<()> {
    let path = args.repo.resolve(cwd);
    let backend = GitBackend::open(&path)
        .with_context(|| format!("Failed to open repository at {}", path.display()))?;
    let pusher = GitCliPusher::new(backend.root());
    let report = pusher.push_all(&args.remote).map_err(RestampError::Push)?;

    output::render(output, &report, |report, w| {
        writeln!(w, "pushed to {}:", report.remote)?;
        for spec in &report.refspecs {
            writeln!(w, "  {spec}")?;
        }
        Ok(())
    })
}
