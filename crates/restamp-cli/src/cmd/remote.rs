use anyhow::{Context as _, Result};
use clap::Args;
use restamp_core::GitBackend;
use restamp_core::backend::git::RemoteChange;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use super::RepoArg;
use crate::output::{self, OutputMode};

/// Arguments for `restamp remote`.
#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// Remote name.
    #[arg(long)]
    pub name: String,

    /// Remote URL.
    #[arg(long)]
    pub url: String,

    #[command(flatten)]
    pub repo: RepoArg,
}

#[derive(Debug, Serialize)]
struct RemoteResult<'a> {
    name: &'a str,
    url: &'a str,
    change: RemoteChange,
}

/// Add the remote, or point an existing one at the new URL.
///
/// # Errors
///
/// Fails if the repository cannot be opened or git rejects the remote.
pub fn run_remote(args: &RemoteArgs, output: OutputMode, cwd: &Path) -> Result<()> {
    let path = args.repo.resolve(cwd);
    let backend = GitBackend::open(&path)
        .with_context(|| format!("Failed to open repository at {}", path.display()))?;
    let change = backend
        .configure_remote(&args.name, &args.url)
        .with_context(|| format!("Failed to configure remote '{}'", args.name))?;

    let result = RemoteResult {
        name: &args.name,
        url: &args.url,
        change,
    };
    output::render(output, &result, |result, w| {
        let verb = match result.change {
            RemoteChange::Added => "added",
            RemoteChange::Updated => "updated",
            RemoteChange::Unchanged => "unchanged",
        };
        writeln!(w, "remote {} {verb}: {}", result.name, result.url)
    })
}
