use anyhow::{Context as _, Result};
use clap::Args;
use restamp_core::GitBackend;
use restamp_core::backend::git::RepoSummary;
use std::io::{self, Write};
use std::path::Path;

use super::RepoArg;
use crate::output::{self, OutputMode};

/// Arguments for `restamp info`.
#[derive(Args, Debug, Default)]
pub struct InfoArgs {
    #[command(flatten)]
    pub repo: RepoArg,
}

/// Print branches, tags, remotes and history size.
///
/// # Errors
///
/// Fails if the repository cannot be opened or read.
pub fn run_info(args: &InfoArgs, output: OutputMode, cwd: &Path) -> Result<()> {
    let path = args.repo.resolve(cwd);
    let backend = GitBackend::open(&path)
        .with_context(|| format!("Failed to open repository at {}", path.display()))?;
    let summary = backend.summary()?;
    output::render(output, &summary, render_human)
}

fn render_human(summary: &RepoSummary, w: &mut dyn Write) -> io::Result<()> {
    output::section(w, &summary.path.display().to_string())?;
    output::kv(w, "head", summary.head.as_deref().unwrap_or("(detached)"))?;
    output::kv(w, "commits", summary.commits.to_string())?;
    output::kv(w, "tags", summary.tags.len().to_string())?;

    writeln!(w, "branches:")?;
    for branch in &summary.branches {
        let marker = if branch.is_head { "*" } else { " " };
        writeln!(w, "  {marker} {:<30} {}", branch.name, branch.target.short())?;
    }

    if !summary.remotes.is_empty() {
        writeln!(w, "remotes:")?;
        for remote in &summary.remotes {
            writeln!(
                w,
                "    {:<30} {}",
                remote.name,
                remote.url.as_deref().unwrap_or("(no url)")
            )?;
        }
    }
    Ok(())
}
