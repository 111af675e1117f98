pub mod completions;
pub mod info;
pub mod push;
pub mod remote;
pub mod rewrite;
pub mod verify;

use clap::Args;
use std::path::{Path, PathBuf};

/// `--repo` for commands that act on a single repository.
#[derive(Args, Debug, Clone, Default)]
pub struct RepoArg {
    /// Repository to operate on (defaults to the current directory).
    #[arg(long = "repo", value_name = "PATH")]
    pub repo: Option<PathBuf>,
}

impl RepoArg {
    /// The repository path, resolved against `cwd`.
    pub fn resolve(&self, cwd: &Path) -> PathBuf {
        self.repo
            .as_ref()
            .map_or_else(|| cwd.to_path_buf(), |path| cwd.join(path))
    }
}
