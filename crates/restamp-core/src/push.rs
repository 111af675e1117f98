//! Push collaborator: transmits rewritten references to a remote.
//!
//! Rewritten history is never a fast-forward of what the remote holds, so
//! every refspec is forced. A failed push leaves the local rewrite intact;
//! pushing the same updates again is idempotent.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;
use tracing::{debug, info};

use crate::refs::RefUpdate;

/// The remote refused the push, or `git` could not be run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("push to {remote} rejected: {reason}")]
pub struct PushRejectedError {
    /// Remote name or URL.
    pub remote: String,
    /// Output from the transport, trimmed.
    pub reason: String,
}

/// What a successful push transmitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub remote: String,
    pub refspecs: Vec<String>,
}

/// Something that can publish reference updates to a remote.
pub trait Pusher {
    /// Force every update onto `remote`. Renamed references also delete
    /// their old name there.
    ///
    /// # Errors
    ///
    /// Returns [`PushRejectedError`] if the remote refuses any refspec.
    fn push(&self, remote: &str, updates: &[RefUpdate]) -> Result<PushReport, PushRejectedError>;
}

/// Forced refspecs for a batch of applied updates.
///
/// `+<new>:<final name>` per update, then `:<old name>` per rename. Only
/// full `refs/` names are published; a detached `HEAD` stays local.
#[must_use]
pub fn refspecs(updates: &[RefUpdate]) -> Vec<String> {
    let publishable = || {
        updates
            .iter()
            .filter(|update| update.final_name().starts_with("refs/"))
    };
    let mut specs: Vec<String> = publishable()
        .map(|update| format!("+{}:{}", update.new_target, update.final_name()))
        .collect();
    specs.extend(
        publishable()
            .filter(|update| update.new_name.is_some() && update.name.starts_with("refs/"))
            .map(|update| format!(":{}", update.name)),
    );
    specs
}

/// [`Pusher`] that shells out to `git push` in a repository directory.
#[derive(Debug, Clone)]
pub struct GitCliPusher {
    repo_dir: PathBuf,
}

impl GitCliPusher {
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    /// Working directory `git` runs in.
    #[must_use]
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Force-push every local branch and tag to `remote`.
    ///
    /// Used to re-publish after an earlier push failed.
    ///
    /// # Errors
    ///
    /// Returns [`PushRejectedError`] if either push is refused.
    pub fn push_all(&self, remote: &str) -> Result<PushReport, PushRejectedError> {
        let specs = vec![
            "+refs/heads/*:refs/heads/*".to_string(),
            "+refs/tags/*:refs/tags/*".to_string(),
        ];
        self.run_push(remote, &specs)?;
        info!(remote, "pushed all branches and tags");
        Ok(PushReport {
            remote: remote.to_string(),
            refspecs: specs,
        })
    }

    fn run_push(&self, remote: &str, specs: &[String]) -> Result<(), PushRejectedError> {
        debug!(remote, refspecs = specs.len(), dir = %self.repo_dir.display(), "git push");
        let output = Command::new("git")
            .arg("push")
            .arg("--force")
            .arg("--porcelain")
            .arg(remote)
            .args(specs)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| PushRejectedError {
                remote: remote.to_string(),
                reason: format!("failed to spawn git push: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let reason = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(PushRejectedError {
                remote: remote.to_string(),
                reason,
            });
        }
        Ok(())
    }
}

impl Pusher for GitCliPusher {
    fn push(&self, remote: &str, updates: &[RefUpdate]) -> Result<PushReport, PushRejectedError> {
        let specs = refspecs(updates);
        if specs.is_empty() {
            return Ok(PushReport {
                remote: remote.to_string(),
                refspecs: specs,
            });
        }
        self.run_push(remote, &specs)?;
        info!(remote, refspecs = specs.len(), "pushed rewritten references");
        Ok(PushReport {
            remote: remote.to_string(),
            refspecs: specs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectId;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; ObjectId::LEN])
    }

    #[test]
    fn refspecs_force_targets_and_delete_old_names() {
        let updates = vec![
            RefUpdate::new("refs/heads/master", oid(1), oid(2)).renamed_to("refs/heads/main"),
            RefUpdate::new("refs/tags/v1", oid(3), oid(4)),
        ];
        let specs = refspecs(&updates);
        assert_eq!(
            specs,
            vec![
                format!("+{}:refs/heads/main", oid(2)),
                format!("+{}:refs/tags/v1", oid(4)),
                ":refs/heads/master".to_string(),
            ]
        );
    }

    #[test]
    fn detached_head_is_not_published() {
        let updates = vec![
            RefUpdate::new("HEAD", oid(1), oid(2)),
            RefUpdate::new("refs/heads/main", oid(1), oid(2)),
        ];
        assert_eq!(refspecs(&updates), vec![format!("+{}:refs/heads/main", oid(2))]);
    }

    #[test]
    fn head_only_batch_pushes_nothing() {
        // Nothing publishable, so git is never spawned in the missing directory.
        let pusher = GitCliPusher::new("/nonexistent/restamp-push-test");
        let updates = vec![RefUpdate::new("HEAD", oid(1), oid(2))];
        let report = pusher.push("origin", &updates).unwrap();
        assert!(report.refspecs.is_empty());
    }

    #[test]
    fn empty_batch_pushes_nothing() {
        // The directory does not exist; git must not be spawned.
        let pusher = GitCliPusher::new("/nonexistent/restamp-push-test");
        let report = pusher.push("origin", &[]).unwrap();
        assert!(report.refspecs.is_empty());
        assert_eq!(report.remote, "origin");
    }

    #[test]
    fn spawn_failure_is_a_rejection() {
        let pusher = GitCliPusher::new("/nonexistent/restamp-push-test");
        let updates = vec![RefUpdate::new("refs/heads/main", oid(1), oid(2))];
        let err = pusher.push("origin", &updates).unwrap_err();
        assert_eq!(err.remote, "origin");
    }
}
