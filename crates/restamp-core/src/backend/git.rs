//! libgit2-backed object and reference store.
//!
//! Commits are read through `git2` and decoded into [`CommitData`]. New
//! commits are hashed with git's own object hash and written straight into
//! the object database, so they stay unreachable until the reference batch
//! moves onto them.
//!
//! The reference batch runs inside one libgit2 transaction: every involved
//! reference is locked, its current value re-checked, then all writes are
//! queued and committed together. Dropping the transaction on any failure
//! releases the locks without writing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::{ErrorCode as GitErrorCode, ObjectType, Oid, ReferenceType, Repository};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{ObjectStore, RefStore, StoreError};
use crate::lock::{LOCK_FILE_NAME, LockError, RepoLock};
use crate::model::{CommitData, CommitNode, ObjectId, Reference, Signature, Timestamp};
use crate::refs::{RefUpdate, RefUpdateError};

/// Reflog message recorded for every moved reference.
pub const REFLOG_MESSAGE: &str = "restamp: rewrite";

/// Namespaces whose references describe someone else's state and are never
/// rewritten.
const FOREIGN_NAMESPACES: [&str; 2] = ["refs/remotes/", "refs/notes/"];

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// A local branch and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub target: ObjectId,
    pub is_head: bool,
}

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteInfo {
    pub name: String,
    pub url: Option<String>,
}

/// Overview of a repository, as printed by `restamp info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSummary {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branches: Vec<BranchInfo>,
    pub tags: Vec<String>,
    pub remotes: Vec<RemoteInfo>,
    /// Commits reachable from any rewritable reference.
    pub commits: usize,
}

/// What [`GitBackend::configure_remote`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteChange {
    Added,
    Updated,
    Unchanged,
}

// ---------------------------------------------------------------------------
// GitBackend
// ---------------------------------------------------------------------------

/// A git repository opened through libgit2.
pub struct GitBackend {
    repo: Repository,
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("git_dir", &self.repo.path())
            .finish()
    }
}

impl GitBackend {
    /// Open the repository containing `path`, searching upward.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Git`] if no repository is found.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let repo = Repository::discover(path)?;
        debug!(git_dir = %repo.path().display(), "opened repository");
        Ok(Self { repo })
    }

    /// Wrap an already opened repository.
    #[must_use]
    pub const fn from_repository(repo: Repository) -> Self {
        Self { repo }
    }

    /// The underlying libgit2 handle.
    #[must_use]
    pub const fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Working tree, or the git directory for a bare repository.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.repo.workdir().unwrap_or_else(|| self.repo.path())
    }

    /// Path of the advisory lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.repo.path().join(LOCK_FILE_NAME)
    }

    /// Take the advisory repository lock.
    ///
    /// # Errors
    ///
    /// See [`RepoLock::acquire`].
    pub fn lock(&self, timeout: Duration) -> Result<RepoLock, LockError> {
        RepoLock::acquire(&self.lock_path(), timeout)
    }

    /// Add remote `name` at `url`, or point an existing one at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Git`] if the name or URL is rejected.
    pub fn configure_remote(&self, name: &str, url: &str) -> Result<RemoteChange, StoreError> {
        let change = match self.repo.find_remote(name) {
            Ok(remote) if remote.url() == Some(url) => RemoteChange::Unchanged,
            Ok(_) => {
                self.repo.remote_set_url(name, url)?;
                RemoteChange::Updated
            }
            Err(e) if e.code() == GitErrorCode::NotFound => {
                self.repo.remote(name, url)?;
                RemoteChange::Added
            }
            Err(e) => return Err(e.into()),
        };
        info!(remote = name, url, ?change, "remote configured");
        Ok(change)
    }

    /// Summarize branches, tags, remotes and history size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if references or history cannot be read.
    pub fn summary(&self) -> Result<RepoSummary, StoreError> {
        let head = self.head_branch();

        let mut branches = Vec::new();
        let mut tags = Vec::new();
        let refs = self.references()?;
        for reference in &refs {
            if let Some(short) = reference.name.strip_prefix("refs/heads/") {
                branches.push(BranchInfo {
                    name: short.to_string(),
                    target: reference.target,
                    is_head: head.as_deref() == Some(reference.name.as_str()),
                });
            } else if let Some(short) = reference.name.strip_prefix("refs/tags/") {
                tags.push(short.to_string());
            }
        }

        let mut remotes = Vec::new();
        for name in self.repo.remotes()?.iter().flatten() {
            let url = self
                .repo
                .find_remote(name)
                .ok()
                .and_then(|remote| remote.url().map(str::to_string));
            remotes.push(RemoteInfo {
                name: name.to_string(),
                url,
            });
        }

        let mut walk = self.repo.revwalk()?;
        for reference in &refs {
            walk.push(to_oid(reference.target)?)?;
        }
        let mut commits = 0;
        for oid in walk {
            oid?;
            commits += 1;
        }

        Ok(RepoSummary {
            path: self.root().to_path_buf(),
            head: head.map(|name| crate::model::short_ref_name(&name).to_string()),
            branches,
            tags,
            remotes,
            commits,
        })
    }

    /// Full name of the branch `HEAD` points at, if `HEAD` is symbolic.
    #[must_use]
    pub fn head_branch(&self) -> Option<String> {
        let head = self.repo.find_reference("HEAD").ok()?;
        head.symbolic_target().map(str::to_string)
    }

    fn classify(&self, reference: &git2::Reference<'_>) -> Option<Reference> {
        let name = String::from_utf8_lossy(reference.name_bytes()).into_owned();

        if reference.kind() == Some(ReferenceType::Symbolic) {
            debug!(reference = %name, "skipping symbolic reference");
            return None;
        }
        if FOREIGN_NAMESPACES.iter().any(|ns| name.starts_with(ns)) {
            debug!(reference = %name, "skipping foreign namespace");
            return None;
        }
        let target = reference.target()?;

        match self.repo.find_object(target, None).map(|object| object.kind()) {
            Ok(Some(ObjectType::Commit)) => {}
            Ok(kind) => {
                warn!(reference = %name, ?kind, "skipping reference to non-commit object");
                return None;
            }
            Err(e) => {
                warn!(reference = %name, error = %e, "skipping dangling reference");
                return None;
            }
        }

        match to_object_id(target) {
            Ok(id) => Some(Reference::new(name, id)),
            Err(e) => {
                warn!(reference = %name, error = %e, "skipping reference");
                None
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        let reference = match self.repo.find_reference(name) {
            Ok(reference) => reference,
            Err(e) if e.code() == GitErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let target = match reference.target() {
            Some(oid) => Some(oid),
            None => reference.resolve()?.target(),
        };
        target.map(to_object_id).transpose()
    }

    fn move_head_after_rename(&self, updates: &[RefUpdate], head: Option<&str>) {
        let Some(head) = head else {
            return;
        };
        let Some(renamed) = updates
            .iter()
            .find(|update| update.new_name.is_some() && update.name == head)
        else {
            return;
        };
        if let Err(e) = self.repo.set_head(renamed.final_name()) {
            warn!(head, to = renamed.final_name(), error = %e, "could not repoint HEAD after rename");
        }
    }
}

impl ObjectStore for GitBackend {
    fn read_commit(&self, id: &ObjectId) -> Result<Option<CommitNode>, StoreError> {
        let object = match self.repo.find_object(to_oid(*id)?, None) {
            Ok(object) => object,
            Err(e) if e.code() == GitErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let commit = object
            .into_commit()
            .map_err(|_| StoreError::NotACommit { id: *id })?;

        let parents = commit
            .parent_ids()
            .map(to_object_id)
            .collect::<Result<Vec<_>, _>>()?;
        let author = commit.author();
        let committer = commit.committer();

        let data = CommitData {
            tree: to_object_id(commit.tree_id())?,
            parents,
            author: signature(&author),
            committer: signature(&committer),
            author_time: timestamp(author.when()),
            commit_time: timestamp(committer.when()),
            encoding: commit.message_encoding().map(str::to_string),
            message: commit.message_raw_bytes().to_vec(),
        };
        Ok(Some(CommitNode { id: *id, data }))
    }

    fn hash_commit(&self, data: &CommitData) -> Result<ObjectId, StoreError> {
        to_object_id(Oid::hash_object(ObjectType::Commit, &data.encode())?)
    }

    fn write_commit(&mut self, data: &CommitData) -> Result<ObjectId, StoreError> {
        let odb = self.repo.odb()?;
        to_object_id(odb.write(ObjectType::Commit, &data.encode())?)
    }
}

impl RefStore for GitBackend {
    fn references(&self) -> Result<Vec<Reference>, StoreError> {
        let mut out = Vec::new();
        for reference in self.repo.references()? {
            if let Some(reference) = self.classify(&reference?) {
                out.push(reference);
            }
        }
        if self.repo.head_detached().unwrap_or(false)
            && let Ok(head) = self.repo.find_reference("HEAD")
            && let Some(reference) = self.classify(&head)
        {
            out.push(reference);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(references = out.len(), "reference snapshot");
        Ok(out)
    }

    fn target(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        self.resolve(name)
    }

    fn apply_batch(&mut self, updates: &[RefUpdate]) -> Result<(), RefUpdateError> {
        let head = self.head_branch();
        let mut tx = self
            .repo
            .transaction()
            .map_err(|e| rejected("transaction", e.message()))?;

        for update in updates {
            for name in std::iter::once(&update.name).chain(update.new_name.as_ref()) {
                tx.lock_ref(name).map_err(|e| lock_failure(name, &e))?;
            }
        }

        for update in updates {
            let actual = self
                .resolve(&update.name)
                .map_err(|e| rejected(&update.name, e))?;
            if actual != Some(update.expected) {
                return Err(RefUpdateError::Conflict {
                    name: update.name.clone(),
                    expected: Some(update.expected),
                    actual,
                });
            }
            if let Some(new_name) = &update.new_name {
                let existing = self
                    .resolve(new_name)
                    .map_err(|e| rejected(new_name, e))?;
                if existing.is_some() {
                    return Err(RefUpdateError::Conflict {
                        name: new_name.clone(),
                        expected: None,
                        actual: existing,
                    });
                }
            }
        }

        for update in updates {
            let oid = Oid::from_bytes(update.new_target.as_bytes())
                .map_err(|e| rejected(&update.name, e))?;
            let destination = update.final_name();
            tx.set_target(destination, oid, None, REFLOG_MESSAGE)
                .map_err(|e| rejected(destination, e))?;
            if update.new_name.is_some() {
                tx.remove(&update.name)
                    .map_err(|e| rejected(&update.name, e))?;
            }
        }

        tx.commit().map_err(|e| rejected("transaction", e.message()))?;
        self.move_head_after_rename(updates, head.as_deref());
        debug!(count = updates.len(), "git reference transaction committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn to_oid(id: ObjectId) -> Result<Oid, StoreError> {
    Ok(Oid::from_bytes(id.as_bytes())?)
}

fn to_object_id(oid: Oid) -> Result<ObjectId, StoreError> {
    ObjectId::from_slice(oid.as_bytes()).map_err(|e| StoreError::Backend(e.to_string()))
}

fn signature(sig: &git2::Signature<'_>) -> Signature {
    Signature::new_unchecked(
        String::from_utf8_lossy(sig.name_bytes()),
        String::from_utf8_lossy(sig.email_bytes()),
    )
}

fn timestamp(time: git2::Time) -> Timestamp {
    Timestamp::new(time.seconds(), time.offset_minutes())
}

fn lock_failure(name: &str, err: &git2::Error) -> RefUpdateError {
    if err.code() == GitErrorCode::Locked {
        RefUpdateError::Locked {
            name: name.to_string(),
        }
    } else {
        rejected(name, err.message())
    }
}

fn rejected(name: &str, reason: impl std::fmt::Display) -> RefUpdateError {
    RefUpdateError::Rejected {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init() -> (TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn commit(repo: &Repository, update_ref: Option<&str>, secs: i64, parents: &[Oid]) -> Oid {
        let sig =
            git2::Signature::new("Git Tester", "git@example.com", &git2::Time::new(secs, 90))
                .unwrap();
        let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parents: Vec<git2::Commit<'_>> =
            parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        repo.commit(
            update_ref,
            &sig,
            &sig,
            &format!("commit at {secs}\n"),
            &tree,
            &parent_refs,
        )
        .unwrap()
    }

    fn id(oid: Oid) -> ObjectId {
        to_object_id(oid).unwrap()
    }

    #[test]
    fn read_commit_round_trips_through_git_hash() {
        let (_dir, repo) = init();
        let root = commit(&repo, Some("HEAD"), 1_000, &[]);
        let child = commit(&repo, Some("HEAD"), 2_000, &[root]);
        let backend = GitBackend::from_repository(repo);

        let node = backend.read_commit(&id(child)).unwrap().unwrap();
        assert_eq!(node.parents(), &[id(root)]);
        assert_eq!(node.data.author.name(), "Git Tester");
        assert_eq!(node.data.commit_time, Timestamp::new(2_000, 90));
        // Canonical encoding reproduces git's own id.
        assert_eq!(backend.hash_commit(&node.data).unwrap(), id(child));
    }

    #[test]
    fn unknown_and_non_commit_ids() {
        let (_dir, repo) = init();
        let blob = repo.blob(b"content").unwrap();
        let backend = GitBackend::from_repository(repo);

        let missing = ObjectId::from_bytes([0xab; ObjectId::LEN]);
        assert!(backend.read_commit(&missing).unwrap().is_none());
        assert!(matches!(
            backend.read_commit(&id(blob)),
            Err(StoreError::NotACommit { .. })
        ));
    }

    #[test]
    fn written_commit_is_stored_under_hashed_id() {
        let (_dir, repo) = init();
        let root = commit(&repo, Some("HEAD"), 1_000, &[]);
        let mut backend = GitBackend::from_repository(repo);

        let mut data = backend.read_commit(&id(root)).unwrap().unwrap().data;
        data.commit_time = Timestamp::new(5_000, 0);
        let expected = backend.hash_commit(&data).unwrap();
        let written = backend.write_commit(&data).unwrap();
        assert_eq!(written, expected);
        assert_eq!(backend.read_commit(&written).unwrap().unwrap().data, data);
    }

    #[test]
    fn snapshot_skips_symbolic_and_remote_refs() {
        let (_dir, repo) = init();
        let root = commit(&repo, Some("refs/heads/main"), 1_000, &[]);
        repo.set_head("refs/heads/main").unwrap();
        repo.reference("refs/remotes/origin/main", root, true, "test")
            .unwrap();
        repo.reference("refs/tags/v1", root, true, "test").unwrap();
        let backend = GitBackend::from_repository(repo);

        let names: Vec<String> = backend
            .references()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["refs/heads/main", "refs/tags/v1"]);
    }

    #[test]
    fn batch_moves_renames_and_repoints_head() {
        let (_dir, repo) = init();
        let a = commit(&repo, Some("refs/heads/master"), 1_000, &[]);
        repo.set_head("refs/heads/master").unwrap();
        let b = commit(&repo, None, 2_000, &[]);
        repo.reference("refs/tags/v1", a, true, "test").unwrap();
        let mut backend = GitBackend::from_repository(repo);

        backend
            .apply_batch(&[
                RefUpdate::new("refs/heads/master", id(a), id(b)).renamed_to("refs/heads/main"),
                RefUpdate::new("refs/tags/v1", id(a), id(b)),
            ])
            .unwrap();

        assert_eq!(backend.target("refs/heads/master").unwrap(), None);
        assert_eq!(backend.target("refs/heads/main").unwrap(), Some(id(b)));
        assert_eq!(backend.target("refs/tags/v1").unwrap(), Some(id(b)));
        assert_eq!(backend.head_branch().as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn stale_expectation_leaves_every_reference() {
        let (_dir, repo) = init();
        let a = commit(&repo, Some("refs/heads/main"), 1_000, &[]);
        let b = commit(&repo, Some("refs/heads/dev"), 2_000, &[]);
        let mut backend = GitBackend::from_repository(repo);

        let err = backend
            .apply_batch(&[
                RefUpdate::new("refs/heads/main", id(a), id(b)),
                RefUpdate::new("refs/heads/dev", id(a), id(a)),
            ])
            .unwrap_err();

        assert!(matches!(err, RefUpdateError::Conflict { ref name, .. } if name == "refs/heads/dev"));
        assert_eq!(backend.target("refs/heads/main").unwrap(), Some(id(a)));
        assert_eq!(backend.target("refs/heads/dev").unwrap(), Some(id(b)));
    }

    #[test]
    fn remotes_are_added_then_updated() {
        let (_dir, repo) = init();
        let backend = GitBackend::from_repository(repo);

        let url = "https://example.com/a.git";
        assert_eq!(backend.configure_remote("origin", url).unwrap(), RemoteChange::Added);
        assert_eq!(backend.configure_remote("origin", url).unwrap(), RemoteChange::Unchanged);
        assert_eq!(
            backend
                .configure_remote("origin", "https://example.com/b.git")
                .unwrap(),
            RemoteChange::Updated
        );
    }

    #[test]
    fn summary_counts_history() {
        let (_dir, repo) = init();
        let a = commit(&repo, Some("refs/heads/main"), 1_000, &[]);
        let b = commit(&repo, Some("refs/heads/main"), 2_000, &[a]);
        commit(&repo, Some("refs/heads/side"), 3_000, &[b]);
        repo.set_head("refs/heads/main").unwrap();
        repo.reference("refs/tags/v1", a, true, "test").unwrap();
        let backend = GitBackend::from_repository(repo);

        let summary = backend.summary().unwrap();
        assert_eq!(summary.commits, 3);
        assert_eq!(summary.tags, vec!["v1"]);
        assert_eq!(summary.head.as_deref(), Some("main"));
        assert_eq!(summary.branches.len(), 2);
        assert!(summary.branches.iter().any(|b| b.name == "main" && b.is_head));
    }
}
