//! Graph rewriter: the cascading identity transform.
//!
//! Commits are visited in topological order. Each one has its parents
//! remapped through the ids already assigned, its metadata replaced by the
//! [`RewritePolicy`], and its new id computed by the store's identity
//! scheme. The result is a [`Rewrite`]: the original -> new
//! [`RewriteMapping`] plus a [`StagedGraph`] holding the new bodies.
//!
//! Nothing is written during the walk. [`StagedGraph::persist`] writes the
//! staged bodies into the object store afterwards, where they stay
//! unreferenced until the reference batch moves onto them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use crate::backend::{ObjectStore, StoreError};
use crate::model::{CommitData, CommitNode, ObjectId, Timestamp};
use crate::policy::{PolicyError, RewritePolicy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised during the rewrite walk or while persisting its output.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    /// The policy rejected a commit.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The store failed to hash or write a commit.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The cancel token fired.
    #[error("rewrite cancelled")]
    Cancelled,

    /// Two original commits rewrote to byte-identical content.
    #[error("commits {first} and {second} both rewrite to {new}")]
    IdentityConvergence {
        /// The commit that claimed the id first.
        first: ObjectId,
        /// The commit that produced it again.
        second: ObjectId,
        /// The shared new id.
        new: ObjectId,
    },

    /// A parent was visited after its child, or lies outside the graph.
    #[error("commit {child} visited before its parent {parent}")]
    UnmappedParent {
        /// The commit being rewritten.
        child: ObjectId,
        /// The parent with no mapping yet.
        parent: ObjectId,
    },

    /// The same original commit was rewritten twice.
    #[error("commit {original} already has a mapping")]
    DuplicateMapping {
        /// The repeated original id.
        original: ObjectId,
    },
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Shared cancellation flag, checked before each commit and before the
/// reference batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// RewriteMapping
// ---------------------------------------------------------------------------

/// Original id -> rewritten id. Append-only for the life of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RewriteMapping {
    entries: BTreeMap<ObjectId, ObjectId>,
}

impl RewriteMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `original` became `new`.
    ///
    /// # Errors
    ///
    /// Returns [`RewriteError::DuplicateMapping`] if `original` is already
    /// mapped.
    pub fn insert(&mut self, original: ObjectId, new: ObjectId) -> Result<(), RewriteError> {
        if self.entries.contains_key(&original) {
            return Err(RewriteError::DuplicateMapping { original });
        }
        self.entries.insert(original, new);
        Ok(())
    }

    /// The rewritten id of `original`.
    #[must_use]
    pub fn get(&self, original: &ObjectId) -> Option<ObjectId> {
        self.entries.get(original).copied()
    }

    #[must_use]
    pub fn contains(&self, original: &ObjectId) -> bool {
        self.entries.contains_key(original)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(original, new)` pairs in ascending original order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, ObjectId)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Number of commits whose id actually changed.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.entries.iter().filter(|(k, v)| k != v).count()
    }
}

// ---------------------------------------------------------------------------
// StagedGraph
// ---------------------------------------------------------------------------

/// New commit bodies keyed by new id, in the order they were produced.
#[derive(Debug, Clone, Default)]
pub struct StagedGraph {
    nodes: HashMap<ObjectId, CommitData>,
    order: Vec<ObjectId>,
}

impl StagedGraph {
    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&CommitData> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Staged commits, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = CommitNode> + '_ {
        self.order.iter().filter_map(|id| {
            self.nodes.get(id).map(|data| CommitNode {
                id: *id,
                data: data.clone(),
            })
        })
    }

    fn push(&mut self, id: ObjectId, data: CommitData) {
        self.order.push(id);
        self.nodes.insert(id, data);
    }

    /// Write every staged commit into `store`, parents first.
    ///
    /// No reference is touched. Returns the number of commits written.
    ///
    /// # Errors
    ///
    /// - [`StoreError::IdentityMismatch`] if the store assigns an id other
    ///   than the one computed during the walk.
    /// - Any write failure from the store.
    pub fn persist<S: ObjectStore + ?Sized>(&self, store: &mut S) -> Result<usize, StoreError> {
        for id in &self.order {
            let Some(data) = self.nodes.get(id) else {
                continue;
            };
            let written = store.write_commit(data)?;
            if written != *id {
                return Err(StoreError::IdentityMismatch {
                    expected: *id,
                    actual: written,
                });
            }
        }
        debug!(commits = self.order.len(), "staged graph persisted");
        Ok(self.order.len())
    }
}

// ---------------------------------------------------------------------------
// Rewrite
// ---------------------------------------------------------------------------

/// Output of a completed walk.
#[derive(Debug, Clone, Default)]
pub struct Rewrite {
    pub mapping: RewriteMapping,
    pub staged: StagedGraph,
}

/// Rewrite every commit in `order`.
///
/// `order` must list parents before children (see
/// [`crate::sequence::topological_order`]). The store is used only to
/// compute ids.
///
/// # Errors
///
/// Any [`RewriteError`]. On error the partial mapping and stage are
/// dropped.
pub fn rewrite_graph<S: ObjectStore + ?Sized>(
    order: &[&CommitNode],
    policy: &mut RewritePolicy,
    store: &S,
    cancel: &CancelToken,
) -> Result<Rewrite, RewriteError> {
    policy.prepare(order.len());

    let mut rewrite = Rewrite::default();
    let mut claimed_by: HashMap<ObjectId, ObjectId> = HashMap::with_capacity(order.len());
    let mut parents = Vec::new();
    let mut parent_times: Vec<Timestamp> = Vec::new();

    for node in order {
        if cancel.is_cancelled() {
            debug!(done = rewrite.mapping.len(), "rewrite cancelled mid-walk");
            return Err(RewriteError::Cancelled);
        }

        parents.clear();
        parent_times.clear();
        for parent in node.parents() {
            let Some(new_parent) = rewrite.mapping.get(parent) else {
                return Err(RewriteError::UnmappedParent {
                    child: node.id,
                    parent: *parent,
                });
            };
            if let Some(staged) = rewrite.staged.get(&new_parent) {
                parent_times.push(staged.commit_time);
            }
            parents.push(new_parent);
        }

        let meta = policy.apply(node, &parent_times)?;
        let data = CommitData {
            tree: node.data.tree,
            parents: parents.clone(),
            author: meta.author,
            committer: meta.committer,
            author_time: meta.author_time,
            commit_time: meta.commit_time,
            encoding: node.data.encoding.clone(),
            message: node.data.message.clone(),
        };

        let new_id = store.hash_commit(&data)?;
        if let Some(first) = claimed_by.insert(new_id, node.id) {
            return Err(RewriteError::IdentityConvergence {
                first,
                second: node.id,
                new: new_id,
            });
        }
        rewrite.mapping.insert(node.id, new_id)?;
        rewrite.staged.push(new_id, data);
    }

    info!(
        commits = rewrite.mapping.len(),
        changed = rewrite.mapping.changed(),
        seed = policy.seed(),
        "rewrite walk complete"
    );
    Ok(rewrite)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
