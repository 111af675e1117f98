//! Commit node store: the read-only view of the original graph.
//!
//! [`CommitGraph::load`] walks parent links from a set of root ids and
//! pulls every reachable commit into memory. A parent that cannot be
//! resolved (shallow clone, pruned object) aborts the load. A rewrite over
//! a graph with gaps would silently drop history, so there is no partial
//! result.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::backend::{ObjectStore, StoreError};
use crate::model::{CommitNode, ObjectId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from loading the original graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphLoadError {
    /// A root id handed to the loader does not resolve.
    #[error("root commit {id} not found")]
    MissingRoot {
        /// The unresolved root.
        id: ObjectId,
    },

    /// A commit names a parent the store does not have.
    #[error("commit {child} references missing parent {parent} (shallow or truncated history)")]
    MissingParent {
        /// The commit holding the dangling link.
        child: ObjectId,
        /// The parent that could not be resolved.
        parent: ObjectId,
    },

    /// The store failed while reading.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// CommitGraph
// ---------------------------------------------------------------------------

/// Immutable mapping from id to commit for one rewrite pass.
#[derive(Debug, Clone, Default)]
pub struct CommitGraph {
    nodes: BTreeMap<ObjectId, CommitNode>,
}

impl CommitGraph {
    /// Load every commit reachable from `roots` by following parents.
    ///
    /// The walk is iterative, so deep linear histories do not grow the
    /// call stack. Duplicate roots are fine.
    ///
    /// # Errors
    ///
    /// - [`GraphLoadError::MissingRoot`] if a root does not resolve.
    /// - [`GraphLoadError::MissingParent`] if any reachable commit names a
    ///   parent the store cannot produce.
    /// - [`GraphLoadError::Store`] on storage failure.
    pub fn load<S, I>(store: &S, roots: I) -> Result<Self, GraphLoadError>
    where
        S: ObjectStore + ?Sized,
        I: IntoIterator<Item = ObjectId>,
    {
        let mut nodes = BTreeMap::new();
        let mut queued = BTreeSet::new();
        let mut stack: Vec<(ObjectId, Option<ObjectId>)> = Vec::new();

        for root in roots {
            if queued.insert(root) {
                stack.push((root, None));
            }
        }

        while let Some((id, child)) = stack.pop() {
            let Some(node) = store.read_commit(&id)? else {
                return Err(match child {
                    Some(child) => GraphLoadError::MissingParent { child, parent: id },
                    None => GraphLoadError::MissingRoot { id },
                });
            };

            for parent in node.parents() {
                if queued.insert(*parent) {
                    stack.push((*parent, Some(id)));
                }
            }
            nodes.insert(id, node);
        }

        debug!(commits = nodes.len(), "loaded commit graph");
        Ok(Self { nodes })
    }

    /// Build a graph from nodes already in hand.
    ///
    /// No reachability check is done; parents outside the set are treated
    /// as external by the sequencer.
    #[must_use]
    pub fn from_nodes(nodes: impl IntoIterator<Item = CommitNode>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|node| (node.id, node)).collect(),
        }
    }

    /// Number of commits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph holds no commits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a commit.
    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&CommitNode> {
        self.nodes.get(id)
    }

    /// Returns `true` if the graph holds `id`.
    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.nodes.keys()
    }

    /// All commits in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &CommitNode> {
        self.nodes.values()
    }

    /// Commits with no parents at all.
    #[must_use]
    pub fn roots(&self) -> Vec<&CommitNode> {
        self.nodes.values().filter(|node| node.is_root()).collect()
    }

    /// Total number of parent links whose parent lies inside the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes
            .values()
            .map(|node| {
                node.parents()
                    .iter()
                    .filter(|parent| self.nodes.contains_key(parent))
                    .count()
            })
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
