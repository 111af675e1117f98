//! Topological sequencer for the commit graph.
//!
//! Kahn's algorithm: a commit becomes ready once every parent that lies in
//! the working set has been emitted. Parents outside the working set never
//! block. Ready commits leave the queue in ascending id order, so the same
//! graph always produces the same sequence.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::model::{CommitNode, ObjectId};
use crate::store::CommitGraph;

/// The graph has a cycle; these commits could never become ready.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cycle detected among {} commits", .remaining.len())]
pub struct CycleDetected {
    /// Stuck commit ids, ascending.
    pub remaining: Vec<ObjectId>,
}

/// Distinct in-graph parents of `node`.
fn graph_parents<'a>(graph: &CommitGraph, node: &'a CommitNode) -> BTreeSet<&'a ObjectId> {
    node.parents()
        .iter()
        .filter(|parent| graph.contains(parent))
        .collect()
}

/// Order every commit so that parents precede their children.
///
/// # Errors
///
/// Returns [`CycleDetected`] with the commits that were never emitted.
/// Content addressing makes cycles impossible in a sound store, so this
/// points at a corrupt object database.
pub fn topological_order(graph: &CommitGraph) -> Result<Vec<&CommitNode>, CycleDetected> {
    let mut in_degree: HashMap<&ObjectId, usize> = HashMap::with_capacity(graph.len());
    let mut children: HashMap<&ObjectId, Vec<&ObjectId>> = HashMap::with_capacity(graph.len());

    for node in graph.nodes() {
        let parents = graph_parents(graph, node);
        in_degree.insert(&node.id, parents.len());
        for parent in parents {
            children.entry(parent).or_default().push(&node.id);
        }
    }

    let mut ready: BTreeSet<&ObjectId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(current) = ready.pop_first() {
        let Some(node) = graph.get(current) else {
            continue;
        };
        order.push(node);

        for child in children.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if order.len() < graph.len() {
        let emitted: BTreeSet<&ObjectId> = order.iter().map(|node| &node.id).collect();
        let remaining: Vec<ObjectId> = graph
            .ids()
            .filter(|id| !emitted.contains(id))
            .copied()
            .collect();
        return Err(CycleDetected { remaining });
    }

    debug!(commits = order.len(), "sequenced commit graph");
    Ok(order)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Split the working set into weakly connected components.
///
/// Each component is sorted ascending; components are ordered by their
/// smallest id. Commits in different components share no ancestry inside
/// the working set.
#[must_use]
pub fn independent_components(graph: &CommitGraph) -> Vec<Vec<ObjectId>> {
    // Union-find keyed by position in the sorted id list.
    let ids: Vec<ObjectId> = graph.ids().copied().collect();
    let index: BTreeMap<ObjectId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut parent: Vec<usize> = (0..ids.len()).collect();

    for (a, node) in graph.nodes().enumerate() {
        for p in node.parents() {
            if let Some(&b) = index.get(p) {
                let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                if ra != rb {
                    // Keep the smaller index as the representative.
                    let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
                    parent[hi] = lo;
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<ObjectId>> = BTreeMap::new();
    for (i, id) in ids.iter().enumerate() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(*id);
    }
    groups.into_values().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
