//! One rewrite pass, end to end.
//!
//! ```text
//! snapshot refs -> load graph -> sequence -> rewrite (policy) -> plan
//!   -> persist staged commits -> cancel check -> atomic reference batch
//! ```
//!
//! Every failure before the batch leaves references exactly as found.
//! Objects persisted by an aborted pass are unreachable.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{ObjectStore, RefStore};
use crate::error::RestampError;
use crate::model::{ObjectId, Timestamp};
use crate::policy::{DateMode, PolicyConfig, RewritePolicy};
use crate::refs::{RefUpdate, commit_updates, plan_updates};
use crate::rewrite::{CancelToken, RewriteMapping, rewrite_graph};
use crate::sequence::{independent_components, topological_order};
use crate::store::CommitGraph;
use crate::timing::timed;

/// Inputs for [`run_rewrite`].
#[derive(Debug, Clone, Default)]
pub struct RewriteRequest {
    pub policy: PolicyConfig,
    /// Short branch name -> new short branch name.
    pub renames: BTreeMap<String, String>,
    /// Stop after planning; persist and update nothing.
    pub dry_run: bool,
}

/// What a pass did.
#[derive(Debug, Clone, Serialize)]
pub struct RewriteOutcome {
    /// Seed the date generator ran with; pass it back to reproduce.
    pub seed: u64,
    pub date_mode: DateMode,
    /// Commits visited.
    pub commits: usize,
    /// Commits whose id changed.
    pub changed: usize,
    /// Unrelated histories in the working set.
    pub components: usize,
    /// References in the snapshot.
    pub references: usize,
    pub updates: Vec<RefUpdate>,
    /// `true` once the reference batch committed.
    pub applied: bool,
    pub dry_run: bool,
    #[serde(skip)]
    pub mapping: RewriteMapping,
}

/// Run one pass over `backend`.
///
/// # Errors
///
/// Returns the [`RestampError`] of the first stage that failed. Unless the
/// variant is [`RestampError::Refs`] from a store that broke its own
/// atomicity, no reference has moved.
pub fn run_rewrite<B>(
    backend: &mut B,
    request: &RewriteRequest,
    cancel: &CancelToken,
) -> Result<RewriteOutcome, RestampError>
where
    B: ObjectStore + RefStore + ?Sized,
{
    let snapshot = timed("snapshot", || backend.references())?;
    // Renames are checked before any commit is visited.
    plan_updates(&snapshot, &RewriteMapping::new(), &request.renames)?;

    let graph = timed("load", || {
        CommitGraph::load(&*backend, snapshot.iter().map(|r| r.target))
    })?;
    let order = timed("sequence", || topological_order(&graph))?;
    let components = independent_components(&graph).len();

    let mut policy = RewritePolicy::new(request.policy.clone())?;
    let rewrite = timed("rewrite", || {
        rewrite_graph(&order, &mut policy, &*backend, cancel)
    })?;
    let updates = plan_updates(&snapshot, &rewrite.mapping, &request.renames)?;

    let mut outcome = RewriteOutcome {
        seed: policy.seed(),
        date_mode: policy.date_mode(),
        commits: rewrite.mapping.len(),
        changed: rewrite.mapping.changed(),
        components,
        references: snapshot.len(),
        updates,
        applied: false,
        dry_run: request.dry_run,
        mapping: rewrite.mapping,
    };

    if request.dry_run {
        info!(
            commits = outcome.commits,
            updates = outcome.updates.len(),
            seed = outcome.seed,
            "dry run: nothing written"
        );
        return Ok(outcome);
    }

    timed("persist", || rewrite.staged.persist(&mut *backend))?;

    if cancel.is_cancelled() {
        warn!("cancelled after staging; references untouched");
        return Err(RestampError::Cancelled);
    }

    let planned = std::mem::take(&mut outcome.updates);
    outcome.updates = timed("update", || commit_updates(&mut *backend, planned))?;
    outcome.applied = true;

    info!(
        commits = outcome.commits,
        changed = outcome.changed,
        references = outcome.updates.len(),
        seed = outcome.seed,
        "rewrite applied"
    );
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// A commit recorded no later than one of its parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChronologyViolation {
    pub commit: ObjectId,
    pub parent: ObjectId,
    pub commit_time: Timestamp,
    pub parent_time: Timestamp,
}

/// Result of [`verify_chronology`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChronologyReport {
    pub commits: usize,
    pub violations: Vec<ChronologyViolation>,
}

impl ChronologyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check that every commit reachable from a reference is strictly later
/// than each of its parents.
///
/// # Errors
///
/// Returns [`RestampError::Load`] or [`RestampError::Store`] if the history
/// cannot be read.
pub fn verify_chronology<S>(store: &S) -> Result<ChronologyReport, RestampError>
where
    S: ObjectStore + RefStore + ?Sized,
{
    let snapshot = store.references()?;
    let graph = CommitGraph::load(store, snapshot.iter().map(|r| r.target))?;

    let mut violations = Vec::new();
    for node in graph.nodes() {
        for parent_id in node.parents() {
            let Some(parent) = graph.get(parent_id) else {
                continue;
            };
            let (child_time, parent_time) = (node.data.commit_time, parent.data.commit_time);
            if child_time.seconds() <= parent_time.seconds() {
                violations.push(ChronologyViolation {
                    commit: node.id,
                    parent: parent.id,
                    commit_time: child_time,
                    parent_time,
                });
            }
        }
    }

    Ok(ChronologyReport {
        commits: graph.len(),
        violations,
    })
}
