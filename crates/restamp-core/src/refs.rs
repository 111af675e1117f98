//! Reference updater: moves every snapshotted reference onto the rewritten
//! graph in one compare-and-swap batch.
//!
//! Planning ([`plan_updates`]) is pure: it turns the reference snapshot and
//! the [`RewriteMapping`] into a list of [`RefUpdate`]s, each carrying the
//! value the reference is expected to hold. Committing ([`commit_updates`])
//! hands the whole list to [`RefStore::apply_batch`], which either applies
//! all of it or none of it.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::backend::RefStore;
use crate::error::ErrorCode;
use crate::model::{ObjectId, Reference, short_ref_name};
use crate::rewrite::RewriteMapping;

const BRANCH_PREFIX: &str = "refs/heads/";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from planning or applying a reference batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefUpdateError {
    /// A reference no longer holds the value captured in the snapshot, or a
    /// rename destination appeared. Retryable after a reload.
    #[error("reference {name} changed since snapshot (expected {expected:?}, found {actual:?})")]
    Conflict {
        /// The reference that moved.
        name: String,
        /// Value the batch expected (`None`: expected absent).
        expected: Option<ObjectId>,
        /// Value actually found.
        actual: Option<ObjectId>,
    },

    /// Another writer holds the reference lock. Retryable.
    #[error("reference {name} is locked by another writer")]
    Locked {
        /// The locked reference.
        name: String,
    },

    /// Storage refused the write. The batch was rolled back.
    #[error("storage rejected update of {name}: {reason}")]
    Rejected {
        /// The reference whose write failed.
        name: String,
        /// Storage-level reason.
        reason: String,
    },

    /// A requested branch rename cannot be applied.
    #[error("cannot rename branch {from} to {to}: {reason}")]
    InvalidRename {
        /// Source branch (short name).
        from: String,
        /// Destination branch (short name).
        to: String,
        /// Why the rename was refused.
        reason: &'static str,
    },
}

impl RefUpdateError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Conflict { .. } => ErrorCode::ReferenceConflict,
            Self::Locked { .. } => ErrorCode::LockContention,
            Self::Rejected { .. } => ErrorCode::ReferenceUpdateFailed,
            Self::InvalidRename { .. } => ErrorCode::InvalidPolicy,
        }
    }

    /// Conflicts and lock contention clear up on reload-and-retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Locked { .. })
    }
}

// ---------------------------------------------------------------------------
// RefUpdate
// ---------------------------------------------------------------------------

/// One compare-and-swap step of a reference batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefUpdate {
    /// Full name of the reference as snapshotted.
    pub name: String,
    /// Value the reference must still hold for the swap to proceed.
    pub expected: ObjectId,
    /// Value the reference receives.
    pub new_target: ObjectId,
    /// Full destination name when the reference is also renamed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

impl RefUpdate {
    /// Swap `name` from `expected` to `new_target`.
    #[must_use]
    pub fn new(name: impl Into<String>, expected: ObjectId, new_target: ObjectId) -> Self {
        Self {
            name: name.into(),
            expected,
            new_target,
            new_name: None,
        }
    }

    /// Also move the reference to a new full name.
    #[must_use]
    pub fn renamed_to(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }

    /// The name the reference holds after the update.
    #[must_use]
    pub fn final_name(&self) -> &str {
        self.new_name.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Build the update batch for a finished rewrite.
///
/// - Every snapshotted reference whose target has a mapping entry gets an
///   update from the original target to the mapped one.
/// - `renames` maps short branch names (`master`) to new short names
///   (`main`); the matching `refs/heads/` reference is renamed in the same
///   batch.
/// - References whose mapped target equals the original and that are not
///   renamed are skipped; nothing would change.
///
/// # Errors
///
/// Returns [`RefUpdateError::InvalidRename`] if a rename names a branch that
/// is not in the snapshot, targets an existing reference, or two renames
/// share a destination.
pub fn plan_updates(
    snapshot: &[Reference],
    mapping: &RewriteMapping,
    renames: &BTreeMap<String, String>,
) -> Result<Vec<RefUpdate>, RefUpdateError> {
    let existing: BTreeSet<&str> = snapshot.iter().map(|r| r.name.as_str()).collect();
    let mut destinations = BTreeSet::new();

    for (from, to) in renames {
        if from == to {
            continue;
        }
        let invalid = |reason| RefUpdateError::InvalidRename {
            from: from.clone(),
            to: to.clone(),
            reason,
        };
        if !existing.contains(format!("{BRANCH_PREFIX}{from}").as_str()) {
            return Err(invalid("source branch does not exist"));
        }
        if existing.contains(format!("{BRANCH_PREFIX}{to}").as_str()) {
            return Err(invalid("destination branch already exists"));
        }
        if !destinations.insert(to.as_str()) {
            return Err(invalid("another rename already targets this branch"));
        }
    }

    let mut updates = Vec::with_capacity(snapshot.len());
    for reference in snapshot {
        let Some(new_target) = mapping.get(&reference.target) else {
            debug!(reference = %reference.name, "reference target outside rewrite; left alone");
            continue;
        };

        let new_name = reference
            .name
            .strip_prefix(BRANCH_PREFIX)
            .and_then(|short| renames.get(short))
            .filter(|to| reference.short_name() != to.as_str())
            .map(|to| format!("{BRANCH_PREFIX}{to}"));

        if new_target == reference.target && new_name.is_none() {
            continue;
        }

        updates.push(RefUpdate {
            name: reference.name.clone(),
            expected: reference.target,
            new_target,
            new_name,
        });
    }

    debug!(
        planned = updates.len(),
        snapshot = snapshot.len(),
        "planned reference updates"
    );
    Ok(updates)
}

/// Apply a planned batch atomically.
///
/// Returns the applied updates. An empty batch is a no-op.
///
/// # Errors
///
/// Propagates the [`RefUpdateError`] from the store; when it is returned,
/// no reference has changed.
pub fn commit_updates<R: RefStore + ?Sized>(
    store: &mut R,
    updates: Vec<RefUpdate>,
) -> Result<Vec<RefUpdate>, RefUpdateError> {
    if updates.is_empty() {
        return Ok(updates);
    }

    store.apply_batch(&updates)?;
    for update in &updates {
        info!(
            reference = %update.final_name(),
            from = %update.expected.short(),
            to = %update.new_target.short(),
            "reference moved"
        );
    }
    Ok(updates)
}

/// Short branch name helper used by renames and reports.
#[must_use]
pub fn display_name(update: &RefUpdate) -> String {
    match &update.new_name {
        Some(new_name) => format!(
            "{} -> {}",
            short_ref_name(&update.name),
            short_ref_name(new_name)
        ),
        None => short_ref_name(&update.name).to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
