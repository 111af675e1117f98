//! Storage seams for the rewriter.
//!
//! The engine never talks to a repository directly. It reads and writes
//! commits through [`ObjectStore`] and reads and swaps references through
//! [`RefStore`]. Two implementations ship with the crate:
//!
//! - [`memory::MemoryBackend`]: an arena keyed by digest plus a reference
//!   table, with fault injection hooks for tests.
//! - [`git::GitBackend`]: a libgit2 repository.
//!
//! New commits are written into the same object store as the originals.
//! That is safe because digests never collide for differing content, and
//! the new commits stay invisible until a reference is moved onto them.

pub mod git;
pub mod memory;

use crate::error::ErrorCode;
use crate::model::{CommitData, CommitNode, ObjectId, Reference};
use crate::refs::{RefUpdate, RefUpdateError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by object and reference storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The id resolves to an object that is not a commit.
    #[error("object {id} is not a commit")]
    NotACommit {
        /// The offending id.
        id: ObjectId,
    },

    /// Two different commit bodies produced the same digest.
    #[error("identity collision at {id}: differing content shares one digest")]
    Collision {
        /// The colliding digest.
        id: ObjectId,
    },

    /// The store assigned a different id than the one computed in memory.
    #[error("store wrote {actual} where {expected} was computed")]
    IdentityMismatch {
        /// Id computed by [`ObjectStore::hash_commit`].
        expected: ObjectId,
        /// Id returned by [`ObjectStore::write_commit`].
        actual: ObjectId,
    },

    /// The underlying storage failed.
    #[error("storage failure: {0}")]
    Backend(String),

    /// libgit2 reported an error.
    #[error("git: {0}")]
    Git(#[from] git2::Error),
}

impl StoreError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Collision { .. } | Self::IdentityMismatch { .. } => ErrorCode::IdentityCollision,
            Self::NotACommit { .. }
            | Self::Backend(_)
            | Self::Git(_) => ErrorCode::ObjectStoreFailure,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Content-addressed commit storage.
pub trait ObjectStore {
    /// Read a commit by id. `Ok(None)` means the id is unknown to the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the object exists but is not a readable
    /// commit, or the storage fails.
    fn read_commit(&self, id: &ObjectId) -> Result<Option<CommitNode>, StoreError>;

    /// Compute the id `data` would be stored under, without writing.
    ///
    /// Must be a pure function of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the digest cannot be computed.
    fn hash_commit(&self, data: &CommitData) -> Result<ObjectId, StoreError>;

    /// Store `data` and return its id. Storing the same content twice is a
    /// no-op returning the same id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails or a collision is detected.
    fn write_commit(&mut self, data: &CommitData) -> Result<ObjectId, StoreError>;
}

/// Named references with an atomic compare-and-swap batch update.
pub trait RefStore {
    /// Snapshot every direct reference that points at a commit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the references cannot be listed.
    fn references(&self) -> Result<Vec<Reference>, StoreError>;

    /// Current target of `name`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the reference cannot be read.
    fn target(&self, name: &str) -> Result<Option<ObjectId>, StoreError>;

    /// Apply every update or none of them.
    ///
    /// Each update first asserts that its reference still points at
    /// [`RefUpdate::expected`] (and that a rename destination does not
    /// exist). Any failed precondition rejects the whole batch with every
    /// reference left as found.
    ///
    /// # Errors
    ///
    /// Returns [`RefUpdateError::Conflict`] or [`RefUpdateError::Locked`]
    /// on concurrent modification, [`RefUpdateError::Rejected`] if storage
    /// refused the write.
    fn apply_batch(&mut self, updates: &[RefUpdate]) -> Result<(), RefUpdateError>;
}
