//! In-memory object and reference store.
//!
//! Commits live in an append-only arena keyed by digest. The digest is
//! BLAKE3 over `commit <len>\0<body>`, truncated through the XOF reader to
//! [`ObjectId::LEN`] bytes, so ids have the same width as git object ids.
//!
//! Fault injection hooks ([`MemoryBackend::fail_writes_after`],
//! [`MemoryBackend::reject_reference`]) let tests break the pass at a
//! chosen point and check that references are left alone.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::{ObjectStore, RefStore, StoreError};
use crate::model::{CommitData, CommitNode, ObjectId, Reference};
use crate::refs::{RefUpdate, RefUpdateError};

/// Compute the in-memory digest of a commit body.
#[must_use]
pub fn digest_commit(data: &CommitData) -> ObjectId {
    let body = data.encode();
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("commit {}\0", body.len()).as_bytes());
    hasher.update(&body);
    let mut out = [0_u8; ObjectId::LEN];
    hasher.finalize_xof().fill(&mut out);
    ObjectId::from_bytes(out)
}

/// Arena-backed [`ObjectStore`] + [`RefStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    objects: HashMap<ObjectId, CommitData>,
    refs: BTreeMap<String, ObjectId>,
    writes: usize,
    fail_writes_after: Option<usize>,
    rejected_refs: BTreeSet<String>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a commit and return its id. Convenience for building fixtures.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectStore::write_commit`].
    pub fn insert(&mut self, data: CommitData) -> Result<ObjectId, StoreError> {
        self.write_commit(&data)
    }

    /// Point `name` at `target`, bypassing compare-and-swap.
    ///
    /// Models an external writer moving a reference.
    pub fn set_reference(&mut self, name: impl Into<String>, target: ObjectId) {
        self.refs.insert(name.into(), target);
    }

    /// Remove a reference, bypassing compare-and-swap.
    pub fn delete_reference(&mut self, name: &str) {
        self.refs.remove(name);
    }

    /// Number of stored commits.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Let the next `count` object writes succeed and fail every one after.
    pub fn fail_writes_after(&mut self, count: usize) {
        self.fail_writes_after = Some(self.writes + count);
    }

    /// Make any batch touching `name` fail with a storage rejection.
    pub fn reject_reference(&mut self, name: impl Into<String>) {
        self.rejected_refs.insert(name.into());
    }
}

impl ObjectStore for MemoryBackend {
    fn read_commit(&self, id: &ObjectId) -> Result<Option<CommitNode>, StoreError> {
        Ok(self.objects.get(id).map(|data| CommitNode {
            id: *id,
            data: data.clone(),
        }))
    }

    fn hash_commit(&self, data: &CommitData) -> Result<ObjectId, StoreError> {
        Ok(digest_commit(data))
    }

    fn write_commit(&mut self, data: &CommitData) -> Result<ObjectId, StoreError> {
        if let Some(limit) = self.fail_writes_after
            && self.writes >= limit
        {
            return Err(StoreError::Backend(format!(
                "injected write failure after {limit} writes"
            )));
        }

        let id = digest_commit(data);
        match self.objects.get(&id) {
            Some(existing) if existing != data => return Err(StoreError::Collision { id }),
            Some(_) => {}
            None => {
                self.objects.insert(id, data.clone());
            }
        }
        self.writes += 1;
        Ok(id)
    }
}

impl RefStore for MemoryBackend {
    fn references(&self) -> Result<Vec<Reference>, StoreError> {
        Ok(self
            .refs
            .iter()
            .map(|(name, target)| Reference::new(name.clone(), *target))
            .collect())
    }

    fn target(&self, name: &str) -> Result<Option<ObjectId>, StoreError> {
        Ok(self.refs.get(name).copied())
    }

    fn apply_batch(&mut self, updates: &[RefUpdate]) -> Result<(), RefUpdateError> {
        // Every precondition is checked before the first write.
        for update in updates {
            let actual = self.refs.get(&update.name).copied();
            if actual != Some(update.expected) {
                return Err(RefUpdateError::Conflict {
                    name: update.name.clone(),
                    expected: Some(update.expected),
                    actual,
                });
            }
            if let Some(new_name) = &update.new_name
                && let Some(existing) = self.refs.get(new_name)
            {
                return Err(RefUpdateError::Conflict {
                    name: new_name.clone(),
                    expected: None,
                    actual: Some(*existing),
                });
            }
            for touched in std::iter::once(&update.name).chain(update.new_name.as_ref()) {
                if self.rejected_refs.contains(touched) {
                    return Err(RefUpdateError::Rejected {
                        name: touched.clone(),
                        reason: "injected storage rejection".into(),
                    });
                }
            }
        }

        for update in updates {
            match &update.new_name {
                Some(new_name) => {
                    self.refs.remove(&update.name);
                    self.refs.insert(new_name.clone(), update.new_target);
                }
                None => {
                    self.refs.insert(update.name.clone(), update.new_target);
                }
            }
        }
        debug!(count = updates.len(), "memory backend applied reference batch");
        Ok(())
    }
}
