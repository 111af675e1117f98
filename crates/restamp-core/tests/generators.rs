//! Shared fixture builders for restamp-core integration tests.

#![allow(dead_code)]

use proptest::prelude::*;
use restamp_core::{CommitData, MemoryBackend, ObjectId, Signature, Timestamp};

/// Parent indices per node; node `i` only names parents below `i`.
pub type DagShape = Vec<Vec<usize>>;

pub fn sig() -> Signature {
    Signature::new("Fixture Author", "fixture@example.com").expect("valid fixture signature")
}

pub fn commit_data(parents: Vec<ObjectId>, seconds: i64, label: &str) -> CommitData {
    CommitData {
        tree: ObjectId::from_bytes([0x5a; ObjectId::LEN]),
        parents,
        author: sig(),
        committer: sig(),
        author_time: Timestamp::new(seconds, 60),
        commit_time: Timestamp::new(seconds, 60),
        encoding: None,
        message: format!("{label}\n").into_bytes(),
    }
}

/// Insert `shape` into a fresh backend and point a branch at every tip.
///
/// Returns the backend and the ids in shape order.
pub fn build(shape: &DagShape, times: &[i64]) -> (MemoryBackend, Vec<ObjectId>) {
    let mut backend = MemoryBackend::new();
    let mut ids: Vec<ObjectId> = Vec::with_capacity(shape.len());
    for (i, parents) in shape.iter().enumerate() {
        let parent_ids = parents.iter().map(|p| ids[*p]).collect();
        let seconds = times.get(i).copied().unwrap_or(1_000 + i as i64);
        let id = backend
            .insert(commit_data(parent_ids, seconds, &format!("node {i}")))
            .expect("fixture insert");
        ids.push(id);
    }

    let mut has_child = vec![false; shape.len()];
    for parents in shape {
        for p in parents {
            has_child[*p] = true;
        }
    }
    for (i, id) in ids.iter().enumerate() {
        if !has_child[i] {
            backend.set_reference(format!("refs/heads/tip-{i}"), *id);
        }
    }
    (backend, ids)
}

/// A linear chain of `len` commits with branch `main` at the tip.
pub fn linear(len: usize, start: i64) -> (MemoryBackend, Vec<ObjectId>) {
    let mut backend = MemoryBackend::new();
    let mut ids: Vec<ObjectId> = Vec::with_capacity(len);
    for i in 0..len {
        let parents = ids.last().copied().into_iter().collect();
        let id = backend
            .insert(commit_data(parents, start + i as i64, &format!("linear {i}")))
            .expect("fixture insert");
        ids.push(id);
    }
    if let Some(tip) = ids.last() {
        backend.set_reference("refs/heads/main", *tip);
    }
    (backend, ids)
}

/// Random DAG shapes of 1..max nodes with up to two parents each.
pub fn arb_dag(max: usize) -> impl Strategy<Value = DagShape> {
    (1..max).prop_flat_map(|n| {
        let per_node: Vec<BoxedStrategy<Vec<usize>>> = (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    proptest::collection::vec(0..i, 0..=2)
                        .prop_map(|mut parents| {
                            parents.sort_unstable();
                            parents.dedup();
                            parents
                        })
                        .boxed()
                }
            })
            .collect();
        per_node
    })
}

/// Original commit times, deliberately unordered.
pub fn arb_times(len: usize) -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(0_i64..50_000, len)
}
