//! restamp-core: rewrite a content-addressed commit history.
//!
//! The engine loads the graph reachable from every reference, orders it
//! parents-first, runs each commit through a [`policy::RewritePolicy`]
//! (identities, timestamps), recomputes every id bottom-up, and finally
//! moves all references in one compare-and-swap batch.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums per module, wrapped in
//!   [`error::RestampError`] at the pipeline boundary. Config loading
//!   returns `anyhow::Result`.
//! - **Logging**: `tracing` macros (`debug!` per stage, `info!` for
//!   summaries, `warn!` for skipped references).

pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod push;
pub mod refs;
pub mod rewrite;
pub mod sequence;
pub mod store;
pub mod timing;

pub use backend::git::GitBackend;
pub use backend::memory::MemoryBackend;
pub use backend::{ObjectStore, RefStore, StoreError};
pub use error::{ErrorCode, RestampError};
pub use model::{CommitData, CommitNode, ObjectId, Reference, Signature, Timestamp};
pub use pipeline::{RewriteOutcome, RewriteRequest, run_rewrite, verify_chronology};
pub use policy::{DateMode, PolicyConfig, RewritePolicy};
pub use rewrite::{CancelToken, RewriteMapping};
