use std::fmt;

use crate::backend::StoreError;
use crate::model::ModelError;
use crate::policy::PolicyError;
use crate::push::PushRejectedError;
use crate::refs::RefUpdateError;
use crate::rewrite::RewriteError;
use crate::sequence::CycleDetected;
use crate::store::GraphLoadError;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidPolicy,
    GraphIncomplete,
    CycleDetected,
    IdentityCollision,
    ObjectStoreFailure,
    ReferenceConflict,
    ReferenceUpdateFailed,
    LockContention,
    PushRejected,
    Cancelled,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidPolicy => "E1002",
            Self::GraphIncomplete => "E2001",
            Self::CycleDetected => "E2002",
            Self::IdentityCollision => "E3001",
            Self::ObjectStoreFailure => "E3002",
            Self::ReferenceConflict => "E4001",
            Self::ReferenceUpdateFailed => "E4002",
            Self::LockContention => "E4003",
            Self::PushRejected => "E5001",
            Self::Cancelled => "E8001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidPolicy => "Invalid rewrite policy",
            Self::GraphIncomplete => "History is incomplete",
            Self::CycleDetected => "Commit graph contains a cycle",
            Self::IdentityCollision => "Commit identity collision",
            Self::ObjectStoreFailure => "Object store failure",
            Self::ReferenceConflict => "Reference changed during rewrite",
            Self::ReferenceUpdateFailed => "Reference update rejected",
            Self::LockContention => "Lock contention",
            Self::PushRejected => "Push rejected",
            Self::Cancelled => "Rewrite cancelled",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix the syntax of the restamp config file and retry."),
            Self::InvalidPolicy => {
                Some("Use `Name <email>` identities and a date window with since < until.")
            }
            Self::GraphIncomplete => {
                Some("Fetch the full history (`git fetch --unshallow`) before rewriting.")
            }
            Self::CycleDetected => Some("Run `git fsck`; the object database is corrupt."),
            Self::IdentityCollision => {
                Some("Two commits became identical; vary dates or identities and retry.")
            }
            Self::ObjectStoreFailure => Some("Check disk space and repository permissions."),
            Self::ReferenceConflict => {
                Some("Another process moved a reference. Re-run the rewrite to retry.")
            }
            Self::ReferenceUpdateFailed => {
                Some("Check reference permissions; the original history is intact.")
            }
            Self::LockContention => Some("Retry after the other `restamp` process finishes."),
            Self::PushRejected => {
                Some("The local rewrite is complete. Fix the remote and run `restamp push`.")
            }
            Self::Cancelled => None,
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// RestampError
// ---------------------------------------------------------------------------

/// Failure of a rewrite pass, tagged with the stage that failed.
///
/// Everything up to and including [`RestampError::Cancelled`] is raised
/// before the reference batch starts, so references are untouched.
#[derive(Debug, thiserror::Error)]
pub enum RestampError {
    /// Loading the original graph failed.
    #[error("load: {0}")]
    Load(#[from] GraphLoadError),

    /// The original graph is not acyclic.
    #[error("order: {0}")]
    Cycle(#[from] CycleDetected),

    /// The rewrite policy rejected its configuration or a node.
    #[error("policy: {0}")]
    Policy(#[from] PolicyError),

    /// The rewrite pass itself failed.
    #[error("rewrite: {0}")]
    Rewrite(RewriteError),

    /// Reading or writing objects failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Moving the references failed.
    #[error("update: {0}")]
    Refs(#[from] RefUpdateError),

    /// Transmitting the new history failed. The local rewrite stands.
    #[error("push: {0}")]
    Push(#[from] PushRejectedError),

    /// The pass was cancelled before references were touched.
    #[error("rewrite cancelled before references were updated")]
    Cancelled,
}

impl From<RewriteError> for RestampError {
    fn from(err: RewriteError) -> Self {
        match err {
            RewriteError::Cancelled => Self::Cancelled,
            RewriteError::Policy(policy) => Self::Policy(policy),
            RewriteError::Store(store) => Self::Store(store),
            other => Self::Rewrite(other),
        }
    }
}

impl From<ModelError> for RestampError {
    fn from(err: ModelError) -> Self {
        Self::Policy(PolicyError::from(err))
    }
}

impl RestampError {
    /// Machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Load(GraphLoadError::Store(store)) | Self::Store(store) => store.code(),
            Self::Load(_) => ErrorCode::GraphIncomplete,
            Self::Cycle(_) => ErrorCode::CycleDetected,
            Self::Policy(_) => ErrorCode::InvalidPolicy,
            Self::Rewrite(RewriteError::IdentityConvergence { .. }) => {
                ErrorCode::IdentityCollision
            }
            Self::Rewrite(_) => ErrorCode::InternalUnexpected,
            Self::Refs(err) => err.code(),
            Self::Push(_) => ErrorCode::PushRejected,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Returns `true` when reloading and re-running the pass (or re-pushing)
    /// can succeed without operator intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refs(err) => err.is_retryable(),
            Self::Push(_) => true,
            _ => false,
        }
    }
}
