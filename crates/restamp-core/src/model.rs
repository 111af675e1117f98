//! Value types for the commit graph.
//!
//! Every commit is an immutable record addressed by a digest of its
//! canonical encoding. Records never point at each other directly; they
//! name their parents by [`ObjectId`], so the graph can live in a flat
//! arena keyed by digest.
//!
//! # Canonical encoding
//!
//! [`CommitData::encode`] produces the git commit object body:
//!
//! ```text
//! tree <hex>
//! parent <hex>            (zero or more, in order)
//! author <name> <<email>> <secs> <+hhmm>
//! committer <name> <<email>> <secs> <+hhmm>
//! encoding <label>        (only when set)
//!
//! <message bytes>
//! ```
//!
//! The digest over this body is owned by the object store (see
//! [`crate::backend::ObjectStore::hash_commit`]).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from parsing or validating model values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// The string is not a 40-character hex object id.
    #[error("invalid object id {input:?}: {reason}")]
    InvalidObjectId {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The signature is malformed.
    #[error("invalid signature {input:?}: {reason}")]
    InvalidSignature {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The timestamp could not be parsed or is out of range.
    #[error("invalid timestamp {input:?}: {reason}")]
    InvalidTimestamp {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// ObjectId
// ---------------------------------------------------------------------------

/// Fixed-width content digest identifying a commit.
///
/// Ordering is byte-wise, which is also the order of the hex rendering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; ObjectId::LEN]);

impl ObjectId {
    /// Width of a digest in bytes.
    pub const LEN: usize = 20;

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Build an id from a byte slice, failing on the wrong length.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidObjectId`] if `bytes` is not exactly
    /// [`ObjectId::LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        let array: [u8; Self::LEN] =
            bytes
                .try_into()
                .map_err(|_| ModelError::InvalidObjectId {
                    input: hex::encode(bytes),
                    reason: format!("expected {} bytes, got {}", Self::LEN, bytes.len()),
                })?;
        Ok(Self(array))
    }

    /// Parse a 40-character hex id (either case).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidObjectId`] for bad hex or bad length.
    pub fn from_hex(input: &str) -> Result<Self, ModelError> {
        let bytes = hex::decode(input).map_err(|e| ModelError::InvalidObjectId {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes).map_err(|_| ModelError::InvalidObjectId {
            input: input.to_string(),
            reason: format!("expected {} hex characters", Self::LEN * 2),
        })
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated 12-character form for logs and terminal output.
    #[must_use]
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl FromStr for ObjectId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A `(name, email)` identity attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    name: String,
    email: String,
}

impl Signature {
    /// Build a validated signature.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidSignature`] when the name is blank, the
    /// email is empty, or either contains `<`, `>` or a line break. Any of
    /// those would corrupt the commit header line.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Result<Self, ModelError> {
        let name = name.into();
        let email = email.into();
        let rendered = format!("{name} <{email}>");

        let invalid = |reason| ModelError::InvalidSignature {
            input: rendered.clone(),
            reason,
        };

        if name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if email.trim().is_empty() {
            return Err(invalid("email is empty"));
        }
        if has_header_breaking_char(&name) {
            return Err(invalid("name contains '<', '>' or a line break"));
        }
        if has_header_breaking_char(&email) {
            return Err(invalid("email contains '<', '>' or a line break"));
        }

        Ok(Self {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
        })
    }

    /// Wrap a signature read back from storage without validation.
    ///
    /// Stored history can carry identities that would not pass
    /// [`Signature::new`]; they are carried through a rewrite unchanged.
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse the `Name <email>` form.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidSignature`] if the angle brackets are
    /// missing or the parts fail validation.
    pub fn parse(input: &str) -> Result<Self, ModelError> {
        let trimmed = input.trim();
        let (Some(open), Some(close)) = (trimmed.find('<'), trimmed.rfind('>')) else {
            return Err(ModelError::InvalidSignature {
                input: input.to_string(),
                reason: "expected the form `Name <email>`",
            });
        };
        if close != trimmed.len() - 1 || close < open {
            return Err(ModelError::InvalidSignature {
                input: input.to_string(),
                reason: "expected the form `Name <email>`",
            });
        }

        Self::new(&trimmed[..open], &trimmed[open + 1..close])
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Email address.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

impl FromStr for Signature {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn has_header_breaking_char(value: &str) -> bool {
    value.contains(&['<', '>', '\n', '\r'][..])
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Seconds since the Unix epoch plus the timezone offset it was recorded in.
///
/// Chronology is decided by [`Timestamp::seconds`] alone; the offset is
/// presentation. One second is the smallest representable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: i64,
    offset_minutes: i32,
}

impl Timestamp {
    /// Build a timestamp from epoch seconds and an offset in minutes.
    #[must_use]
    pub const fn new(seconds: i64, offset_minutes: i32) -> Self {
        Self {
            seconds,
            offset_minutes,
        }
    }

    /// Build a UTC timestamp.
    #[must_use]
    pub const fn utc(seconds: i64) -> Self {
        Self::new(seconds, 0)
    }

    /// The current time in UTC.
    #[must_use]
    pub fn now() -> Self {
        Self::utc(Utc::now().timestamp())
    }

    /// Epoch seconds.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Offset from UTC in minutes.
    #[must_use]
    pub const fn offset_minutes(&self) -> i32 {
        self.offset_minutes
    }

    /// Same offset, different instant.
    #[must_use]
    pub const fn with_seconds(self, seconds: i64) -> Self {
        Self::new(seconds, self.offset_minutes)
    }

    /// Parse an RFC 3339 date-time, keeping its offset.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTimestamp`] if `input` is not RFC 3339.
    pub fn parse_rfc3339(input: &str) -> Result<Self, ModelError> {
        let parsed =
            DateTime::parse_from_rfc3339(input).map_err(|e| ModelError::InvalidTimestamp {
                input: input.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from(parsed))
    }

    /// Convert to a chrono date-time in the recorded offset.
    ///
    /// Returns `None` when the offset or instant is outside chrono's range.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.offset_minutes.checked_mul(60)?)?;
        offset.timestamp_opt(self.seconds, 0).single()
    }

    /// Render as `<secs> <+hhmm>`, the form used in commit headers.
    #[must_use]
    pub fn git_format(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let abs = self.offset_minutes.unsigned_abs();
        format!("{} {sign}{:02}{:02}", self.seconds, abs / 60, abs % 60)
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::new(value.timestamp(), value.offset().local_minus_utc() / 60)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::utc(value.timestamp())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => f.write_str(&self.git_format()),
        }
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Everything that feeds a commit's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    /// Content snapshot the commit points at. Never changed by a rewrite.
    pub tree: ObjectId,
    /// Parent ids in recorded order; empty for a root commit.
    pub parents: Vec<ObjectId>,
    /// Who wrote the change.
    pub author: Signature,
    /// Who recorded the change.
    pub committer: Signature,
    /// When the change was written.
    pub author_time: Timestamp,
    /// When the change was recorded. Chronology checks use this field.
    pub commit_time: Timestamp,
    /// Optional `encoding` header carried through unchanged.
    pub encoding: Option<String>,
    /// Opaque message bytes.
    pub message: Vec<u8>,
}

impl CommitData {
    /// Serialize to the canonical commit body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(160 + self.parents.len() * 48 + self.message.len());
        push_line(&mut out, "tree", &self.tree.to_hex());
        for parent in &self.parents {
            push_line(&mut out, "parent", &parent.to_hex());
        }
        push_line(
            &mut out,
            "author",
            &format!("{} {}", self.author, self.author_time.git_format()),
        );
        push_line(
            &mut out,
            "committer",
            &format!("{} {}", self.committer, self.commit_time.git_format()),
        );
        if let Some(encoding) = &self.encoding {
            push_line(&mut out, "encoding", encoding);
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    /// First line of the message, lossily decoded, for display.
    #[must_use]
    pub fn summary(&self) -> String {
        let end = self
            .message
            .iter()
            .position(|b| *b == b'\n')
            .unwrap_or(self.message.len());
        String::from_utf8_lossy(&self.message[..end]).into_owned()
    }
}

fn push_line(out: &mut Vec<u8>, key: &str, value: &str) {
    out.extend_from_slice(key.as_bytes());
    out.push(b' ');
    out.extend_from_slice(value.as_bytes());
    out.push(b'\n');
}

/// A commit together with the identity its content hashes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitNode {
    /// Content digest of [`CommitNode::data`].
    pub id: ObjectId,
    /// The commit's content.
    pub data: CommitData,
}

impl CommitNode {
    /// Parent ids, in recorded order.
    #[must_use]
    pub fn parents(&self) -> &[ObjectId] {
        &self.data.parents
    }

    /// Returns `true` for a commit with no parents.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.data.parents.is_empty()
    }
}

/// A named pointer at a commit, e.g. `refs/heads/main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Full reference name.
    pub name: String,
    /// Commit the reference points at.
    pub target: ObjectId,
}

impl Reference {
    /// Build a reference.
    #[must_use]
    pub fn new(name: impl Into<String>, target: ObjectId) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// The name with `refs/heads/`, `refs/tags/` or `refs/` stripped.
    #[must_use]
    pub fn short_name(&self) -> &str {
        short_ref_name(&self.name)
    }
}

/// Strip the well-known namespace prefix from a reference name.
#[must_use]
pub fn short_ref_name(name: &str) -> &str {
    name.strip_prefix("refs/heads/")
        .or_else(|| name.strip_prefix("refs/tags/"))
        .or_else(|| name.strip_prefix("refs/"))
        .unwrap_or(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
