//! Rewrite policy: the per-commit metadata transform.
//!
//! A [`RewritePolicy`] is built once per pass from a [`PolicyConfig`] and
//! then asked, commit by commit in topological order, for the new
//! identities and timestamps. Configuration problems surface in
//! [`RewritePolicy::new`], before any commit is visited.
//!
//! # Identity precedence
//!
//! explicit override > identity map (keyed by original email, case
//! insensitive) > original value.
//!
//! # Date modes
//!
//! | Mode | Result |
//! |---|---|
//! | [`DateMode::Preserve`] | timestamps unchanged |
//! | [`DateMode::RandomizeChronological`] | uniform in `(floor, upper]`, `floor + 1` when empty |
//! | [`DateMode::Distribute`] | sorted samples over the window, raised above parents |
//!
//! `floor` is the latest new commit time among the parents, or the lower
//! bound for a root. Both randomizing modes put the same instant in the
//! author and committer fields and keep each field's original offset.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{CommitNode, ModelError, Signature, Timestamp};

/// Default width of the date window when no lower bound is configured.
pub const DEFAULT_WINDOW_DAYS: i64 = 365;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from building or applying a policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// A replacement identity would corrupt the commit header.
    #[error(transparent)]
    InvalidSignature(#[from] ModelError),

    /// The date window is empty or inverted.
    #[error("date window is empty: lower bound {lower} is not before upper bound {upper}")]
    InvalidDateWindow {
        /// Configured or defaulted lower bound.
        lower: Timestamp,
        /// Configured or defaulted upper bound.
        upper: Timestamp,
    },

    /// An identity map key is not a usable email.
    #[error("identity map key {key:?} is not an email address")]
    InvalidIdentityKey {
        /// The rejected key.
        key: String,
    },

    /// Advancing past a parent would leave the representable range.
    #[error("timestamp overflow advancing past {floor}")]
    DateOverflow {
        /// Epoch seconds of the latest parent.
        floor: i64,
    },
}

// ---------------------------------------------------------------------------
// DateMode
// ---------------------------------------------------------------------------

/// How commit timestamps are rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateMode {
    /// Keep the original timestamps.
    #[default]
    #[serde(rename = "preserve")]
    Preserve,
    /// Draw each timestamp uniformly above the latest parent.
    #[serde(rename = "randomize")]
    RandomizeChronological,
    /// Spread sorted samples across the window, then enforce chronology.
    #[serde(rename = "distribute")]
    Distribute,
}

impl DateMode {
    /// Returns `true` for the modes that replace timestamps.
    #[must_use]
    pub const fn randomizes(self) -> bool {
        !matches!(self, Self::Preserve)
    }
}

impl fmt::Display for DateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preserve => "preserve",
            Self::RandomizeChronological => "randomize",
            Self::Distribute => "distribute",
        })
    }
}

impl FromStr for DateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" | "keep" => Ok(Self::Preserve),
            "randomize" | "random" | "randomize-chronological" => Ok(Self::RandomizeChronological),
            "distribute" | "spread" => Ok(Self::Distribute),
            other => Err(format!(
                "unknown date mode '{other}' (expected preserve, randomize or distribute)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Everything a policy needs, as handed over by the configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Replaces every author.
    pub author_override: Option<Signature>,
    /// Replaces every committer.
    pub committer_override: Option<Signature>,
    /// Original email (any case) -> replacement identity.
    pub identity_map: BTreeMap<String, Signature>,
    /// Timestamp rewrite mode.
    pub date_mode: DateMode,
    /// Generator seed; drawn from OS entropy when absent.
    pub seed: Option<u64>,
    /// Window start (exclusive). Defaults to 365 days before the upper bound.
    pub lower_bound: Option<Timestamp>,
    /// Window end (inclusive). Defaults to now.
    pub upper_bound: Option<Timestamp>,
}

/// New metadata for one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMetadata {
    pub author: Signature,
    pub committer: Signature,
    pub author_time: Timestamp,
    pub commit_time: Timestamp,
}

// ---------------------------------------------------------------------------
// RewritePolicy
// ---------------------------------------------------------------------------

/// A validated, seeded policy for one rewrite pass.
#[derive(Debug, Clone)]
pub struct RewritePolicy {
    author_override: Option<Signature>,
    committer_override: Option<Signature>,
    identity_map: BTreeMap<String, Signature>,
    date_mode: DateMode,
    lower: Timestamp,
    upper: Timestamp,
    seed: u64,
    rng: ChaCha8Rng,
    planned: VecDeque<i64>,
}

impl RewritePolicy {
    /// Validate `config` and seed the generator.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::InvalidSignature`] for a malformed replacement
    ///   identity.
    /// - [`PolicyError::InvalidIdentityKey`] for an identity map key with no
    ///   `@`.
    /// - [`PolicyError::InvalidDateWindow`] when the lower bound is not
    ///   strictly before the upper bound.
    pub fn new(config: PolicyConfig) -> Result<Self, PolicyError> {
        let author_override = config.author_override.map(revalidate).transpose()?;
        let committer_override = config.committer_override.map(revalidate).transpose()?;

        let mut identity_map = BTreeMap::new();
        for (key, signature) in config.identity_map {
            let normalized = key.trim().to_lowercase();
            if normalized.is_empty() || !normalized.contains('@') {
                return Err(PolicyError::InvalidIdentityKey { key });
            }
            identity_map.insert(normalized, revalidate(signature)?);
        }

        let upper = config.upper_bound.unwrap_or_else(Timestamp::now);
        let lower = config.lower_bound.unwrap_or_else(|| {
            upper.with_seconds(
                upper
                    .seconds()
                    .saturating_sub(Duration::days(DEFAULT_WINDOW_DAYS).num_seconds()),
            )
        });
        if lower.seconds() >= upper.seconds() {
            return Err(PolicyError::InvalidDateWindow { lower, upper });
        }

        let seed = config.seed.unwrap_or_else(rand::random::<u64>);
        debug!(
            mode = %config.date_mode,
            seed,
            lower = %lower,
            upper = %upper,
            identities = identity_map.len(),
            "rewrite policy ready"
        );

        Ok(Self {
            author_override,
            committer_override,
            identity_map,
            date_mode: config.date_mode,
            lower,
            upper,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            planned: VecDeque::new(),
        })
    }

    /// The seed in use; reported so the pass can be reproduced.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// The date mode in use.
    #[must_use]
    pub const fn date_mode(&self) -> DateMode {
        self.date_mode
    }

    /// Effective `(lower, upper)` window.
    #[must_use]
    pub const fn window(&self) -> (Timestamp, Timestamp) {
        (self.lower, self.upper)
    }

    /// Announce how many commits the pass will visit.
    ///
    /// [`DateMode::Distribute`] draws all of its samples here; the other
    /// modes ignore the call.
    pub fn prepare(&mut self, commits: usize) {
        self.planned.clear();
        if self.date_mode != DateMode::Distribute {
            return;
        }
        let mut samples: Vec<i64> = (0..commits).map(|_| self.draw_in_window()).collect();
        samples.sort_unstable();
        self.planned = samples.into();
    }

    /// Compute new metadata for `node`.
    ///
    /// `parent_times` are the new commit times of the node's parents, in
    /// any order; empty for a root.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::DateOverflow`] if a parent sits at the end of
    /// the representable range.
    pub fn apply(
        &mut self,
        node: &CommitNode,
        parent_times: &[Timestamp],
    ) -> Result<NewMetadata, PolicyError> {
        let data = &node.data;
        let author = self
            .author_override
            .clone()
            .or_else(|| self.mapped(data.author.email()))
            .unwrap_or_else(|| data.author.clone());
        let committer = self
            .committer_override
            .clone()
            .or_else(|| self.mapped(data.committer.email()))
            .unwrap_or_else(|| data.committer.clone());

        let latest_parent = parent_times.iter().map(Timestamp::seconds).max();
        let (author_time, commit_time) = match self.date_mode {
            DateMode::Preserve => (data.author_time, data.commit_time),
            DateMode::RandomizeChronological => {
                let floor = latest_parent.unwrap_or(self.lower.seconds());
                let instant = self.draw_above(floor)?;
                (
                    data.author_time.with_seconds(instant),
                    data.commit_time.with_seconds(instant),
                )
            }
            DateMode::Distribute => {
                let sample = match self.planned.pop_front() {
                    Some(sample) => sample,
                    None => self.draw_in_window(),
                };
                let instant = match latest_parent {
                    Some(floor) => sample.max(advance(floor)?),
                    None => sample,
                };
                (
                    data.author_time.with_seconds(instant),
                    data.commit_time.with_seconds(instant),
                )
            }
        };

        Ok(NewMetadata {
            author,
            committer,
            author_time,
            commit_time,
        })
    }

    fn mapped(&self, email: &str) -> Option<Signature> {
        if self.identity_map.is_empty() {
            return None;
        }
        self.identity_map
            .get(&email.trim().to_lowercase())
            .cloned()
    }

    /// Uniform in `(floor, upper]`, or `floor + 1` when that is empty.
    fn draw_above(&mut self, floor: i64) -> Result<i64, PolicyError> {
        let low = advance(floor)?;
        let high = self.upper.seconds();
        if low > high {
            return Ok(low);
        }
        Ok(self.rng.gen_range(low..=high))
    }

    fn draw_in_window(&mut self) -> i64 {
        let low = self.lower.seconds().saturating_add(1);
        self.rng.gen_range(low..=self.upper.seconds())
    }
}

fn advance(floor: i64) -> Result<i64, PolicyError> {
    floor
        .checked_add(1)
        .ok_or(PolicyError::DateOverflow { floor })
}

/// Re-run validation on a signature that may have been deserialized.
fn revalidate(signature: Signature) -> Result<Signature, PolicyError> {
    Ok(Signature::new(signature.name(), signature.email())?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
