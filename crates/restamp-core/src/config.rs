use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::RestampError;
use crate::model::{Signature, Timestamp};
use crate::pipeline::RewriteRequest;
use crate::policy::{DateMode, PolicyConfig};

/// One layer of rewrite settings: a config file, or the command line.
///
/// Every field is optional so layers can be stacked with [`FileConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// `Name <email>` applied to every author (and committer, unless
    /// `committer` is also set).
    pub author: Option<String>,
    pub committer: Option<String>,
    pub date_mode: Option<DateMode>,
    pub seed: Option<u64>,
    /// RFC 3339 lower bound of the date window.
    pub since: Option<String>,
    /// RFC 3339 upper bound of the date window.
    pub until: Option<String>,
    /// Original email -> `Name <email>`.
    pub identities: BTreeMap<String, String>,
    /// Old short branch name -> new short branch name.
    pub rename_branches: BTreeMap<String, String>,
    pub push_remote: Option<String>,
}

impl FileConfig {
    /// Stack `over` on top of `self`. Scalars from `over` win when set;
    /// tables are merged key by key.
    #[must_use]
    pub fn merge(mut self, over: Self) -> Self {
        self.author = over.author.or(self.author);
        self.committer = over.committer.or(self.committer);
        self.date_mode = over.date_mode.or(self.date_mode);
        self.seed = over.seed.or(self.seed);
        self.since = over.since.or(self.since);
        self.until = over.until.or(self.until);
        self.push_remote = over.push_remote.or(self.push_remote);
        self.identities.extend(over.identities);
        self.rename_branches.extend(over.rename_branches);
        self
    }

    /// Parse and validate into a pass request.
    ///
    /// A lone `author` also becomes the committer.
    ///
    /// # Errors
    ///
    /// Returns [`RestampError::Policy`] for malformed identities or dates.
    pub fn to_request(&self, dry_run: bool) -> Result<RewriteRequest, RestampError> {
        let author_override = self.author.as_deref().map(Signature::parse).transpose()?;
        let committer_override = match self.committer.as_deref() {
            Some(raw) => Some(Signature::parse(raw)?),
            None => author_override.clone(),
        };

        let mut identity_map = BTreeMap::new();
        for (email, raw) in &self.identities {
            identity_map.insert(email.clone(), Signature::parse(raw)?);
        }

        let policy = PolicyConfig {
            author_override,
            committer_override,
            identity_map,
            date_mode: self.date_mode.unwrap_or_default(),
            seed: self.seed,
            lower_bound: self.since.as_deref().map(Timestamp::parse_rfc3339).transpose()?,
            upper_bound: self.until.as_deref().map(Timestamp::parse_rfc3339).transpose()?,
        };

        Ok(RewriteRequest {
            policy,
            renames: self.rename_branches.clone(),
            dry_run,
        })
    }
}

/// Location of the per-user config file, if the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("restamp/config.toml"))
}

/// Load a config file that must exist.
///
/// # Errors
///
/// Fails if the file cannot be read or is not valid TOML for [`FileConfig`].
pub fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<FileConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load the per-user config, or defaults when there is none.
///
/// # Errors
///
/// Fails if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<FileConfig> {
    match user_config_path() {
        Some(path) if path.exists() => load_config_file(&path),
        _ => Ok(FileConfig::default()),
    }
}

/// Resolve every layer: user config, then `explicit` file, then `cli`.
///
/// # Errors
///
/// Fails if a present config file cannot be read or parsed.
pub fn resolve_config(explicit: Option<&Path>, cli: FileConfig) -> Result<FileConfig> {
    let mut config = load_user_config()?;
    if let Some(path) = explicit {
        config = config.merge(load_config_file(path)?);
    }
    Ok(config.merge(cli))
}
