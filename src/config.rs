//! Sync configuration.
//!
//! Options are loaded from a TOML file (or built in code), validated once
//! when a run starts, and read-only afterwards.
//!
//! ```toml
//! build_dir = "build"
//! bucket = "www.example.com"
//! region = "eu-west-1"
//! delete = true
//! prefer_gzip = true
//! exclude = ["*.map", "drafts/**"]
//!
//! [concurrency]
//! transfer = 16
//!
//! [caching_policies.default]
//! max_age = 86400
//! public = true
//!
//! [caching_policies."text/html"]
//! no_cache = true
//! must_revalidate = true
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::sync::exclude::ExcludePatterns;
use crate::sync::policy::{CachePolicy, PolicyTable};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Static credentials. When absent the store uses the ambient AWS chain.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Worker pool sizes for the three parallel phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Concurrency {
    /// Timestamp pre-filter (may stat remote objects).
    pub evaluate: usize,
    /// Local checksums.
    pub checksum: usize,
    /// Uploads and deletes.
    pub transfer: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            evaluate: DEFAULT_CONCURRENCY,
            checksum: DEFAULT_CONCURRENCY,
            transfer: DEFAULT_CONCURRENCY,
        }
    }
}

impl Concurrency {
    /// Same limit for every phase.
    pub fn uniform(limit: usize) -> Self {
        Self { evaluate: limit, checksum: limit, transfer: limit }
    }

    /// Raise any zero limit to one; a zero pool would otherwise be unbounded.
    pub fn at_least_one(self) -> Self {
        Self {
            evaluate: self.evaluate.max(1),
            checksum: self.checksum.max(1),
            transfer: self.transfer.max(1),
        }
    }
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Resolved options for one sync run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncOptions {
    pub build_dir: PathBuf,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Endpoint for S3-compatible providers.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Push every local file regardless of remote state.
    #[serde(default)]
    pub force: bool,
    /// Delete remote objects with no local counterpart.
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Upload `<file>.gz` siblings in place of `<file>`.
    #[serde(default)]
    pub prefer_gzip: bool,
    /// Compute and report the plan without touching the bucket.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub concurrency: Concurrency,
    #[serde(default)]
    pub requests_per_second: Option<u32>,
    /// Content type (or `default`) → caching policy.
    #[serde(default)]
    pub caching_policies: HashMap<String, CachePolicy>,
}

impl SyncOptions {
    /// Options with defaults for everything but the build dir and bucket.
    pub fn new(build_dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            build_dir: build_dir.into(),
            bucket: bucket.into(),
            region: default_region(),
            prefix: None,
            endpoint: None,
            credentials: None,
            force: false,
            delete: false,
            exclude: Vec::new(),
            prefer_gzip: false,
            dry_run: false,
            concurrency: Concurrency::default(),
            requests_per_second: None,
            caching_policies: HashMap::new(),
        }
    }

    /// Parse options from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SyncError::config(e.to_string()))
    }

    /// Load options from a TOML file.
    ///
    /// A relative `build_dir` is resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::from_io_error(e, "reading config file", Some(path.to_path_buf())))?;
        let mut options = Self::from_toml(&content)?;

        if options.build_dir.is_relative() {
            if let Some(parent) = path.parent() {
                options.build_dir = parent.join(&options.build_dir);
            }
        }
        Ok(options)
    }

    /// Check everything that can be checked before touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(SyncError::config("bucket must not be empty"));
        }
        if self.build_dir.as_os_str().is_empty() {
            return Err(SyncError::config("build_dir must not be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(SyncError::config("region must not be empty"));
        }
        if let Some(credentials) = &self.credentials {
            if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
                return Err(SyncError::config(
                    "credentials need both access_key_id and secret_access_key",
                ));
            }
        }

        let c = self.concurrency;
        for (phase, limit) in [("evaluate", c.evaluate), ("checksum", c.checksum), ("transfer", c.transfer)] {
            if limit == 0 {
                return Err(SyncError::config(format!(
                    "concurrency.{} must be at least 1",
                    phase
                )));
            }
        }

        for (name, policy) in &self.caching_policies {
            policy.validate(name)?;
        }

        self.exclude_patterns()?;
        Ok(())
    }

    /// Compile the exclude patterns.
    pub fn exclude_patterns(&self) -> Result<ExcludePatterns> {
        ExcludePatterns::from_patterns(&self.exclude)
    }

    /// Build the header policy table.
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::from_map(&self.caching_policies)
    }
}
