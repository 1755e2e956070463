//! Per-content-type header policies.
//!
//! A policy table maps a content type to the cache and transfer headers
//! attached when an object of that type is uploaded. The `default` key is
//! used when no exact content type is registered.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, SyncError};

/// Key of the fallback policy.
pub const DEFAULT_POLICY_KEY: &str = "default";

/// Declared caching policy for one content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CachePolicy {
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    /// Absolute expiry.
    pub expires: Option<DateTime<Utc>>,
    /// Expiry relative to the time the policy is resolved, in seconds.
    pub expires_in: Option<i64>,
    pub content_encoding: Option<String>,
}

impl CachePolicy {
    /// Serialize the cache-control directives in their fixed order.
    ///
    /// Returns `None` when no directive is declared so callers omit the
    /// header instead of sending an empty one.
    pub fn cache_control(&self) -> Option<String> {
        let mut directives = Vec::new();

        if let Some(max_age) = self.max_age {
            directives.push(format!("max-age={}", max_age));
        }
        if let Some(s_maxage) = self.s_maxage {
            directives.push(format!("s-maxage={}", s_maxage));
        }
        let flags = [
            (self.public, "public"),
            (self.private, "private"),
            (self.no_cache, "no-cache"),
            (self.no_store, "no-store"),
            (self.must_revalidate, "must-revalidate"),
            (self.proxy_revalidate, "proxy-revalidate"),
        ];
        directives.extend(flags.iter().filter(|(set, _)| *set).map(|(_, name)| name.to_string()));

        if directives.is_empty() {
            None
        } else {
            Some(directives.join(", "))
        }
    }

    /// Expiry timestamp as of `now`. An absolute expiry wins over an offset.
    /// An offset that overflows the calendar yields no expiry.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires.or_else(|| {
            self.expires_in
                .and_then(TimeDelta::try_seconds)
                .and_then(|offset| now.checked_add_signed(offset))
        })
    }

    /// Reject values that cannot produce a header. `name` is the table key.
    pub fn validate(&self, name: &str) -> Result<()> {
        if let Some(secs) = self.expires_in {
            let in_range = TimeDelta::try_seconds(secs)
                .and_then(|offset| Utc::now().checked_add_signed(offset))
                .is_some();
            if !in_range {
                return Err(SyncError::config(format!(
                    "caching_policies.\"{}\".expires_in is out of range: {}",
                    name, secs
                )));
            }
        }
        Ok(())
    }
}

/// Headers resolved for a single upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPolicy {
    pub content_type: String,
    pub cache_control: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub content_encoding: Option<String>,
}

impl HeaderPolicy {
    /// `Expires` header value.
    pub fn expires_header(&self) -> Option<String> {
        self.expires.map(http_date)
    }

    /// Whether no extra header would be sent.
    pub fn is_empty(&self) -> bool {
        self.cache_control.is_none() && self.expires.is_none() && self.content_encoding.is_none()
    }
}

/// Format a timestamp as an RFC 7231 HTTP-date.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Content type → policy mapping with a `default` fallback.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, CachePolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(content type or "default", policy)` pairs.
    pub fn from_map(map: &HashMap<String, CachePolicy>) -> Self {
        let mut table = Self::new();
        for (content_type, policy) in map {
            table.register(content_type, policy.clone());
        }
        table
    }

    /// Store or overwrite the policy for `content_type`.
    pub fn register(&mut self, content_type: &str, policy: CachePolicy) {
        self.policies.insert(normalize_content_type(content_type), policy);
    }

    pub fn register_default(&mut self, policy: CachePolicy) {
        self.register(DEFAULT_POLICY_KEY, policy);
    }

    /// The exact policy, else the default, else `None`.
    pub fn lookup(&self, content_type: &str) -> Option<&CachePolicy> {
        self.policies
            .get(&normalize_content_type(content_type))
            .or_else(|| self.policies.get(DEFAULT_POLICY_KEY))
    }

    /// Resolve headers for `content_type` using the current time for offsets.
    pub fn resolve(&self, content_type: &str) -> HeaderPolicy {
        self.resolve_at(content_type, Utc::now())
    }

    /// Resolve headers for `content_type` as of `now`.
    ///
    /// A miss with no default is not an error: it resolves to no headers.
    pub fn resolve_at(&self, content_type: &str, now: DateTime<Utc>) -> HeaderPolicy {
        match self.lookup(content_type) {
            Some(policy) => HeaderPolicy {
                content_type: content_type.to_string(),
                cache_control: policy.cache_control(),
                expires: policy.expires_at(now),
                content_encoding: policy.content_encoding.clone(),
            },
            None => HeaderPolicy {
                content_type: content_type.to_string(),
                ..HeaderPolicy::default()
            },
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Lowercase, trimmed, without parameters (`text/html; charset=utf-8` → `text/html`).
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
