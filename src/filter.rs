//! Candidate noise removal: denylisted hosts, non-document URLs, duplicates.

use std::collections::HashSet;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::ConfigError;
use crate::types::Candidate;

/// Compiles host patterns into one case-insensitive set. A bare domain such as
/// `facebook.com` also matches every subdomain (`m.facebook.com`).
pub(crate) fn host_pattern_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref().trim().to_ascii_lowercase();
        if pattern.is_empty() {
            continue;
        }
        let mut expanded = vec![pattern.clone()];
        if !pattern.contains(['*', '?', '[', '{']) {
            expanded.push(format!("*.{pattern}"));
        }
        for glob in expanded {
            let compiled = GlobBuilder::new(&glob)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::DomainPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            builder.add(compiled);
        }
    }
    builder.build().map_err(|source| ConfigError::DomainPattern {
        pattern: "<set>".into(),
        source,
    })
}

pub(crate) fn host_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    parsed.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase())
}

#[derive(Debug)]
pub struct NoiseFilter {
    denylist: GlobSet,
    blocked_extensions: Vec<String>,
}

impl NoiseFilter {
    pub fn new<S: AsRef<str>>(denylist: &[S], blocked_extensions: &[S]) -> Result<Self, ConfigError> {
        Ok(Self {
            denylist: host_pattern_set(denylist)?,
            blocked_extensions: blocked_extensions
                .iter()
                .map(|e| e.as_ref().trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.social_media_denylist.as_slice(),
            config.blocked_extensions.as_slice(),
        )
    }

    /// Order-preserving and idempotent. The first occurrence of a URL wins.
    pub fn filter(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let before = candidates.len();
        let mut seen = HashSet::new();
        let kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| self.is_allowed(&c.url))
            .filter(|c| seen.insert(c.url.clone()))
            .collect();
        debug!(before, after = kept.len(), "noise filtered");
        kept
    }

    fn is_allowed(&self, raw: &str) -> bool {
        let Ok(parsed) = url::Url::parse(raw) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if self.denylist.is_match(&host) {
            return false;
        }
        let path = parsed.path().to_ascii_lowercase();
        !self
            .blocked_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
    }
}
