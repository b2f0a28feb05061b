//! URL canonicalization
//!
//! Produces the [`UrlKey`] used to deduplicate URLs within a crawl:
//! - Resolves relative references against the page they were found on
//! - Lower-cases scheme and host, drops default ports and fragments
//! - Removes trailing slashes from non-root paths
//! - Strips tracking parameters and sorts the remaining query pairs

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::types::UrlKey;

/// Tracking/session query parameters stripped by default
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "dclid",
    "msclkid",
    "yclid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "sid",
    "sessionid",
];

/// Errors produced while normalizing a URL
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Configuration for the normalizer
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Query parameters removed from the key (case-insensitive)
    pub tracking_params: Vec<String>,
    /// Query parameters never removed, even if listed in `tracking_params`
    pub keep_params: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            tracking_params: DEFAULT_TRACKING_PARAMS.iter().map(|p| p.to_string()).collect(),
            keep_params: Vec::new(),
        }
    }
}

/// A normalized URL: the dedup key plus the absolute URL to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub key: UrlKey,
    /// Absolute URL with the fragment removed
    pub url: Url,
}

/// URL normalizer
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    tracking: HashSet<String>,
    keep: HashSet<String>,
}

impl UrlNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            tracking: config.tracking_params.iter().map(|p| p.to_lowercase()).collect(),
            keep: config.keep_params.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Normalize `raw`, resolving it against `base` when it is relative.
    pub fn normalize(&self, raw: &str, base: Option<&Url>) -> Result<NormalizedUrl, NormalizeError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(NormalizeError::InvalidUrl {
                url: raw.to_string(),
                reason: "empty".to_string(),
            });
        }

        let parsed = match base {
            Some(base) => base.join(raw),
            None => Url::parse(raw),
        }
        .map_err(|e| NormalizeError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        let mut url = parsed;
        url.set_fragment(None);

        let key = self.key_for(&url)?;
        Ok(NormalizedUrl { key, url })
    }

    /// Compute the canonical key of an absolute URL.
    pub fn key_for(&self, url: &Url) -> Result<UrlKey, NormalizeError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(NormalizeError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(NormalizeError::MissingHost(url.to_string()));
        }

        // Scheme and host are already lower-cased, and default ports
        // dropped, by the URL parser.
        let mut canonical = url.clone();
        canonical.set_fragment(None);

        let path = canonical.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            canonical.set_path(path.trim_end_matches('/'));
            if canonical.path().is_empty() {
                canonical.set_path("/");
            }
        }

        let mut params: Vec<(String, String)> = canonical
            .query_pairs()
            .filter(|(k, _)| !self.is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if params.is_empty() {
            canonical.set_query(None);
        } else {
            params.sort();
            canonical.query_pairs_mut().clear().extend_pairs(params);
        }

        Ok(UrlKey::from_canonical(canonical.as_str()))
    }

    fn is_tracking_param(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        if self.keep.contains(&key) {
            return false;
        }
        self.tracking.contains(&key) || key.starts_with("utm_")
    }
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}
