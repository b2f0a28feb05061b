//! Core types for the crawl engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::config::CrawlConfig;

/// Unique identifier for a crawl job
pub type JobId = Uuid;

/// Identifier of the project that owns a crawl (assigned by the application layer)
pub type ProjectId = String;

// ============================================================================
// URL identity
// ============================================================================

/// Canonical URL string used for deduplication.
///
/// Two URLs with the same key are the same resource for the purposes of a
/// crawl. Keys are produced by [`crate::scraping::UrlNormalizer`]; ordering is
/// lexicographic, which is what paginated storage iterates by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlKey(String);

impl UrlKey {
    /// Wrap an already-canonical string.
    pub fn from_canonical(canonical: impl Into<String>) -> Self {
        UrlKey(canonical.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 64-bit fingerprint of the key
    pub fn fingerprint(&self) -> u64 {
        crate::util::fast_hash(&self.0)
    }
}

impl fmt::Display for UrlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UrlKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Content identity
// ============================================================================

/// Exact content hash using SHA256 (64-character hex string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute SHA256 hash of content
    pub fn compute(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let result = hasher.finalize();
        ContentHash(hex::encode(result))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Page nodes and link edges
// ============================================================================

/// A heading from the page outline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    /// 1 for `<h1>` through 6 for `<h6>`
    pub level: u8,
    pub text: String,
}

/// One hop of a redirect chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub url: String,
    pub status: u16,
}

/// Directives from `<meta name="robots">`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsMeta {
    pub noindex: bool,
    pub nofollow: bool,
}

/// Timing reported by the JS render service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderTiming {
    pub load_time_ms: u64,
    pub dom_content_loaded_ms: u64,
    pub response_time_ms: u64,
}

/// Category of a per-page or job-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidUrl,
    RobotsDisallowed,
    FetchTimeout,
    ConnectionError,
    TooManyRedirects,
    DisallowedContentType,
    ContentTooLarge,
    HttpError,
    RenderServiceTimeout,
    StorageWriteFailure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::RobotsDisallowed => "robots_disallowed",
            Self::FetchTimeout => "fetch_timeout",
            Self::ConnectionError => "connection_error",
            Self::TooManyRedirects => "too_many_redirects",
            Self::DisallowedContentType => "disallowed_content_type",
            Self::ContentTooLarge => "content_too_large",
            Self::HttpError => "http_error",
            Self::RenderServiceTimeout => "render_service_timeout",
            Self::StorageWriteFailure => "storage_write_failure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error recorded on a page node whose fetch failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageError {
    pub category: ErrorCategory,
    pub message: String,
}

/// SEO metadata extracted alongside the core page fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeoMetadata {
    pub canonical_url: Option<String>,
    pub meta_robots: RobotsMeta,
    pub og_tags: BTreeMap<String, String>,
    pub lang: Option<String>,
    pub images_count: usize,
    pub images_missing_alt: usize,
    pub internal_links: usize,
    pub external_links: usize,
    pub text_to_html_ratio: f64,
    pub page_size_bytes: usize,
}

/// A fetched (or failed) page within one crawl job.
///
/// Nodes are keyed by `(url_key, crawl_job_id)`; a re-crawl writes a new node
/// under the new job rather than mutating the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageNode {
    pub url_key: UrlKey,
    pub crawl_job_id: JobId,
    /// URL as requested
    pub url: String,
    /// URL after redirects (or JS navigation)
    pub final_url: Option<String>,
    pub depth: u32,
    /// `None` when no HTTP response was received
    pub http_status: Option<u16>,
    pub error: Option<PageError>,
    pub fetched_at: DateTime<Utc>,
    pub response_time_ms: u64,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub headings: Vec<Heading>,
    pub word_count: usize,
    /// 64-bit SimHash of the normalized body text
    pub content_fingerprint: Option<u64>,
    pub content_hash: Option<ContentHash>,
    pub outbound_link_keys: Vec<UrlKey>,
    pub redirect_chain: Vec<RedirectHop>,
    pub seo: SeoMetadata,
    pub js_rendered: bool,
    pub js_render_failed: bool,
    pub render_timing: Option<RenderTiming>,
}

impl PageNode {
    /// Node for a page whose fetch failed before any content was parsed
    pub fn failed(
        url_key: UrlKey,
        crawl_job_id: JobId,
        url: &str,
        depth: u32,
        error: PageError,
        http_status: Option<u16>,
        redirect_chain: Vec<RedirectHop>,
    ) -> Self {
        Self {
            url_key,
            crawl_job_id,
            url: url.to_string(),
            final_url: None,
            depth,
            http_status,
            error: Some(error),
            fetched_at: Utc::now(),
            response_time_ms: 0,
            title: None,
            meta_description: None,
            headings: Vec::new(),
            word_count: 0,
            content_fingerprint: None,
            content_hash: None,
            outbound_link_keys: Vec::new(),
            redirect_chain,
            seo: SeoMetadata::default(),
            js_rendered: false,
            js_render_failed: false,
            render_timing: None,
        }
    }

    /// Whether this page counts as broken for link analysis
    pub fn is_broken(&self) -> bool {
        self.error.is_some() || self.http_status.map(|s| s >= 400).unwrap_or(true)
    }
}

/// Directed link between two pages of one crawl job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub source: UrlKey,
    pub target: UrlKey,
    pub anchor_text: String,
    pub is_internal: bool,
    pub nofollow: bool,
}

impl LinkEdge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }
}

/// Identity of an edge; parallel edges with the same key are merged
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: UrlKey,
    pub target: UrlKey,
}

// ============================================================================
// Crawl jobs
// ============================================================================

/// Crawl job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Allowed lifecycle transitions. Terminal states never change.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Paused, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crawl counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCounters {
    /// URLs accepted into the frontier
    pub queued: u64,
    /// Pages fetched and committed (including error pages)
    pub fetched: u64,
    /// Committed pages that recorded an error
    pub errored: u64,
    /// URLs skipped because robots.txt disallows them
    pub robots_disallowed: u64,
    /// Links that failed normalization
    pub invalid_urls: u64,
    /// Results dropped because the job was cancelled while they were in flight
    pub discarded: u64,
}

/// A crawl job record as persisted by the job repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: JobId,
    pub project_id: ProjectId,
    pub state: JobState,
    pub seed_urls: Vec<String>,
    pub config: CrawlConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counters: CrawlCounters,
    pub error: Option<String>,
}

impl CrawlJob {
    pub fn new(project_id: impl Into<ProjectId>, seed_urls: Vec<String>, config: CrawlConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            state: JobState::Pending,
            seed_urls,
            config,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            counters: CrawlCounters::default(),
            error: None,
        }
    }
}
