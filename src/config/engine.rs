//! Engine-wide crawler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::DEFAULT_USER_AGENT;
use crate::graph::{AnalysisConfig, PageRankConfig};
use crate::scraping::{
    fetcher::FetchConfig,
    normalizer::{NormalizerConfig, DEFAULT_TRACKING_PARAMS},
    politeness::{RobotsConfig, RobotsFailurePolicy},
    render::RenderConfig,
    trap_detection::TrapDetectorConfig,
};

/// Settings shared by every crawl job run by one coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// User agent string
    pub user_agent: String,
    /// Global cap on concurrent fetches across all hosts
    pub max_concurrent_fetches: usize,
    /// Concurrent fetches allowed per host
    pub per_host_concurrency: usize,
    /// Request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Connect timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Maximum redirects followed per fetch
    pub max_redirects: usize,
    /// Maximum response body size (bytes)
    pub max_content_size: usize,
    /// robots.txt cache TTL (seconds)
    pub robots_ttl_secs: u64,
    /// robots.txt fetch timeout (milliseconds)
    pub robots_timeout_ms: u64,
    /// What to do when robots.txt cannot be fetched
    pub robots_failure_policy: RobotsFailurePolicy,
    /// robots.txt in-memory cache size (hosts)
    pub robots_cache_size: usize,
    /// JS render service endpoint (required when a job enables JS)
    pub render_endpoint: Option<String>,
    /// JS render timeout (milliseconds)
    pub render_timeout_ms: u64,
    /// Query parameters stripped during normalization
    pub tracking_params: Vec<String>,
    /// Query parameters always kept, even if they match the deny list
    pub keep_params: Vec<String>,
    /// Regex patterns a discovered URL must match (empty = all)
    pub include_patterns: Vec<String>,
    /// Regex patterns that exclude a discovered URL
    pub exclude_patterns: Vec<String>,
    /// Pages with fewer words are excluded from duplicate analysis
    pub min_dedup_words: usize,
    /// PageRank damping factor
    pub pagerank_damping: f64,
    /// PageRank iteration cap
    pub pagerank_max_iterations: usize,
    /// PageRank L1 convergence tolerance
    pub pagerank_tolerance: f64,
    /// Outdegree at or above which a page is reported as a hub
    pub hub_threshold: usize,
    /// Indegree at or above which a page is reported as an authority
    pub authority_threshold: usize,
    /// Crawl trap detection limits
    pub trap_max_path_depth: usize,
    pub trap_max_url_length: usize,
    pub trap_max_repeated_segments: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_concurrent_fetches: 10,
            per_host_concurrency: 1,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: 10,
            max_content_size: 10 * 1024 * 1024, // 10 MB
            robots_ttl_secs: 24 * 60 * 60,
            robots_timeout_ms: 5_000,
            robots_failure_policy: RobotsFailurePolicy::FailOpen,
            robots_cache_size: 10_000,
            render_endpoint: None,
            render_timeout_ms: 30_000,
            tracking_params: DEFAULT_TRACKING_PARAMS.iter().map(|p| p.to_string()).collect(),
            keep_params: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            min_dedup_words: 5,
            pagerank_damping: 0.85,
            pagerank_max_iterations: 100,
            pagerank_tolerance: 1e-6,
            hub_threshold: 10,
            authority_threshold: 10,
            trap_max_path_depth: 15,
            trap_max_url_length: 2048,
            trap_max_repeated_segments: 3,
        }
    }
}

impl EngineConfig {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_content_size: self.max_content_size,
            max_redirects: self.max_redirects,
            connections_per_host: self.per_host_concurrency.max(1),
        }
    }

    pub fn robots_config(&self) -> RobotsConfig {
        RobotsConfig {
            user_agent: self.user_agent.clone(),
            ttl: Duration::from_secs(self.robots_ttl_secs),
            fetch_timeout: Duration::from_millis(self.robots_timeout_ms),
            failure_policy: self.robots_failure_policy,
            cache_size: self.robots_cache_size,
        }
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            tracking_params: self.tracking_params.clone(),
            keep_params: self.keep_params.clone(),
        }
    }

    pub fn render_config(&self) -> Option<RenderConfig> {
        self.render_endpoint.as_ref().map(|endpoint| RenderConfig {
            endpoint: endpoint.clone(),
            timeout: Duration::from_millis(self.render_timeout_ms),
        })
    }

    pub fn pagerank_config(&self) -> PageRankConfig {
        PageRankConfig {
            damping: self.pagerank_damping,
            max_iterations: self.pagerank_max_iterations,
            tolerance: self.pagerank_tolerance,
        }
    }

    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            top_n: 10,
            hub_threshold: self.hub_threshold,
            authority_threshold: self.authority_threshold,
        }
    }

    pub fn trap_config(&self) -> TrapDetectorConfig {
        TrapDetectorConfig {
            max_path_depth: self.trap_max_path_depth,
            max_url_length: self.trap_max_url_length,
            max_repeated_segments: self.trap_max_repeated_segments,
        }
    }

    /// Validate the engine settings, returning every violation found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        self.validate_into(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Collect validation errors into `errors`
    pub(super) fn validate_into(&self, errors: &mut Vec<String>) {
        if self.user_agent.trim().is_empty() {
            errors.push("user_agent must not be empty".to_string());
        }
        if self.max_concurrent_fetches == 0 {
            errors.push("max_concurrent_fetches must be positive".to_string());
        }
        if self.per_host_concurrency == 0 {
            errors.push("per_host_concurrency must be positive".to_string());
        }
        if self.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }
        if self.robots_timeout_ms == 0 {
            errors.push("robots_timeout_ms must be positive".to_string());
        }
        if self.render_timeout_ms == 0 {
            errors.push("render_timeout_ms must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.pagerank_damping) {
            errors.push("pagerank_damping must be in [0.0, 1.0)".to_string());
        }
        if self.pagerank_max_iterations == 0 {
            errors.push("pagerank_max_iterations must be positive".to_string());
        }
        if self.pagerank_tolerance <= 0.0 {
            errors.push("pagerank_tolerance must be positive".to_string());
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("invalid URL pattern '{}': {}", pattern, e));
            }
        }
        if let Some(endpoint) = &self.render_endpoint {
            if url::Url::parse(endpoint).is_err() {
                errors.push(format!("render_endpoint is not a valid URL: {}", endpoint));
            }
        }
    }
}
