//! Per-job crawl configuration submitted with `start`

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest meaningful Hamming distance between two 64-bit fingerprints
pub const MAX_DEDUP_THRESHOLD: u32 = 64;

/// Crawl settings supplied by the job submitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum link depth from the seeds (seeds are depth 0)
    pub max_depth: u32,
    /// Honour robots.txt disallow rules and crawl-delay
    pub respect_robots_txt: bool,
    /// Minimum spacing between two fetches to the same host (milliseconds)
    pub crawl_delay_ms: u64,
    /// Render pages through the JS render service
    pub enable_js: bool,
    /// Maximum number of pages fetched by the job
    pub page_cap: usize,
    /// SimHash Hamming distance at or below which two pages are near-duplicates
    pub dedup_threshold: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            respect_robots_txt: true,
            crawl_delay_ms: 1000,
            enable_js: false,
            page_cap: 1000,
            dedup_threshold: 3,
        }
    }
}

impl CrawlConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }

    /// Validate the submission, returning every violation found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.page_cap == 0 {
            errors.push("page_cap must be positive".to_string());
        }
        if self.dedup_threshold > MAX_DEDUP_THRESHOLD {
            errors.push(format!(
                "dedup_threshold must be between 0 and {}, got {}",
                MAX_DEDUP_THRESHOLD, self.dedup_threshold
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_crawl_config_is_valid() {
        assert!(CrawlConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_collects_all_errors() {
        let config = CrawlConfig {
            page_cap: 0,
            dedup_threshold: 65,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("page_cap"));
        assert!(errors[1].contains("dedup_threshold"));
    }

    #[test]
    fn zero_depth_and_zero_delay_are_valid() {
        let config = CrawlConfig {
            max_depth: 0,
            crawl_delay_ms: 0,
            dedup_threshold: 64,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: CrawlConfig = toml::from_str("max_depth = 1\nenable_js = true").unwrap();
        assert_eq!(config.max_depth, 1);
        assert!(config.enable_js);
        assert_eq!(config.page_cap, 1000);
    }
}
