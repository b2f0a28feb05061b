//! Filtering of discovered URLs by crawl-trap detection and URL patterns

use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::scraping::trap_detection::{detect_trap, TrapDetectorConfig};

/// Decides which discovered links may enter the frontier
pub struct UrlFilter {
    trap: TrapDetectorConfig,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UrlFilter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            trap: config.trap_config(),
            include: compile("include", &config.include_patterns),
            exclude: compile("exclude", &config.exclude_patterns),
        }
    }

    pub fn allows(&self, url: &Url) -> bool {
        if let Some(reason) = detect_trap(url, &self.trap) {
            debug!("Skipping {}: {}", url, reason);
            return false;
        }

        let url_str = url.as_str();
        if self.exclude.iter().any(|p| p.is_match(url_str)) {
            return false;
        }

        // Empty include list admits everything
        self.include.is_empty() || self.include.iter().any(|p| p.is_match(url_str))
    }
}

fn compile(kind: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("Invalid {} pattern '{}': {}", kind, p, e);
                None
            }
        })
        .collect()
}
