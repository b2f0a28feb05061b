//! Configuration for sitegraph

mod crawl;
mod engine;
mod logging;

pub use crawl::{CrawlConfig, MAX_DEDUP_THRESHOLD};
pub use engine::EngineConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default user agent for all HTTP requests (robots.txt and page fetches)
pub const DEFAULT_USER_AGENT: &str = "SitegraphBot/0.1 (+https://github.com/sitegraph/sitegraph)";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine settings shared by every job
    #[serde(default)]
    pub engine: EngineConfig,
    /// Default settings for submitted crawls
    #[serde(default)]
    pub crawl: CrawlConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.engine.validate_into(&mut errors);
        if let Err(crawl_errors) = self.crawl.validate() {
            errors.extend(crawl_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_passes_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_reports_every_error() {
        let mut cfg = Config::default();
        cfg.engine.max_concurrent_fetches = 0;
        cfg.engine.pagerank_damping = 1.5;
        cfg.crawl.dedup_threshold = 100;

        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("max_concurrent_fetches must be positive"), "{}", err);
        assert!(err.contains("pagerank_damping"), "{}", err);
        assert!(err.contains("dedup_threshold"), "{}", err);
    }

    #[test]
    fn validate_rejects_bad_regex() {
        let mut cfg = Config::default();
        cfg.engine.exclude_patterns = vec!["([unclosed".to_string()];
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("invalid URL pattern"), "{}", err);
    }

    #[test]
    fn load_round_trips_through_file() {
        let mut cfg = Config::default();
        cfg.crawl.max_depth = 1;
        cfg.engine.render_endpoint = Some("http://localhost:3000/render".to_string());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(cfg.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.crawl.max_depth, 1);
        assert_eq!(
            loaded.engine.render_endpoint.as_deref(),
            Some("http://localhost:3000/render")
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/sitegraph.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
