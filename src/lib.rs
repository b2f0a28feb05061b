//! Sitegraph: polite site crawler with link-graph analysis
//!
//! Crawls one or more sites and turns them into a link graph, featuring:
//! - URL normalization into stable keys
//! - robots.txt, crawl-delay and 429 backoff per host
//! - Async fetch workers under a global concurrency cap, with optional JS
//!   rendering through an external service
//! - PageRank, orphan/hub/authority and broken-link analysis
//! - Exact and near-duplicate content detection via SHA-256 and SimHash
//! - Storage behind repository traits, with an in-memory engine

pub mod config;
pub mod graph;
pub mod scraping;
pub mod storage;
pub mod types;
pub mod util;

pub use config::Config;
pub use scraping::coordinator::{CoordinatorError, CrawlCoordinator, CrawlProgress, CrawlReport};
pub use storage::{MemoryStore, Repositories};
pub use types::*;
