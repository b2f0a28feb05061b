//! Crawling subsystem
//!
//! Discovers, fetches and parses pages under per-host politeness limits and
//! feeds the link graph and the duplicate detector.
//!
//! Key components:
//! - `UrlNormalizer`: URL canonicalization and URL keys
//! - `RobotsCache`: robots.txt rules and crawl-delay per host
//! - `Frontier`: per-host FIFO queues with spacing, concurrency and page cap
//! - `FetchEngine`: HTTP fetching with manual redirect following
//! - `RenderService`: optional JS rendering collaborator
//! - `ContentExtractor`: HTML metadata, links and text extraction
//! - `PageWorker`: fetch + parse of one frontier entry
//! - `DuplicateDetector`: SimHash + exact hash clustering
//! - `CrawlCoordinator`: job lifecycle and dispatch loop

pub mod coordinator;
pub mod dedup;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod normalizer;
pub mod politeness;
pub mod render;
pub mod trap_detection;
pub mod worker;

pub use coordinator::{CrawlCoordinator, CrawlProgress, CrawlReport};
pub use dedup::{ContentFingerprint, DuplicateDetector, DuplicateReport, SimHash};
pub use extractor::ContentExtractor;
pub use fetcher::FetchEngine;
pub use frontier::{Frontier, FrontierEntry};
pub use normalizer::{NormalizedUrl, UrlNormalizer};
pub use politeness::{RobotsCache, RobotsPolicy};
pub use render::{HttpRenderService, RenderService};
pub use worker::{PageResult, PageWorker};

use url::Url;

/// Politeness key for a URL: lower-cased host plus any non-default port
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Host with any leading `www.` removed, used to decide whether a link is internal
pub fn site_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_includes_explicit_port() {
        let url = Url::parse("http://Example.com:8080/a").unwrap();
        assert_eq!(host_key(&url).as_deref(), Some("example.com:8080"));

        let url = Url::parse("https://example.com:443/a").unwrap();
        assert_eq!(host_key(&url).as_deref(), Some("example.com"));
    }

    #[test]
    fn test_site_host_strips_www() {
        let a = Url::parse("https://www.example.com/").unwrap();
        let b = Url::parse("https://example.com/x").unwrap();
        assert_eq!(site_host(&a), site_host(&b));
        assert!(site_host(&Url::parse("data:text/plain,hi").unwrap()).is_none());
    }
}
