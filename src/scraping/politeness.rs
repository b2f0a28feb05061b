//! robots.txt policy cache
//!
//! Fetches, parses and caches robots.txt per host. Rate limiting lives in the
//! frontier; this module only answers "may this URL be fetched" and "how long
//! must requests to this host be spaced".

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::fetcher::FetchError;
use super::host_key;
use crate::storage::RobotsRepository;

/// Upper bound applied to a robots.txt `Crawl-delay`
pub const MAX_ROBOTS_CRAWL_DELAY: Duration = Duration::from_secs(30);

/// TTL used for policies synthesized after a failed robots.txt fetch
const FAILURE_TTL: Duration = Duration::from_secs(60 * 60);

/// What to do when robots.txt cannot be fetched (network error or 5xx).
///
/// A 4xx response always means "no robots.txt" and allows everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotsFailurePolicy {
    /// Allow all paths with the default delay
    #[default]
    FailOpen,
    /// Deny every path on the host
    FailClosed,
}

/// Where a cached policy came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotsSource {
    /// Parsed from a 2xx robots.txt response
    Fetched,
    /// The host returned 4xx for robots.txt
    Missing,
    /// Fetch failed and the fail-open policy applied
    FailedOpen,
    /// Fetch failed and the fail-closed policy applied
    FailedClosed,
}

/// Parsed robots.txt rules for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotsPolicy {
    pub host: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub disallow_rules: Vec<String>,
    pub allow_rules: Vec<String>,
    pub crawl_delay: Option<Duration>,
    /// Set by the fail-closed policy; overrides every rule
    pub deny_all: bool,
    pub source: RobotsSource,
}

/// A `User-agent` group while parsing
#[derive(Default)]
struct Group {
    agents: Vec<String>,
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsPolicy {
    /// Parse robots.txt content for `user_agent`.
    ///
    /// Groups naming our product token win over `*` groups; all matching
    /// groups are merged.
    pub fn parse(host: &str, content: &str, user_agent: &str, ttl: Duration) -> Self {
        let token = product_token(user_agent);
        let groups = Self::parse_groups(content);

        let specific: Vec<&Group> = groups
            .iter()
            .filter(|g| {
                g.agents
                    .iter()
                    .any(|a| a != "*" && (token.contains(a.as_str()) || a.contains(token.as_str())))
            })
            .collect();
        let selected: Vec<&Group> = if specific.is_empty() {
            groups.iter().filter(|g| g.agents.iter().any(|a| a == "*")).collect()
        } else {
            specific
        };

        let mut policy = Self::allow_all(host, ttl, RobotsSource::Fetched);
        for group in selected {
            policy.disallow_rules.extend(group.disallow.iter().cloned());
            policy.allow_rules.extend(group.allow.iter().cloned());
            if group.crawl_delay.is_some() {
                policy.crawl_delay = group.crawl_delay;
            }
        }
        policy.crawl_delay = policy.crawl_delay.map(|d| d.min(MAX_ROBOTS_CRAWL_DELAY));
        policy
    }

    fn parse_groups(content: &str) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_lines = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    if !in_agent_lines && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_lowercase());
                    in_agent_lines = true;
                }
                "disallow" => {
                    in_agent_lines = false;
                    if !value.is_empty() {
                        current.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_agent_lines = false;
                    if !value.is_empty() {
                        current.allow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    in_agent_lines = false;
                    if let Ok(delay) = value.parse::<f64>() {
                        if delay.is_finite() && delay >= 0.0 {
                            current.crawl_delay = Some(Duration::from_secs_f64(delay));
                        }
                    }
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Policy that allows every path
    pub fn allow_all(host: &str, ttl: Duration, source: RobotsSource) -> Self {
        Self {
            host: host.to_string(),
            fetched_at: Utc::now(),
            ttl,
            disallow_rules: Vec::new(),
            allow_rules: Vec::new(),
            crawl_delay: None,
            deny_all: false,
            source,
        }
    }

    /// Policy that denies every path
    pub fn deny_all(host: &str, ttl: Duration) -> Self {
        Self {
            deny_all: true,
            ..Self::allow_all(host, ttl, RobotsSource::FailedClosed)
        }
    }

    /// Check a URL against the rules
    pub fn is_allowed(&self, url: &Url) -> bool {
        let target = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        self.is_path_allowed(&target)
    }

    /// Check a path (with optional query) against the rules.
    ///
    /// Longest match wins; on a tie, allow wins.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        if self.deny_all {
            return false;
        }

        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| path_matches(path, p))
                .map(|p| p.len())
                .max()
        };

        match (longest(&self.allow_rules), longest(&self.disallow_rules)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now >= self.fetched_at + ttl,
            Err(_) => false,
        }
    }
}

/// Lower-cased product token of a user agent (`SitegraphBot/0.1 (...)` -> `sitegraphbot`)
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Check if a path matches a robots.txt pattern (`*` wildcards, `$` end anchor)
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    let (pattern, must_end_match) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    if !pattern.contains('*') {
        return if must_end_match {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match path[pos..].find(part) {
            Some(found) if i == 0 && found != 0 => return false,
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    if must_end_match {
        // A trailing `*$` matches anything; otherwise the last part must end the path
        parts.last().map(|p| p.is_empty()).unwrap_or(false)
            || parts.last().map(|p| path.ends_with(p)).unwrap_or(false)
    } else {
        true
    }
}

/// Configuration for the robots cache
#[derive(Debug, Clone)]
pub struct RobotsConfig {
    pub user_agent: String,
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    pub failure_policy: RobotsFailurePolicy,
    pub cache_size: usize,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
            fetch_timeout: Duration::from_secs(5),
            failure_policy: RobotsFailurePolicy::FailOpen,
            cache_size: 10_000,
        }
    }
}

/// Per-host robots.txt cache shared by all jobs of a coordinator.
///
/// Lookup order is memory, then the optional repository, then the network.
/// Expired entries are refreshed lazily on the next lookup.
pub struct RobotsCache {
    cache: Mutex<LruCache<String, Arc<RobotsPolicy>>>,
    client: reqwest::Client,
    repository: Option<Arc<dyn RobotsRepository>>,
    config: RobotsConfig,
}

impl RobotsCache {
    pub fn new(config: RobotsConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let capacity = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            cache: Mutex::new(LruCache::new(capacity)),
            client,
            repository: None,
            config,
        })
    }

    /// Persist fetched policies through `repository` and consult it on cache misses
    pub fn with_repository(mut self, repository: Arc<dyn RobotsRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Cached, unexpired policy for a host key
    pub fn cached(&self, host: &str) -> Option<Arc<RobotsPolicy>> {
        let mut cache = self.cache.lock();
        match cache.get(host) {
            Some(policy) if !policy.is_expired(Utc::now()) => Some(policy.clone()),
            Some(_) => {
                cache.pop(host);
                None
            }
            None => None,
        }
    }

    /// Policy for the host of `url`, fetching robots.txt if needed
    pub async fn policy_for(&self, url: &Url) -> Arc<RobotsPolicy> {
        let host = host_key(url).unwrap_or_default();
        if let Some(policy) = self.cached(&host) {
            return policy;
        }

        if let Some(policy) = self.load_from_repository(&host).await {
            let policy = Arc::new(policy);
            self.cache.lock().put(host, policy.clone());
            return policy;
        }

        let policy = Arc::new(self.fetch(url.scheme(), &host).await);
        self.cache.lock().put(host, policy.clone());

        if let Some(repository) = &self.repository {
            if let Err(e) = repository.put_robots(&policy).await {
                warn!("Failed to persist robots policy for {}: {}", policy.host, e);
            }
        }
        policy
    }

    /// Whether `url` may be fetched
    pub async fn is_allowed(&self, url: &Url) -> bool {
        self.policy_for(url).await.is_allowed(url)
    }

    /// Crawl delay requested by the host of `url`, if any
    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.policy_for(url).await.crawl_delay
    }

    async fn load_from_repository(&self, host: &str) -> Option<RobotsPolicy> {
        let repository = self.repository.as_ref()?;
        match repository.get_robots(host).await {
            Ok(Some(policy)) if !policy.is_expired(Utc::now()) => Some(policy),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to load robots policy for {}: {}", host, e);
                None
            }
        }
    }

    async fn fetch(&self, scheme: &str, host: &str) -> RobotsPolicy {
        let robots_url = format!("{}://{}/robots.txt", scheme, host);
        debug!("Fetching {}", robots_url);

        let failure = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    return RobotsPolicy::parse(host, &body, &self.config.user_agent, self.config.ttl)
                }
                Err(e) => e.to_string(),
            },
            Ok(response) if response.status().is_client_error() => {
                debug!("No robots.txt for {} ({})", host, response.status());
                return RobotsPolicy::allow_all(host, self.config.ttl, RobotsSource::Missing);
            }
            Ok(response) => format!("HTTP {}", response.status()),
            Err(e) => e.to_string(),
        };

        let ttl = self.config.ttl.min(FAILURE_TTL);
        match self.config.failure_policy {
            RobotsFailurePolicy::FailOpen => {
                warn!("robots.txt fetch failed for {} ({}), allowing all", host, failure);
                RobotsPolicy::allow_all(host, ttl, RobotsSource::FailedOpen)
            }
            RobotsFailurePolicy::FailClosed => {
                warn!("robots.txt fetch failed for {} ({}), denying all", host, failure);
                RobotsPolicy::deny_all(host, ttl)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DAY: Duration = Duration::from_secs(86400);

    #[test]
    fn test_robots_parsing() {
        let content = r#"
User-agent: *
Disallow: /private/
Allow: /private/public/
Crawl-delay: 2

User-agent: SitegraphBot
Disallow: /admin/
Crawl-delay: 1
"#;

        let robots = RobotsPolicy::parse("example.com", content, "SitegraphBot/0.1", DAY);

        // Specific group replaces the wildcard group
        assert!(robots.is_path_allowed("/public/page.html"));
        assert!(!robots.is_path_allowed("/admin/settings"));
        assert!(robots.is_path_allowed("/private/test"));
        assert_eq!(robots.crawl_delay, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_robots_wildcard() {
        let content = r#"
User-agent: *
Disallow: /private/
Disallow: /*.pdf$
Allow: /private/readme.txt
"#;

        let robots = RobotsPolicy::parse("example.com", content, "TestBot", DAY);

        assert!(robots.is_path_allowed("/public/page.html"));
        assert!(!robots.is_path_allowed("/private/secret"));
        assert!(robots.is_path_allowed("/private/readme.txt"));
        assert!(!robots.is_path_allowed("/docs/manual.pdf"));
        assert!(robots.is_path_allowed("/docs/manual.html"));
    }

    #[test]
    fn test_multi_agent_group() {
        let content = "User-agent: otherbot\nUser-agent: sitegraphbot\nDisallow: /x\n\nUser-agent: *\nDisallow: /";
        let robots = RobotsPolicy::parse("example.com", content, "SitegraphBot/0.1", DAY);
        assert!(!robots.is_path_allowed("/x/y"));
        assert!(robots.is_path_allowed("/y"));
    }

    #[test]
    fn test_path_matching() {
        assert!(path_matches("/admin/test", "/admin/"));
        assert!(!path_matches("/public/test", "/admin/"));
        assert!(path_matches("/images/cat.jpg", "/images/*.jpg"));
        assert!(path_matches("/page.html", "/page.html$"));
        assert!(!path_matches("/page.html?query", "/page.html$"));
        assert!(path_matches("/a/b.php?x=1", "/*?"));
    }

    #[test]
    fn test_query_is_matched() {
        let robots = RobotsPolicy::parse("example.com", "User-agent: *\nDisallow: /*?sort=", "Bot", DAY);
        assert!(robots.is_allowed(&Url::parse("https://example.com/list").unwrap()));
        assert!(!robots.is_allowed(&Url::parse("https://example.com/list?sort=asc").unwrap()));
    }

    #[test]
    fn test_crawl_delay_capped() {
        let robots = RobotsPolicy::parse("example.com", "User-agent: *\nCrawl-delay: 3600", "Bot", DAY);
        assert_eq!(robots.crawl_delay, Some(MAX_ROBOTS_CRAWL_DELAY));
    }

    #[test]
    fn test_deny_all_and_expiry() {
        let policy = RobotsPolicy::deny_all("example.com", Duration::from_secs(10));
        assert!(!policy.is_path_allowed("/"));
        assert!(!policy.is_expired(policy.fetched_at));
        assert!(policy.is_expired(policy.fetched_at + chrono::Duration::seconds(10)));
    }

    fn cache_for(policy: RobotsFailurePolicy) -> RobotsCache {
        RobotsCache::new(RobotsConfig {
            user_agent: "SitegraphBot/0.1".to_string(),
            failure_policy: policy,
            fetch_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_unbuildable_client_is_an_error() {
        let cache = RobotsCache::new(RobotsConfig {
            user_agent: "Sitegraph\nBot".to_string(),
            ..Default::default()
        });
        assert!(matches!(cache, Err(FetchError::Http(_))));
    }

    #[tokio::test]
    async fn test_fetch_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /secret"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(RobotsFailurePolicy::FailOpen);
        let base = Url::parse(&server.uri()).unwrap();

        assert!(!cache.is_allowed(&base.join("/secret/x").unwrap()).await);
        assert!(cache.is_allowed(&base.join("/public").unwrap()).await);
        assert_eq!(cache.len(), 1);
        let host = host_key(&base).unwrap();
        assert_eq!(cache.cached(&host).unwrap().source, RobotsSource::Fetched);
    }

    #[tokio::test]
    async fn test_server_error_follows_failure_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let url = Url::parse(&server.uri()).unwrap().join("/page").unwrap();

        let open = cache_for(RobotsFailurePolicy::FailOpen);
        let policy = open.policy_for(&url).await;
        assert_eq!(policy.source, RobotsSource::FailedOpen);
        assert!(policy.is_allowed(&url));

        let closed = cache_for(RobotsFailurePolicy::FailClosed);
        let policy = closed.policy_for(&url).await;
        assert_eq!(policy.source, RobotsSource::FailedClosed);
        assert!(!policy.is_allowed(&url));
    }

    #[tokio::test]
    async fn test_missing_robots_allows_even_when_fail_closed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let url = Url::parse(&server.uri()).unwrap().join("/page").unwrap();

        let cache = cache_for(RobotsFailurePolicy::FailClosed);
        let policy = cache.policy_for(&url).await;
        assert_eq!(policy.source, RobotsSource::Missing);
        assert!(policy.is_allowed(&url));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_open() {
        let cache = cache_for(RobotsFailurePolicy::FailOpen);
        let url = Url::parse("http://127.0.0.1:1/page").unwrap();
        let policy = cache.policy_for(&url).await;
        assert_eq!(policy.source, RobotsSource::FailedOpen);
        assert!(policy.ttl <= FAILURE_TTL);
    }
}
