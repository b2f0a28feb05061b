//! HTTP fetcher
//!
//! Redirects are followed by hand rather than by reqwest so that every hop
//! is recorded on the page node and loops (A -> B -> C -> A) fail fast with
//! [`FetchError::TooManyRedirects`] instead of burning the hop budget.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::types::{ErrorCategory, RedirectHop};

/// Content types that are parsed as pages
const ALLOWED_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml", "text/plain"];

/// Errors that can occur during fetching
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Too many redirects ({} hops)", chain.len())]
    TooManyRedirects { chain: Vec<RedirectHop> },
    #[error("Disallowed content type: {content_type}")]
    DisallowedContentType { content_type: String, status: u16 },
    #[error("Content too large: {size} bytes")]
    ContentTooLarge { size: usize, status: u16 },
    #[error("Invalid redirect location: {0}")]
    InvalidRedirect(String),
    #[error("HTTP error: {0}")]
    Http(String),
}

impl FetchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout(_) => ErrorCategory::FetchTimeout,
            Self::ConnectionError(_) | Self::Http(_) => ErrorCategory::ConnectionError,
            Self::TooManyRedirects { .. } | Self::InvalidRedirect(_) => ErrorCategory::TooManyRedirects,
            Self::DisallowedContentType { .. } => ErrorCategory::DisallowedContentType,
            Self::ContentTooLarge { .. } => ErrorCategory::ContentTooLarge,
        }
    }

    /// HTTP status of the last response received, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::DisallowedContentType { status, .. } | Self::ContentTooLarge { status, .. } => {
                Some(*status)
            }
            Self::TooManyRedirects { chain } => chain.last().map(|hop| hop.status),
            _ => None,
        }
    }

    /// Redirect hops followed before the failure
    pub fn redirect_chain(&self) -> Vec<RedirectHop> {
        match self {
            Self::TooManyRedirects { chain } => chain.clone(),
            _ => Vec::new(),
        }
    }
}

/// Result of a completed fetch (any status code)
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// URL after following redirects
    pub final_url: Url,
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
    /// Bytes received for the final response
    pub body_size: usize,
    pub redirect_chain: Vec<RedirectHop>,
    /// Time from first request to last byte
    pub fetch_duration: Duration,
    /// `Retry-After` in seconds, on 429/503 responses
    pub retry_after: Option<Duration>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_html(&self) -> bool {
        self.content_type.contains("html")
    }
}

/// Configuration for the fetch engine
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string
    pub user_agent: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum response size (bytes)
    pub max_content_size: usize,
    /// Maximum redirects to follow
    pub max_redirects: usize,
    /// Idle connections kept per host
    pub connections_per_host: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_content_size: 10 * 1024 * 1024, // 10 MB
            max_redirects: 10,
            connections_per_host: 1,
        }
    }
}

/// HTTP fetch engine shared by all workers
pub struct FetchEngine {
    http_client: reqwest::Client,
    config: FetchConfig,
}

impl FetchEngine {
    /// Create a new fetch engine
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.connections_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// GET `url`, following up to `max_redirects` redirects.
    ///
    /// Non-2xx final responses are returned as results, not errors; only
    /// transport failures, redirect loops and unparseable content fail.
    pub async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let start = Instant::now();
        let mut current = url.clone();
        let mut chain: Vec<RedirectHop> = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([current.as_str().to_string()]);

        loop {
            let response = self
                .http_client
                .get(current.as_str())
                .send()
                .await
                .map_err(|e| self.classify(e))?;
            let status = response.status();

            if status.is_redirection() {
                if let Some(location) = header_str(&response, reqwest::header::LOCATION) {
                    chain.push(RedirectHop {
                        url: current.to_string(),
                        status: status.as_u16(),
                    });
                    let next = current
                        .join(&location)
                        .map_err(|_| FetchError::InvalidRedirect(location.clone()))?;

                    let looped = !visited.insert(next.as_str().to_string());
                    if looped || chain.len() > self.config.max_redirects {
                        tracing::debug!(
                            "Redirect {} at {} after {} hops",
                            if looped { "loop" } else { "limit" },
                            next,
                            chain.len()
                        );
                        return Err(FetchError::TooManyRedirects { chain });
                    }
                    current = next;
                    continue;
                }
            }

            let content_type = header_str(&response, reqwest::header::CONTENT_TYPE)
                .unwrap_or_else(|| "text/html".to_string())
                .to_lowercase();

            if status.is_success() && !ALLOWED_CONTENT_TYPES.iter().any(|t| content_type.contains(t)) {
                return Err(FetchError::DisallowedContentType {
                    content_type,
                    status: status.as_u16(),
                });
            }

            let retry_after = header_str(&response, reqwest::header::RETRY_AFTER)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            let bytes = self.read_body(response, status.as_u16()).await?;

            return Ok(FetchResult {
                final_url: current,
                status_code: status.as_u16(),
                content_type,
                body_size: bytes.len(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                redirect_chain: chain,
                fetch_duration: start.elapsed(),
                retry_after,
            });
        }
    }

    /// Read the body, enforcing `max_content_size` while streaming
    async fn read_body(&self, mut response: reqwest::Response, status: u16) -> Result<Vec<u8>, FetchError> {
        let limit = self.config.max_content_size;
        if let Some(len) = response.content_length() {
            if len as usize > limit {
                return Err(FetchError::ContentTooLarge { size: len as usize, status });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            body.extend_from_slice(&chunk);
            if body.len() > limit {
                return Err(FetchError::ContentTooLarge { size: body.len(), status });
            }
        }
        Ok(body)
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.config.timeout)
        } else if error.is_connect() || error.is_request() || error.is_body() {
            FetchError::ConnectionError(error.to_string())
        } else {
            FetchError::Http(error.to_string())
        }
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine() -> FetchEngine {
        FetchEngine::new(FetchConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap()
    }

    fn redirect_to(location: &str) -> ResponseTemplate {
        ResponseTemplate::new(302).insert_header("Location", location)
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
    }

    #[tokio::test]
    async fn test_follows_redirects_and_records_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/old")).respond_with(redirect_to("/newer")).mount(&server).await;
        Mock::given(method("GET")).and(path("/newer")).respond_with(redirect_to("/final")).mount(&server).await;
        Mock::given(method("GET")).and(path("/final")).respond_with(html("<p>done</p>")).mount(&server).await;

        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let result = engine().fetch(&url).await.unwrap();

        assert_eq!(result.status_code, 200);
        assert_eq!(result.final_url.path(), "/final");
        assert_eq!(result.redirect_chain.len(), 2);
        assert_eq!(result.redirect_chain[0].status, 302);
        assert!(result.redirect_chain[0].url.ends_with("/old"));
        assert!(result.body.contains("done"));
    }

    #[tokio::test]
    async fn test_redirect_loop_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/a")).respond_with(redirect_to("/b")).mount(&server).await;
        Mock::given(method("GET")).and(path("/b")).respond_with(redirect_to("/c")).mount(&server).await;
        Mock::given(method("GET")).and(path("/c")).respond_with(redirect_to("/a")).mount(&server).await;

        let url = Url::parse(&format!("{}/a", server.uri())).unwrap();
        let err = engine().fetch(&url).await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::TooManyRedirects);
        let chain = err.redirect_chain();
        assert_eq!(chain.len(), 3);
        assert!(chain[2].url.ends_with("/c"));
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let server = MockServer::start().await;
        for i in 0..5 {
            Mock::given(method("GET"))
                .and(path(format!("/r{}", i)))
                .respond_with(redirect_to(&format!("/r{}", i + 1)))
                .mount(&server)
                .await;
        }

        let engine = FetchEngine::new(FetchConfig {
            max_redirects: 3,
            ..Default::default()
        })
        .unwrap();
        let url = Url::parse(&format!("{}/r0", server.uri())).unwrap();
        match engine.fetch(&url).await {
            Err(FetchError::TooManyRedirects { chain }) => assert_eq!(chain.len(), 4),
            other => panic!("expected TooManyRedirects, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disallowed_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 16], "application/pdf"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/doc.pdf", server.uri())).unwrap();
        let err = engine().fetch(&url).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::DisallowedContentType);
        assert_eq!(err.status(), Some(200));
    }

    #[tokio::test]
    async fn test_error_status_is_a_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let engine = engine();
        let gone = engine.fetch(&Url::parse(&format!("{}/gone", server.uri())).unwrap()).await.unwrap();
        assert_eq!(gone.status_code, 404);
        assert!(!gone.is_success());

        let busy = engine.fetch(&Url::parse(&format!("{}/busy", server.uri())).unwrap()).await.unwrap();
        assert_eq!(busy.status_code, 429);
        assert_eq!(busy.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(engine.stats().total_fetches, 2);
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(html("<p>late</p>").set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
        let err = engine().fetch(&url).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::FetchTimeout);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        let engine = engine();
        let err = engine.fetch(&url).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ConnectionError);
        assert_eq!(engine.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_content_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(html(&"x".repeat(4096)))
            .mount(&server)
            .await;

        let engine = FetchEngine::new(FetchConfig {
            max_content_size: 1024,
            ..Default::default()
        })
        .unwrap();
        let url = Url::parse(&format!("{}/big", server.uri())).unwrap();
        let err = engine.fetch(&url).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ContentTooLarge);
    }
}
