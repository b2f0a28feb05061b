//! JavaScript render service client
//!
//! Rendering happens in an external headless-browser service. The crawler
//! only depends on the [`RenderService`] trait; [`HttpRenderService`] talks
//! to a service that accepts `POST {url, timeout_ms, wait_until}` and answers
//! with the rendered HTML and navigation timings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::types::RenderTiming;

/// Errors that can occur when calling the render service
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render timed out after {0:?}")]
    Timeout(Duration),
    #[error("Render service unavailable: {0}")]
    Unavailable(String),
    #[error("Bad render response: {0}")]
    BadResponse(String),
}

/// Request sent to the render service
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: Url,
    pub timeout: Duration,
}

/// Rendered page returned by the service
#[derive(Debug, Clone)]
pub struct RenderResponse {
    pub rendered_html: String,
    /// URL after client-side navigation
    pub final_url: Option<Url>,
    pub status_code: Option<u16>,
    pub timing: RenderTiming,
}

/// External JS render collaborator
#[async_trait]
pub trait RenderService: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<RenderResponse, RenderError>;

    /// Service name for logs
    fn name(&self) -> &str;
}

/// Configuration for [`HttpRenderService`]
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Endpoint URL (e.g. `http://localhost:3000/render`)
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct RenderPayload<'a> {
    url: &'a str,
    timeout_ms: u64,
    wait_until: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenderBody {
    html: Option<String>,
    final_url: Option<String>,
    status_code: Option<u16>,
    #[serde(default)]
    performance: RenderTiming,
    error: Option<String>,
}

/// Render service reached over HTTP/JSON
#[derive(Debug)]
pub struct HttpRenderService {
    client: reqwest::Client,
    config: RenderConfig,
}

impl HttpRenderService {
    pub fn new(config: RenderConfig) -> Result<Self, RenderError> {
        info!("Using JS render service at {}", config.endpoint);
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RenderError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl RenderService for HttpRenderService {
    async fn render(&self, request: RenderRequest) -> Result<RenderResponse, RenderError> {
        let timeout = request.timeout.min(self.config.timeout);
        let payload = RenderPayload {
            url: request.url.as_str(),
            timeout_ms: timeout.as_millis() as u64,
            wait_until: "networkidle",
        };

        debug!("Rendering {} via {}", request.url, self.config.endpoint);

        let response = self
            .client
            .post(&self.config.endpoint)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RenderError::Timeout(timeout)
                } else {
                    RenderError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RenderError::Unavailable(format!("HTTP {}: {}", status, text)));
        }

        let body: RenderBody = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RenderError::Timeout(timeout)
            } else {
                RenderError::BadResponse(e.to_string())
            }
        })?;

        if let Some(error) = body.error {
            return Err(RenderError::BadResponse(error));
        }
        let rendered_html = body
            .html
            .ok_or_else(|| RenderError::BadResponse("missing html".to_string()))?;

        Ok(RenderResponse {
            rendered_html,
            final_url: body.final_url.and_then(|u| Url::parse(&u).ok()),
            status_code: body.status_code.filter(|s| *s != 0),
            timing: body.performance,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer, timeout: Duration) -> HttpRenderService {
        HttpRenderService::new(RenderConfig {
            endpoint: format!("{}/render", server.uri()),
            timeout,
        })
        .unwrap()
    }

    fn request(timeout: Duration) -> RenderRequest {
        RenderRequest {
            url: Url::parse("https://spa.example.com/app").unwrap(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_render_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .and(body_partial_json(serde_json::json!({"url": "https://spa.example.com/app"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "html": "<html><body><h1>Rendered</h1></body></html>",
                "final_url": "https://spa.example.com/app/home",
                "status_code": 200,
                "performance": {"load_time_ms": 120, "dom_content_loaded_ms": 80, "response_time_ms": 30}
            })))
            .mount(&server)
            .await;

        let response = service(&server, Duration::from_secs(5))
            .render(request(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(response.rendered_html.contains("Rendered"));
        assert_eq!(response.final_url.unwrap().path(), "/app/home");
        assert_eq!(response.timing.load_time_ms, 120);
    }

    #[tokio::test]
    async fn test_render_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"html": "<p>late</p>"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = service(&server, Duration::from_secs(5))
            .render(request(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_render_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "html": null,
                "error": "navigation failed"
            })))
            .mount(&server)
            .await;

        let err = service(&server, Duration::from_secs(5))
            .render(request(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::BadResponse(ref m) if m == "navigation failed"));
    }
}
