//! Fetch and parse one frontier entry
//!
//! A [`PageWorker`] turns a [`FrontierEntry`] into a [`PageResult`]: the page
//! node to store, the outbound link edges, the links to hand back to the
//! frontier and the content fingerprint for duplicate detection. Fetch
//! failures are recorded on the node; only the coordinator decides what is
//! fatal.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use super::dedup::ContentFingerprint;
use super::extractor::{ContentExtractor, ParsedPage};
use super::fetcher::{FetchEngine, FetchError, FetchResult};
use super::frontier::{FrontierEntry, HostOutcome};
use super::normalizer::{NormalizeError, NormalizedUrl, UrlNormalizer};
use super::render::{RenderRequest, RenderResponse, RenderService};
use super::site_host;
use crate::types::{
    ErrorCategory, JobId, LinkEdge, PageError, PageNode, RenderTiming, SeoMetadata, UrlKey,
};

/// Per-job settings the worker needs
#[derive(Debug, Clone)]
pub struct CrawlContext {
    pub job_id: JobId,
    pub enable_js: bool,
    /// Sites (hosts without `www.`) whose links count as internal
    pub seed_sites: HashSet<String>,
}

impl CrawlContext {
    pub fn is_internal(&self, url: &Url) -> bool {
        site_host(url)
            .map(|host| self.seed_sites.contains(&host))
            .unwrap_or(false)
    }
}

/// Everything produced by processing one entry
#[derive(Debug)]
pub struct PageResult {
    pub entry: FrontierEntry,
    pub node: PageNode,
    /// One edge per distinct target, self-links removed
    pub edges: Vec<LinkEdge>,
    /// Internal, followable links for the frontier
    pub discovered: Vec<NormalizedUrl>,
    /// `href`s that could not be parsed into a URL
    pub invalid_links: usize,
    /// `None` when nothing was parsed
    pub fingerprint: Option<ContentFingerprint>,
    /// Politeness feedback for the entry's host
    pub host_outcome: HostOutcome,
}

/// HTML body obtained for a page, from the network or the render service
struct Document {
    html: String,
    final_url: Url,
    status: u16,
    redirect_chain: Vec<crate::types::RedirectHop>,
    retry_after: Option<Duration>,
    js_rendered: bool,
    js_render_failed: bool,
    render_timing: Option<RenderTiming>,
}

/// Fetch + parse worker shared by every dispatch of a coordinator
pub struct PageWorker {
    fetcher: Arc<FetchEngine>,
    renderer: Option<Arc<dyn RenderService>>,
    extractor: Arc<ContentExtractor>,
    normalizer: Arc<UrlNormalizer>,
    render_timeout: Duration,
}

impl PageWorker {
    pub fn new(
        fetcher: Arc<FetchEngine>,
        renderer: Option<Arc<dyn RenderService>>,
        extractor: Arc<ContentExtractor>,
        normalizer: Arc<UrlNormalizer>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            extractor,
            normalizer,
            render_timeout,
        }
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn normalizer(&self) -> &UrlNormalizer {
        &self.normalizer
    }

    /// Process an entry, recording any fetch failure on the returned node
    pub async fn process(&self, entry: FrontierEntry, ctx: &CrawlContext) -> PageResult {
        let start = Instant::now();
        match self.fetch_and_parse(&entry, ctx).await {
            Ok(result) => result,
            Err(e) => {
                debug!("Fetch failed for {}: {}", entry.url, e);
                let mut node = PageNode::failed(
                    entry.url_key.clone(),
                    ctx.job_id,
                    entry.url.as_str(),
                    entry.depth,
                    PageError {
                        category: e.category(),
                        message: e.to_string(),
                    },
                    e.status(),
                    e.redirect_chain(),
                );
                node.response_time_ms = start.elapsed().as_millis() as u64;
                PageResult {
                    entry,
                    node,
                    edges: Vec::new(),
                    discovered: Vec::new(),
                    invalid_links: 0,
                    fingerprint: None,
                    host_outcome: HostOutcome::Failed,
                }
            }
        }
    }

    /// Fetch (or render) the entry's URL and parse it.
    ///
    /// Non-2xx responses are not errors: they yield a node with the status
    /// and an `HttpError` category, and no links.
    pub async fn fetch_and_parse(&self, entry: &FrontierEntry, ctx: &CrawlContext) -> Result<PageResult, FetchError> {
        let start = Instant::now();
        let document = self.load(entry, ctx).await?;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let host_outcome = match document.status {
            429 => HostOutcome::RateLimited(document.retry_after),
            s if s >= 500 => HostOutcome::Failed,
            _ => HostOutcome::Success,
        };

        let mut node = PageNode::failed(
            entry.url_key.clone(),
            ctx.job_id,
            entry.url.as_str(),
            entry.depth,
            PageError {
                category: ErrorCategory::HttpError,
                message: format!("HTTP {}", document.status),
            },
            Some(document.status),
            document.redirect_chain.clone(),
        );
        node.final_url = Some(document.final_url.to_string());
        node.response_time_ms = response_time_ms;
        node.js_rendered = document.js_rendered;
        node.js_render_failed = document.js_render_failed;
        node.render_timing = document.render_timing.clone();

        if !(200..300).contains(&document.status) {
            return Ok(PageResult {
                entry: entry.clone(),
                node,
                edges: Vec::new(),
                discovered: Vec::new(),
                invalid_links: 0,
                fingerprint: None,
                host_outcome,
            });
        }
        node.error = None;

        let parsed = self.parse(document.html).await;
        let base = parsed
            .base_href
            .as_deref()
            .and_then(|href| document.final_url.join(href).ok())
            .unwrap_or_else(|| document.final_url.clone());

        let links = self.resolve_links(entry, &parsed, &base, ctx);
        let fingerprint = ContentFingerprint::compute(&parsed.text);

        node.title = parsed.title.clone();
        node.meta_description = parsed.meta_description.clone();
        node.headings = parsed.headings.clone();
        node.word_count = parsed.word_count;
        node.content_fingerprint = Some(fingerprint.simhash.0);
        node.content_hash = Some(fingerprint.content_hash.clone());
        node.outbound_link_keys = links.edges.iter().map(|e| e.target.clone()).collect();
        node.fetched_at = Utc::now();
        node.seo = SeoMetadata {
            canonical_url: parsed
                .canonical_url
                .as_deref()
                .and_then(|c| base.join(c).ok())
                .map(|u| u.to_string()),
            meta_robots: parsed.meta_robots,
            og_tags: parsed.og_tags,
            lang: parsed.lang,
            images_count: parsed.images_count,
            images_missing_alt: parsed.images_missing_alt,
            internal_links: links.edges.iter().filter(|e| e.is_internal).count(),
            external_links: links.edges.iter().filter(|e| !e.is_internal).count(),
            text_to_html_ratio: parsed.text_to_html_ratio,
            page_size_bytes: parsed.page_size_bytes,
        };

        debug!(
            "Parsed {} ({} words, {} links, {} to follow)",
            entry.url,
            node.word_count,
            links.edges.len(),
            links.discovered.len()
        );

        Ok(PageResult {
            entry: entry.clone(),
            node,
            edges: links.edges,
            discovered: links.discovered,
            invalid_links: links.invalid,
            fingerprint: Some(fingerprint),
            host_outcome,
        })
    }

    /// Rendered HTML when JS is enabled and the render service answers,
    /// otherwise the raw response
    async fn load(&self, entry: &FrontierEntry, ctx: &CrawlContext) -> Result<Document, FetchError> {
        let mut js_render_failed = false;

        if ctx.enable_js {
            if let Some(renderer) = &self.renderer {
                let request = RenderRequest {
                    url: entry.url.clone(),
                    timeout: self.render_timeout,
                };
                match renderer.render(request).await {
                    Ok(rendered) => return Ok(Self::rendered_document(entry, rendered)),
                    Err(e) => {
                        warn!(
                            "Render via {} failed for {} ({}), falling back to raw HTML",
                            renderer.name(),
                            entry.url,
                            e
                        );
                        js_render_failed = true;
                    }
                }
            }
        }

        let fetched: FetchResult = self.fetcher.fetch(&entry.url).await?;
        Ok(Document {
            html: fetched.body,
            final_url: fetched.final_url,
            status: fetched.status_code,
            redirect_chain: fetched.redirect_chain,
            retry_after: fetched.retry_after,
            js_rendered: false,
            js_render_failed,
            render_timing: None,
        })
    }

    fn rendered_document(entry: &FrontierEntry, rendered: RenderResponse) -> Document {
        Document {
            html: rendered.rendered_html,
            final_url: rendered.final_url.unwrap_or_else(|| entry.url.clone()),
            status: rendered.status_code.unwrap_or(200),
            redirect_chain: Vec::new(),
            retry_after: None,
            js_rendered: true,
            js_render_failed: false,
            render_timing: Some(rendered.timing),
        }
    }

    /// Parse on a blocking thread; HTML parsing is CPU-bound
    async fn parse(&self, html: String) -> ParsedPage {
        let extractor = Arc::clone(&self.extractor);
        match tokio::task::spawn_blocking(move || extractor.parse(&html)).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Parse task failed: {}", e);
                ParsedPage::default()
            }
        }
    }

    fn resolve_links(&self, entry: &FrontierEntry, parsed: &ParsedPage, base: &Url, ctx: &CrawlContext) -> ResolvedLinks {
        let mut resolved = ResolvedLinks::default();
        let mut seen: HashSet<UrlKey> = HashSet::new();

        for link in &parsed.links {
            let normalized = match self.normalizer.normalize(&link.href, Some(base)) {
                Ok(n) => n,
                // mailto:, javascript:, tel: and friends are not pages
                Err(NormalizeError::UnsupportedScheme(_)) => continue,
                Err(e) => {
                    debug!("Skipping link on {}: {}", entry.url, e);
                    resolved.invalid += 1;
                    continue;
                }
            };
            if normalized.key == entry.url_key || !seen.insert(normalized.key.clone()) {
                continue;
            }

            let is_internal = ctx.is_internal(&normalized.url);
            let nofollow = link.nofollow || parsed.meta_robots.nofollow;
            resolved.edges.push(LinkEdge {
                source: entry.url_key.clone(),
                target: normalized.key.clone(),
                anchor_text: link.anchor_text.clone(),
                is_internal,
                nofollow,
            });
            if is_internal && !nofollow {
                resolved.discovered.push(normalized);
            }
        }
        resolved
    }
}

#[derive(Default)]
struct ResolvedLinks {
    edges: Vec<LinkEdge>,
    discovered: Vec<NormalizedUrl>,
    invalid: usize,
}
