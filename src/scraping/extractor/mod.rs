//! HTML parsing
//!
//! Extracts what the link graph and duplicate detector need from a page:
//! - Title, meta description/keywords/robots, canonical, Open Graph, `lang`
//! - Heading outline
//! - Anchors with anchor text and nofollow flags
//! - Image counts (and images without `alt`)
//! - Visible body text for fingerprinting

mod metadata;
mod text;
mod types;

pub use types::*;

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

/// CSS selectors compiled once per extractor
const SELECTORS: &[&str] = &[
    "title",
    "meta[name]",
    "meta[property]",
    "link[rel]",
    "base[href]",
    "html",
    "body",
    "h1, h2, h3, h4, h5, h6",
    "a[href]",
    "img",
];

/// Content extractor
pub struct ContentExtractor {
    pub(crate) config: ExtractorConfig,
    /// Pre-compiled selectors keyed by their CSS source
    selectors: HashMap<&'static str, Selector>,
}

impl ContentExtractor {
    /// Create a new content extractor
    pub fn new(config: ExtractorConfig) -> Self {
        let selectors = SELECTORS
            .iter()
            .filter_map(|css| Selector::parse(css).ok().map(|s| (*css, s)))
            .collect();

        Self { config, selectors }
    }

    /// Parse an HTML document.
    ///
    /// HTML parsing is lenient, so this never fails; a document with no
    /// recognizable structure yields an empty [`ParsedPage`].
    pub fn parse(&self, html: &str) -> ParsedPage {
        let document = Html::parse_document(html);

        let text = self.extract_text(&document);
        let word_count = text.split_whitespace().count();
        let text_to_html_ratio = if html.is_empty() {
            0.0
        } else {
            text.len() as f64 / html.len() as f64
        };
        let (images_count, images_missing_alt) = self.count_images(&document);

        ParsedPage {
            title: self.extract_title(&document),
            meta_description: self.meta_content(&document, "description"),
            meta_keywords: self.meta_content(&document, "keywords"),
            meta_robots: self.extract_robots_meta(&document),
            canonical_url: self.extract_canonical(&document),
            base_href: self.extract_base_href(&document),
            og_tags: self.extract_opengraph(&document),
            lang: self.extract_language(&document),
            headings: self.extract_headings(&document),
            links: self.extract_links(&document),
            images_count,
            images_missing_alt,
            text,
            word_count,
            text_to_html_ratio,
            page_size_bytes: html.len(),
        }
    }

    /// All elements matching one of the pre-compiled selectors
    pub(super) fn select_all<'a>(&self, document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
        match self.selectors.get(css) {
            Some(selector) => document.select(selector).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

/// Element text with whitespace collapsed
pub(super) fn collapsed_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}
