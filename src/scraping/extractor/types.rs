//! Parsed page types

use std::collections::BTreeMap;

use crate::types::{Heading, RobotsMeta};

/// An anchor found on a page, before URL resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// Raw `href` attribute value
    pub href: String,
    /// Collapsed anchor text (falls back to `title` or image `alt`)
    pub anchor_text: String,
    /// `rel` contains `nofollow`, `ugc` or `sponsored`
    pub nofollow: bool,
}

/// Everything extracted from one HTML document
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub meta_robots: RobotsMeta,
    /// `href` of `<link rel="canonical">`, unresolved
    pub canonical_url: Option<String>,
    /// `href` of `<base>`, unresolved
    pub base_href: Option<String>,
    pub og_tags: BTreeMap<String, String>,
    pub lang: Option<String>,
    /// Headings in document order
    pub headings: Vec<Heading>,
    /// Anchors in document order
    pub links: Vec<ExtractedLink>,
    pub images_count: usize,
    pub images_missing_alt: usize,
    /// Visible body text, whitespace-collapsed
    pub text: String,
    pub word_count: usize,
    /// Visible text bytes over HTML bytes
    pub text_to_html_ratio: f64,
    pub page_size_bytes: usize,
}

/// Configuration for the extractor
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Anchor text longer than this is truncated
    pub max_anchor_text_len: usize,
    /// Links beyond this count are ignored
    pub max_links_per_page: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_anchor_text_len: 256,
            max_links_per_page: 5000,
        }
    }
}
