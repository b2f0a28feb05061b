//! Metadata extraction: title, meta tags, canonical, OpenGraph, headings, links, images

use scraper::Html;
use std::collections::BTreeMap;

use super::types::ExtractedLink;
use super::{collapsed_text, ContentExtractor};
use crate::types::{Heading, RobotsMeta};
use crate::util::truncate_str;

/// `rel` values that mark a link as not endorsed
const NOFOLLOW_RELS: &[&str] = &["nofollow", "ugc", "sponsored"];

impl ContentExtractor {
    /// Extract page title from `<title>`
    pub(super) fn extract_title(&self, document: &Html) -> Option<String> {
        self.select_all(document, "title")
            .first()
            .map(collapsed_text)
            .filter(|t| !t.is_empty())
    }

    /// Content of `<meta name=...>`, matched case-insensitively
    pub(super) fn meta_content(&self, document: &Html, name: &str) -> Option<String> {
        self.select_all(document, "meta[name]")
            .into_iter()
            .find(|m| {
                m.value()
                    .attr("name")
                    .map(|n| n.trim().eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .and_then(|m| m.value().attr("content"))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }

    pub(super) fn extract_robots_meta(&self, document: &Html) -> RobotsMeta {
        let content = self
            .meta_content(document, "robots")
            .unwrap_or_default()
            .to_lowercase();
        let directives: Vec<&str> = content.split(',').map(str::trim).collect();

        RobotsMeta {
            noindex: directives.iter().any(|d| *d == "noindex" || *d == "none"),
            nofollow: directives.iter().any(|d| *d == "nofollow" || *d == "none"),
        }
    }

    /// Extract canonical URL
    pub(super) fn extract_canonical(&self, document: &Html) -> Option<String> {
        self.select_all(document, "link[rel]")
            .into_iter()
            .find(|link| {
                link.value()
                    .attr("rel")
                    .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("canonical")))
                    .unwrap_or(false)
            })
            .and_then(|link| link.value().attr("href"))
            .map(|href| href.trim().to_string())
            .filter(|href| !href.is_empty())
    }

    pub(super) fn extract_base_href(&self, document: &Html) -> Option<String> {
        self.select_all(document, "base[href]")
            .first()
            .and_then(|base| base.value().attr("href"))
            .map(|href| href.trim().to_string())
    }

    /// Extract OpenGraph tags (`og:*`), first occurrence wins
    pub(super) fn extract_opengraph(&self, document: &Html) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        for meta in self.select_all(document, "meta[property]") {
            let (Some(property), Some(content)) = (meta.value().attr("property"), meta.value().attr("content")) else {
                continue;
            };
            let property = property.trim().to_lowercase();
            if property.starts_with("og:") {
                tags.entry(property).or_insert_with(|| content.trim().to_string());
            }
        }
        tags
    }

    /// Extract language from `<html lang>`, falling back to `<meta name="language">`
    pub(super) fn extract_language(&self, document: &Html) -> Option<String> {
        self.select_all(document, "html")
            .first()
            .and_then(|html| html.value().attr("lang"))
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty())
            .or_else(|| self.meta_content(document, "language"))
    }

    pub(super) fn extract_headings(&self, document: &Html) -> Vec<Heading> {
        self.select_all(document, "h1, h2, h3, h4, h5, h6")
            .into_iter()
            .filter_map(|h| {
                let level = h.value().name().get(1..)?.parse::<u8>().ok()?;
                let text = collapsed_text(&h);
                (!text.is_empty()).then_some(Heading { level, text })
            })
            .collect()
    }

    pub(super) fn extract_links(&self, document: &Html) -> Vec<ExtractedLink> {
        self.select_all(document, "a[href]")
            .into_iter()
            .filter_map(|a| {
                let href = a.value().attr("href")?.trim();
                if href.is_empty() {
                    return None;
                }

                let mut anchor_text = collapsed_text(&a);
                if anchor_text.is_empty() {
                    anchor_text = a
                        .value()
                        .attr("title")
                        .map(str::to_string)
                        .or_else(|| {
                            a.descendants()
                                .filter_map(|n| n.value().as_element())
                                .find(|e| e.name() == "img")
                                .and_then(|img| img.attr("alt"))
                                .map(str::to_string)
                        })
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                }

                let nofollow = a
                    .value()
                    .attr("rel")
                    .map(|rel| {
                        rel.split_whitespace()
                            .any(|r| NOFOLLOW_RELS.iter().any(|n| r.eq_ignore_ascii_case(n)))
                    })
                    .unwrap_or(false);

                Some(ExtractedLink {
                    href: href.to_string(),
                    anchor_text: truncate_str(&anchor_text, self.config.max_anchor_text_len),
                    nofollow,
                })
            })
            .take(self.config.max_links_per_page)
            .collect()
    }

    /// Returns `(images, images without a non-empty alt)`
    pub(super) fn count_images(&self, document: &Html) -> (usize, usize) {
        let images = self.select_all(document, "img");
        let missing_alt = images
            .iter()
            .filter(|img| img.value().attr("alt").map(|a| a.trim().is_empty()).unwrap_or(true))
            .count();
        (images.len(), missing_alt)
    }
}
