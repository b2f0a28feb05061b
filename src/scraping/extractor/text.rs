//! Visible text extraction

use ego_tree::NodeRef;
use scraper::{Html, Node};

use super::ContentExtractor;

/// Elements whose text is never rendered
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

impl ContentExtractor {
    /// Check if a node sits inside an element whose text is not rendered
    fn has_invisible_ancestor(node: &NodeRef<Node>) -> bool {
        let mut current = node.parent();
        while let Some(parent) = current {
            if let Some(elem) = parent.value().as_element() {
                if INVISIBLE.contains(&elem.name()) {
                    return true;
                }
            }
            current = parent.parent();
        }
        false
    }

    /// Visible body text with whitespace collapsed to single spaces.
    ///
    /// This is the text that is fingerprinted for duplicate detection.
    pub(super) fn extract_text(&self, document: &Html) -> String {
        let root = self
            .select_all(document, "body")
            .into_iter()
            .next()
            .unwrap_or_else(|| document.root_element());

        let mut words: Vec<&str> = Vec::new();
        for node in root.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            if Self::has_invisible_ancestor(&node) {
                continue;
            }
            words.extend(text.split_whitespace());
        }
        words.join(" ")
    }
}
