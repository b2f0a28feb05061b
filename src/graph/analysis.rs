//! Link structure report over a finished crawl

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::pagerank::{PageRankResult, PageScore};
use super::store::GraphSnapshot;
use crate::types::UrlKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Pages listed in `top_pages`
    pub top_n: usize,
    /// Outdegree at or above which a page is a hub
    pub hub_threshold: usize,
    /// Indegree at or above which a page is an authority
    pub authority_threshold: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            hub_threshold: 10,
            authority_threshold: 10,
        }
    }
}

/// A page with one of its degrees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegreeEntry {
    pub url_key: UrlKey,
    pub degree: usize,
}

/// A link whose target page failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub source: UrlKey,
    pub target: UrlKey,
    /// `None` when the target never answered
    pub http_status: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAnalysis {
    pub total_pages: usize,
    pub total_links: usize,
    /// Pages nothing links to, in key order
    pub orphan_pages: Vec<UrlKey>,
    /// Depth to page count
    pub depth_distribution: BTreeMap<u32, usize>,
    pub top_pages: Vec<PageScore>,
    /// Sorted by degree, highest first
    pub hubs: Vec<DegreeEntry>,
    /// Sorted by degree, highest first
    pub authorities: Vec<DegreeEntry>,
    pub broken_links: Vec<BrokenLink>,
}

impl LinkAnalysis {
    pub fn analyze(graph: &GraphSnapshot, rank: &PageRankResult, config: &AnalysisConfig) -> Self {
        let nodes = graph.nodes();
        let in_degrees = graph.in_degrees();
        let out_degrees = graph.out_degrees();

        let mut orphan_pages: Vec<UrlKey> = nodes
            .iter()
            .zip(&in_degrees)
            .filter(|(_, &d)| d == 0)
            .map(|(n, _)| n.url_key.clone())
            .collect();
        orphan_pages.sort();

        let mut depth_distribution = BTreeMap::new();
        for node in nodes {
            *depth_distribution.entry(node.depth).or_insert(0) += 1;
        }

        let ranked = |degrees: &[usize], threshold: usize| {
            let mut entries: Vec<DegreeEntry> = nodes
                .iter()
                .zip(degrees)
                .filter(|(_, &d)| d >= threshold && d > 0)
                .map(|(n, &d)| DegreeEntry {
                    url_key: n.url_key.clone(),
                    degree: d,
                })
                .collect();
            entries.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.url_key.cmp(&b.url_key)));
            entries
        };

        let mut broken_links: Vec<BrokenLink> = graph
            .edges()
            .iter()
            .filter(|&&(_, t)| nodes[t].broken)
            .map(|&(s, t)| BrokenLink {
                source: nodes[s].url_key.clone(),
                target: nodes[t].url_key.clone(),
                http_status: nodes[t].http_status,
            })
            .collect();
        broken_links.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        Self {
            total_pages: nodes.len(),
            total_links: graph.edge_count(),
            orphan_pages,
            depth_distribution,
            top_pages: rank.top(config.top_n),
            hubs: ranked(&out_degrees, config.hub_threshold),
            authorities: ranked(&in_degrees, config.authority_threshold),
            broken_links,
        }
    }
}
