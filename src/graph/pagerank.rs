//! PageRank by power iteration
//!
//! Every node starts at `1/N`. Each iteration gives every node
//! `(1 - d)/N`, plus `d * rank(s) / outdegree(s)` for each in-link from `s`,
//! plus an equal share of `d * (rank of all dangling nodes)`. Spreading the
//! dangling mass over all N nodes keeps the total at 1.0.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::GraphSnapshot;
use crate::types::UrlKey;

/// Parameters for [`PageRank::compute`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRankConfig {
    pub damping: f64,
    pub max_iterations: usize,
    /// Stop once the L1 change between iterations is below this
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

/// Score of one page with its degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageScore {
    pub url_key: UrlKey,
    pub score: f64,
    pub indegree: usize,
    pub outdegree: usize,
}

/// Output of a PageRank run.
///
/// Hitting `max_iterations` is not an error: `converged` is `false` and
/// `final_delta` says how far from stable the scores still were.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageRankResult {
    /// Sorted by URL key
    pub scores: Vec<PageScore>,
    pub iterations: usize,
    pub converged: bool,
    pub final_delta: f64,
}

impl PageRankResult {
    pub fn get(&self, url_key: &UrlKey) -> Option<&PageScore> {
        self.scores
            .binary_search_by(|s| s.url_key.cmp(url_key))
            .ok()
            .map(|i| &self.scores[i])
    }

    pub fn score(&self, url_key: &UrlKey) -> Option<f64> {
        self.get(url_key).map(|s| s.score)
    }

    /// Highest-scoring pages, ties broken by key
    pub fn top(&self, n: usize) -> Vec<PageScore> {
        let mut ranked: Vec<&PageScore> = self.scores.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.url_key.cmp(&b.url_key)));
        ranked.into_iter().take(n).cloned().collect()
    }

    pub fn total(&self) -> f64 {
        self.scores.iter().map(|s| s.score).sum()
    }
}

pub struct PageRank;

impl PageRank {
    pub fn compute(graph: &GraphSnapshot, config: &PageRankConfig) -> PageRankResult {
        let n = graph.node_count();
        if n == 0 {
            return PageRankResult {
                converged: true,
                ..Default::default()
            };
        }

        let out_degrees = graph.out_degrees();
        let in_degrees = graph.in_degrees();
        let dangling: Vec<usize> = (0..n).filter(|&i| out_degrees[i] == 0).collect();
        let d = config.damping;
        let nf = n as f64;

        let mut rank = vec![1.0 / nf; n];
        let mut next = vec![0.0; n];
        let mut iterations = 0;
        let mut delta = f64::INFINITY;
        let mut converged = false;

        while iterations < config.max_iterations {
            iterations += 1;

            let dangling_mass: f64 = dangling.iter().map(|&i| rank[i]).sum();
            let base = (1.0 - d) / nf + d * dangling_mass / nf;
            next.iter_mut().for_each(|r| *r = base);

            for &(s, t) in graph.edges() {
                next[t] += d * rank[s] / out_degrees[s] as f64;
            }

            delta = rank.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
            std::mem::swap(&mut rank, &mut next);

            if delta < config.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            debug!("PageRank converged after {} iterations (delta {:.3e})", iterations, delta);
        } else {
            warn!(
                "PageRank stopped at {} iterations without converging (delta {:.3e})",
                iterations, delta
            );
        }

        let mut scores: Vec<PageScore> = graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| PageScore {
                url_key: node.url_key.clone(),
                score: rank[i],
                indegree: in_degrees[i],
                outdegree: out_degrees[i],
            })
            .collect();
        scores.sort_by(|a, b| a.url_key.cmp(&b.url_key));

        PageRankResult {
            scores,
            iterations,
            converged,
            final_delta: delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> UrlKey {
        UrlKey::from_canonical(s)
    }

    #[test]
    fn test_empty_graph() {
        let result = PageRank::compute(&GraphSnapshot::default(), &PageRankConfig::default());
        assert!(result.scores.is_empty());
        assert!(result.converged);
    }

    #[test]
    fn test_single_node_holds_all_mass() {
        let graph = GraphSnapshot::from_keys(["a"], Vec::<(&str, &str)>::new());
        let result = PageRank::compute(&graph, &PageRankConfig::default());
        assert!((result.score(&key("a")).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scores_sum_to_one_with_dangling_nodes() {
        // c and d are dangling
        let graph = GraphSnapshot::from_keys(
            ["a", "b", "c", "d"],
            [("a", "b"), ("a", "c"), ("b", "c"), ("b", "d")],
        );
        let result = PageRank::compute(&graph, &PageRankConfig::default());
        assert!((result.total() - 1.0).abs() < 1e-9, "total {}", result.total());
        assert!(result.score(&key("c")).unwrap() > result.score(&key("a")).unwrap());
    }

    #[test]
    fn test_back_link_ranks_home_highest() {
        // A links to B and C, B links back to A
        let graph = GraphSnapshot::from_keys(["a", "b", "c"], [("a", "b"), ("a", "c"), ("b", "a")]);
        let result = PageRank::compute(&graph, &PageRankConfig::default());

        let a = result.score(&key("a")).unwrap();
        let b = result.score(&key("b")).unwrap();
        let c = result.score(&key("c")).unwrap();
        assert!(a > b && a > c);
        assert!((b - c).abs() < 1e-6);
        assert!((a - 0.3936).abs() < 1e-3, "a = {}", a);
        assert_eq!(result.top(1)[0].url_key, key("a"));
    }

    #[test]
    fn test_symmetric_cycle_is_uniform() {
        let graph = GraphSnapshot::from_keys(["a", "b", "c"], [("a", "b"), ("b", "c"), ("c", "a")]);
        let result = PageRank::compute(&graph, &PageRankConfig::default());
        for s in &result.scores {
            assert!((s.score - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_orphan_has_zero_indegree_and_baseline_score() {
        let graph = GraphSnapshot::from_keys(["seed", "x", "y"], [("seed", "x"), ("x", "y"), ("y", "x")]);
        let result = PageRank::compute(&graph, &PageRankConfig::default());
        let seed = result.get(&key("seed")).unwrap();
        assert_eq!(seed.indegree, 0);
        assert_eq!(seed.outdegree, 1);
        assert!((seed.score - 0.15 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let graph = GraphSnapshot::from_keys(["a", "b", "c"], [("a", "b"), ("a", "c"), ("b", "a")]);
        let config = PageRankConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let result = PageRank::compute(&graph, &config);
        assert_eq!(result.iterations, 1);
        assert!(!result.converged);
        assert!(result.final_delta > config.tolerance);
        assert!((result.total() - 1.0).abs() < 1e-9);
    }
}
