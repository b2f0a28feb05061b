//! Link graph
//!
//! - `LinkGraph`: job-scoped page/edge writes and neighbor queries over the
//!   repositories, plus a compact in-memory snapshot built page by page
//! - `PageRank`: power iteration over a snapshot
//! - `LinkAnalysis`: orphans, depth distribution, hubs, authorities, broken links

pub mod analysis;
pub mod pagerank;
pub mod store;

pub use analysis::{AnalysisConfig, LinkAnalysis};
pub use pagerank::{PageRank, PageRankConfig, PageRankResult, PageScore};
pub use store::{GraphSnapshot, LinkGraph, SnapshotNode};

use serde::{Deserialize, Serialize};

/// Which edges of a node to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Pages this page links to
    Outbound,
    /// Pages linking to this page
    Inbound,
    Both,
}
