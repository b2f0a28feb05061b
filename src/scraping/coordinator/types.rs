//! Coordinator types: errors, progress and the finalized report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::graph::{LinkAnalysis, PageRankResult};
use crate::scraping::dedup::DuplicateReport;
use crate::scraping::fetcher::FetchError;
use crate::scraping::render::RenderError;
use crate::storage::StorageError;
use crate::types::{CrawlCounters, ErrorCategory, JobId, JobState};

/// Dispatches allowed per URL before a 429 is recorded as the page's result
pub(super) const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Errors returned by [`super::CrawlCoordinator`] operations.
///
/// Per-page failures never show up here; they are recorded on page nodes.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid crawl configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
    #[error("Unknown crawl job {0}")]
    UnknownJob(JobId),
    #[error("Job {job_id} cannot go from {from} to {to}")]
    InvalidTransition { job_id: JobId, from: JobState, to: JobState },
    #[error("No valid seed URLs")]
    NoValidSeeds,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Status code and error category counts of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub status_codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<ErrorCategory, u64>,
}

impl Breakdown {
    pub(super) fn record_status(&mut self, status: u16) {
        *self.status_codes.entry(status).or_insert(0) += 1;
    }

    pub(super) fn record_error(&mut self, category: ErrorCategory) {
        *self.errors.entry(category).or_insert(0) += 1;
    }
}

/// Live view of a job, as returned by `progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub job_id: JobId,
    pub state: JobState,
    pub counters: CrawlCounters,
    /// URLs waiting in the frontier
    pub pending: usize,
    /// Fetches dispatched and not yet completed
    pub in_flight: usize,
    /// Distinct hosts seen so far
    pub hosts: usize,
    pub breakdown: Breakdown,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Results of a completed crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlReport {
    pub job_id: JobId,
    pub counters: CrawlCounters,
    pub breakdown: Breakdown,
    pub pagerank: PageRankResult,
    pub duplicates: DuplicateReport,
    pub links: LinkAnalysis,
}
