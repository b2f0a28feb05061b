//! Persistence interfaces
//!
//! The crawler only talks to these repository traits. [`MemoryStore`]
//! implements all of them in memory; a database-backed engine implements the
//! same traits.
//!
//! Writes are idempotent: inserting a page or edge that already exists for
//! the job is a silent no-op reported through the return value.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::scraping::politeness::RobotsPolicy;
use crate::types::{CrawlJob, EdgeKey, JobId, LinkEdge, PageNode, UrlKey};

/// Errors reported by a storage engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage write failed: {0}")]
    WriteFailure(String),
    #[error("Storage read failed: {0}")]
    ReadFailure(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One page of a keyset-paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T, K> {
    pub items: Vec<T>,
    /// Pass as `after` to continue; `None` when the listing is exhausted
    pub next_cursor: Option<K>,
}

impl<T, K> Paged<T, K> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert or replace the job record
    async fn put_job(&self, job: &CrawlJob) -> StorageResult<()>;

    async fn get_job(&self, id: JobId) -> StorageResult<Option<CrawlJob>>;

    /// Jobs of one project, oldest first
    async fn list_jobs(&self, project_id: &str) -> StorageResult<Vec<CrawlJob>>;
}

#[async_trait]
pub trait PageRepository: Send + Sync {
    /// Insert a node keyed by `(url_key, crawl_job_id)`.
    ///
    /// Returns `false` when the node already existed; the stored node is kept.
    async fn insert_page(&self, node: &PageNode) -> StorageResult<bool>;

    async fn get_page(&self, job_id: JobId, url_key: &UrlKey) -> StorageResult<Option<PageNode>>;

    /// Nodes of a job in key order, strictly after `after`
    async fn list_pages(
        &self,
        job_id: JobId,
        after: Option<&UrlKey>,
        limit: usize,
    ) -> StorageResult<Paged<PageNode, UrlKey>>;

    async fn count_pages(&self, job_id: JobId) -> StorageResult<usize>;
}

#[async_trait]
pub trait EdgeRepository: Send + Sync {
    /// Insert edges, merging on `(source, target)`. Returns how many were new.
    async fn insert_edges(&self, job_id: JobId, edges: &[LinkEdge]) -> StorageResult<usize>;

    /// Edges of a job in `(source, target)` order, strictly after `after`
    async fn list_edges(
        &self,
        job_id: JobId,
        after: Option<&EdgeKey>,
        limit: usize,
    ) -> StorageResult<Paged<LinkEdge, EdgeKey>>;

    async fn outgoing(&self, job_id: JobId, source: &UrlKey) -> StorageResult<Vec<LinkEdge>>;

    async fn incoming(&self, job_id: JobId, target: &UrlKey) -> StorageResult<Vec<LinkEdge>>;
}

#[async_trait]
pub trait RobotsRepository: Send + Sync {
    async fn get_robots(&self, host: &str) -> StorageResult<Option<RobotsPolicy>>;

    async fn put_robots(&self, policy: &RobotsPolicy) -> StorageResult<()>;
}

/// The set of repositories a coordinator writes through
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobRepository>,
    pub pages: Arc<dyn PageRepository>,
    pub edges: Arc<dyn EdgeRepository>,
    pub robots: Option<Arc<dyn RobotsRepository>>,
}

impl Repositories {
    /// All repositories backed by one [`MemoryStore`]
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let repos = Self {
            jobs: store.clone(),
            pages: store.clone(),
            edges: store.clone(),
            robots: Some(store.clone()),
        };
        (repos, store)
    }
}
