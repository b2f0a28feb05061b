//! In-memory storage engine

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use super::{
    EdgeRepository, JobRepository, PageRepository, Paged, RobotsRepository, StorageResult,
};
use crate::scraping::politeness::RobotsPolicy;
use crate::types::{CrawlJob, EdgeKey, JobId, LinkEdge, PageNode, UrlKey};

/// Smallest possible key, used as the start of a job's key range
fn min_key() -> UrlKey {
    UrlKey::from_canonical("")
}

/// Storage engine holding everything in ordered maps.
///
/// Keys are prefixed by job id so every job's pages and edges form one
/// contiguous range, which is what keyset pagination walks.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, CrawlJob>>,
    pages: RwLock<BTreeMap<(JobId, UrlKey), PageNode>>,
    edges: RwLock<BTreeMap<(JobId, EdgeKey), LinkEdge>>,
    /// `(job, target, source)` for incoming-edge lookups
    incoming: RwLock<BTreeSet<(JobId, UrlKey, UrlKey)>>,
    robots: DashMap<String, RobotsPolicy>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total pages across all jobs
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// Total edges across all jobs
    pub fn edge_count(&self) -> usize {
        self.edges.read().len()
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn put_job(&self, job: &CrawlJob) -> StorageResult<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StorageResult<Option<CrawlJob>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn list_jobs(&self, project_id: &str) -> StorageResult<Vec<CrawlJob>> {
        let mut jobs: Vec<CrawlJob> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.project_id == project_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

#[async_trait]
impl PageRepository for MemoryStore {
    async fn insert_page(&self, node: &PageNode) -> StorageResult<bool> {
        let mut pages = self.pages.write();
        let key = (node.crawl_job_id, node.url_key.clone());
        if pages.contains_key(&key) {
            return Ok(false);
        }
        pages.insert(key, node.clone());
        Ok(true)
    }

    async fn get_page(&self, job_id: JobId, url_key: &UrlKey) -> StorageResult<Option<PageNode>> {
        Ok(self.pages.read().get(&(job_id, url_key.clone())).cloned())
    }

    async fn list_pages(
        &self,
        job_id: JobId,
        after: Option<&UrlKey>,
        limit: usize,
    ) -> StorageResult<Paged<PageNode, UrlKey>> {
        if limit == 0 {
            return Ok(Paged::empty());
        }
        let start = match after {
            Some(key) => Bound::Excluded((job_id, key.clone())),
            None => Bound::Included((job_id, min_key())),
        };

        let pages = self.pages.read();
        let mut items: Vec<PageNode> = pages
            .range((start, Bound::Unbounded))
            .take_while(|((job, _), _)| *job == job_id)
            .take(limit + 1)
            .map(|(_, node)| node.clone())
            .collect();

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|n| n.url_key.clone())
        } else {
            None
        };
        Ok(Paged { items, next_cursor })
    }

    async fn count_pages(&self, job_id: JobId) -> StorageResult<usize> {
        Ok(self
            .pages
            .read()
            .range((job_id, min_key())..)
            .take_while(|((job, _), _)| *job == job_id)
            .count())
    }
}

#[async_trait]
impl EdgeRepository for MemoryStore {
    async fn insert_edges(&self, job_id: JobId, edges: &[LinkEdge]) -> StorageResult<usize> {
        let mut stored = self.edges.write();
        let mut incoming = self.incoming.write();
        let mut inserted = 0;

        for edge in edges {
            let key = (job_id, edge.key());
            if stored.contains_key(&key) {
                continue;
            }
            incoming.insert((job_id, edge.target.clone(), edge.source.clone()));
            stored.insert(key, edge.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_edges(
        &self,
        job_id: JobId,
        after: Option<&EdgeKey>,
        limit: usize,
    ) -> StorageResult<Paged<LinkEdge, EdgeKey>> {
        if limit == 0 {
            return Ok(Paged::empty());
        }
        let start = match after {
            Some(key) => Bound::Excluded((job_id, key.clone())),
            None => Bound::Included((
                job_id,
                EdgeKey {
                    source: min_key(),
                    target: min_key(),
                },
            )),
        };

        let edges = self.edges.read();
        let mut items: Vec<LinkEdge> = edges
            .range((start, Bound::Unbounded))
            .take_while(|((job, _), _)| *job == job_id)
            .take(limit + 1)
            .map(|(_, edge)| edge.clone())
            .collect();

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(LinkEdge::key)
        } else {
            None
        };
        Ok(Paged { items, next_cursor })
    }

    async fn outgoing(&self, job_id: JobId, source: &UrlKey) -> StorageResult<Vec<LinkEdge>> {
        let start = (
            job_id,
            EdgeKey {
                source: source.clone(),
                target: min_key(),
            },
        );
        Ok(self
            .edges
            .read()
            .range(start..)
            .take_while(|((job, key), _)| *job == job_id && &key.source == source)
            .map(|(_, edge)| edge.clone())
            .collect())
    }

    async fn incoming(&self, job_id: JobId, target: &UrlKey) -> StorageResult<Vec<LinkEdge>> {
        let sources: Vec<UrlKey> = self
            .incoming
            .read()
            .range((job_id, target.clone(), min_key())..)
            .take_while(|(job, t, _)| *job == job_id && t == target)
            .map(|(_, _, source)| source.clone())
            .collect();

        let edges = self.edges.read();
        Ok(sources
            .into_iter()
            .filter_map(|source| {
                edges
                    .get(&(
                        job_id,
                        EdgeKey {
                            source,
                            target: target.clone(),
                        },
                    ))
                    .cloned()
            })
            .collect())
    }
}

#[async_trait]
impl RobotsRepository for MemoryStore {
    async fn get_robots(&self, host: &str) -> StorageResult<Option<RobotsPolicy>> {
        Ok(self.robots.get(host).map(|p| p.value().clone()))
    }

    async fn put_robots(&self, policy: &RobotsPolicy) -> StorageResult<()> {
        self.robots.insert(policy.host.clone(), policy.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlConfig;
    use crate::types::{ErrorCategory, PageError};
    use uuid::Uuid;

    fn key(path: &str) -> UrlKey {
        UrlKey::from_canonical(format!("https://example.com/{}", path))
    }

    fn node(job: JobId, path: &str) -> PageNode {
        PageNode::failed(
            key(path),
            job,
            &format!("https://example.com/{}", path),
            0,
            PageError {
                category: ErrorCategory::HttpError,
                message: "HTTP 500".into(),
            },
            Some(500),
            Vec::new(),
        )
    }

    fn edge(from: &str, to: &str, anchor: &str) -> LinkEdge {
        LinkEdge {
            source: key(from),
            target: key(to),
            anchor_text: anchor.to_string(),
            is_internal: true,
            nofollow: false,
        }
    }

    #[tokio::test]
    async fn test_insert_page_is_idempotent() {
        let store = MemoryStore::new();
        let job = Uuid::new_v4();
        assert!(store.insert_page(&node(job, "a")).await.unwrap());

        let mut changed = node(job, "a");
        changed.title = Some("second write".into());
        assert!(!store.insert_page(&changed).await.unwrap());

        let stored = store.get_page(job, &key("a")).await.unwrap().unwrap();
        assert!(stored.title.is_none());
    }

    #[tokio::test]
    async fn test_pages_are_scoped_by_job() {
        let store = MemoryStore::new();
        let (job1, job2) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert_page(&node(job1, "a")).await.unwrap();
        store.insert_page(&node(job2, "a")).await.unwrap();
        store.insert_page(&node(job2, "b")).await.unwrap();

        assert_eq!(store.count_pages(job1).await.unwrap(), 1);
        assert_eq!(store.count_pages(job2).await.unwrap(), 2);
        assert_eq!(store.page_count(), 3);
    }

    #[tokio::test]
    async fn test_list_pages_paginates_in_key_order() {
        let store = MemoryStore::new();
        let job = Uuid::new_v4();
        for path in ["c", "a", "e", "b", "d"] {
            store.insert_page(&node(job, path)).await.unwrap();
        }
        store.insert_page(&node(Uuid::new_v4(), "zz")).await.unwrap();

        let mut seen = Vec::new();
        let mut cursor: Option<UrlKey> = None;
        loop {
            let page = store.list_pages(job, cursor.as_ref(), 2).await.unwrap();
            assert!(page.items.len() <= 2);
            seen.extend(page.items.iter().map(|n| n.url_key.clone()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec![key("a"), key("b"), key("c"), key("d"), key("e")]);
    }

    #[tokio::test]
    async fn test_edges_merge_on_pair() {
        let store = MemoryStore::new();
        let job = Uuid::new_v4();
        let inserted = store
            .insert_edges(job, &[edge("a", "b", "first"), edge("a", "b", "second"), edge("b", "a", "back")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.insert_edges(job, &[edge("a", "b", "third")]).await.unwrap(), 0);

        let out = store.outgoing(job, &key("a")).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].anchor_text, "first");
    }

    #[tokio::test]
    async fn test_neighbors_both_directions() {
        let store = MemoryStore::new();
        let job = Uuid::new_v4();
        store
            .insert_edges(job, &[edge("a", "c", ""), edge("b", "c", ""), edge("c", "a", "")])
            .await
            .unwrap();

        let incoming: Vec<UrlKey> = store
            .incoming(job, &key("c"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.source)
            .collect();
        assert_eq!(incoming, vec![key("a"), key("b")]);
        assert_eq!(store.outgoing(job, &key("c")).await.unwrap().len(), 1);
        assert!(store.incoming(Uuid::new_v4(), &key("c")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_edges_paginates() {
        let store = MemoryStore::new();
        let job = Uuid::new_v4();
        let edges: Vec<LinkEdge> = (0..7).map(|i| edge("src", &format!("t{}", i), "")).collect();
        store.insert_edges(job, &edges).await.unwrap();

        let first = store.list_edges(job, None, 5).await.unwrap();
        assert_eq!(first.items.len(), 5);
        let rest = store.list_edges(job, first.next_cursor.as_ref(), 5).await.unwrap();
        assert_eq!(rest.items.len(), 2);
        assert!(rest.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_jobs_listed_per_project() {
        let store = MemoryStore::new();
        let a = CrawlJob::new("project-a", vec!["https://a.com/".into()], CrawlConfig::default());
        let b = CrawlJob::new("project-b", vec!["https://b.com/".into()], CrawlConfig::default());
        store.put_job(&a).await.unwrap();
        store.put_job(&b).await.unwrap();

        let jobs = store.list_jobs("project-a").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, a.id);
        assert!(store.get_job(b.id).await.unwrap().is_some());
    }
}
