//! Job-scoped link graph over the page and edge repositories

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::Direction;
use crate::storage::{EdgeRepository, PageRepository, Paged, StorageError, StorageResult};
use crate::types::{EdgeKey, JobId, LinkEdge, PageNode, UrlKey};

/// Rows fetched per repository call while building a snapshot
const SNAPSHOT_BATCH: usize = 1000;

/// Link graph of one crawl job.
///
/// Writes go straight to the repositories; nothing is buffered here, so the
/// graph can be much larger than memory until [`LinkGraph::snapshot`] is taken.
#[derive(Clone)]
pub struct LinkGraph {
    job_id: JobId,
    pages: Arc<dyn PageRepository>,
    edges: Arc<dyn EdgeRepository>,
}

impl LinkGraph {
    pub fn new(job_id: JobId, pages: Arc<dyn PageRepository>, edges: Arc<dyn EdgeRepository>) -> Self {
        Self { job_id, pages, edges }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Store a page node. Returns `false` if the page was already stored.
    pub async fn add_page(&self, node: &PageNode) -> StorageResult<bool> {
        if node.crawl_job_id != self.job_id {
            return Err(StorageError::WriteFailure(format!(
                "page {} belongs to job {}, not {}",
                node.url_key, node.crawl_job_id, self.job_id
            )));
        }
        self.pages.insert_page(node).await
    }

    /// Store one edge. Returns `false` if the pair was already linked.
    pub async fn add_edge(&self, edge: &LinkEdge) -> StorageResult<bool> {
        Ok(self.add_edges(std::slice::from_ref(edge)).await? > 0)
    }

    pub async fn add_edges(&self, edges: &[LinkEdge]) -> StorageResult<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        self.edges.insert_edges(self.job_id, edges).await
    }

    pub async fn page(&self, url_key: &UrlKey) -> StorageResult<Option<PageNode>> {
        self.pages.get_page(self.job_id, url_key).await
    }

    /// Neighbor keys in key order, without duplicates
    pub async fn neighbors(&self, url_key: &UrlKey, direction: Direction) -> StorageResult<Vec<UrlKey>> {
        let mut keys = BTreeSet::new();
        if matches!(direction, Direction::Outbound | Direction::Both) {
            keys.extend(self.edges.outgoing(self.job_id, url_key).await?.into_iter().map(|e| e.target));
        }
        if matches!(direction, Direction::Inbound | Direction::Both) {
            keys.extend(self.edges.incoming(self.job_id, url_key).await?.into_iter().map(|e| e.source));
        }
        Ok(keys.into_iter().collect())
    }

    pub async fn pages(&self, after: Option<&UrlKey>, limit: usize) -> StorageResult<Paged<PageNode, UrlKey>> {
        self.pages.list_pages(self.job_id, after, limit).await
    }

    pub async fn edges(&self, after: Option<&EdgeKey>, limit: usize) -> StorageResult<Paged<LinkEdge, EdgeKey>> {
        self.edges.list_edges(self.job_id, after, limit).await
    }

    pub async fn page_count(&self) -> StorageResult<usize> {
        self.pages.count_pages(self.job_id).await
    }

    /// Build a compact snapshot by paging through every node and edge.
    ///
    /// Only the fields ranking and analysis need are kept per node.
    pub async fn snapshot(&self) -> StorageResult<GraphSnapshot> {
        let mut nodes = Vec::new();
        let mut cursor: Option<UrlKey> = None;
        loop {
            let batch = self.pages(cursor.as_ref(), SNAPSHOT_BATCH).await?;
            nodes.extend(batch.items.iter().map(SnapshotNode::from_page));
            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut snapshot = GraphSnapshot::new(nodes);
        let mut cursor: Option<EdgeKey> = None;
        loop {
            let batch = self.edges(cursor.as_ref(), SNAPSHOT_BATCH).await?;
            for edge in &batch.items {
                snapshot.push_edge(&edge.source, &edge.target);
            }
            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(
            "Snapshot of job {}: {} nodes, {} edges ({} to uncrawled targets)",
            self.job_id,
            snapshot.node_count(),
            snapshot.edge_count(),
            snapshot.unresolved_edges
        );
        Ok(snapshot)
    }
}

/// Per-node data carried in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotNode {
    pub url_key: UrlKey,
    pub depth: u32,
    pub http_status: Option<u16>,
    pub broken: bool,
}

impl SnapshotNode {
    pub fn from_page(node: &PageNode) -> Self {
        Self {
            url_key: node.url_key.clone(),
            depth: node.depth,
            http_status: node.http_status,
            broken: node.is_broken(),
        }
    }
}

/// Index-based copy of a job's graph.
///
/// Edges are `(source, target)` node indices; self-links, repeated pairs and
/// edges whose target was never crawled are left out.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    nodes: Vec<SnapshotNode>,
    index: HashMap<UrlKey, usize>,
    edges: Vec<(usize, usize)>,
    edge_set: HashSet<(usize, usize)>,
    /// Edges dropped because an endpoint is not a node
    pub unresolved_edges: usize,
}

impl GraphSnapshot {
    pub fn new(nodes: Vec<SnapshotNode>) -> Self {
        let index = nodes.iter().enumerate().map(|(i, n)| (n.url_key.clone(), i)).collect();
        Self {
            nodes,
            index,
            ..Default::default()
        }
    }

    /// Snapshot from bare keys, every node at depth 0 and healthy
    pub fn from_keys<'a>(
        keys: impl IntoIterator<Item = &'a str>,
        edges: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let nodes = keys
            .into_iter()
            .map(|k| SnapshotNode {
                url_key: UrlKey::from_canonical(k),
                depth: 0,
                http_status: Some(200),
                broken: false,
            })
            .collect();
        let mut snapshot = Self::new(nodes);
        for (source, target) in edges {
            snapshot.push_edge(&UrlKey::from_canonical(source), &UrlKey::from_canonical(target));
        }
        snapshot
    }

    /// Add an edge; returns whether it was kept
    pub fn push_edge(&mut self, source: &UrlKey, target: &UrlKey) -> bool {
        let (Some(&s), Some(&t)) = (self.index.get(source), self.index.get(target)) else {
            self.unresolved_edges += 1;
            return false;
        };
        if s == t || !self.edge_set.insert((s, t)) {
            return false;
        }
        self.edges.push((s, t));
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> &[SnapshotNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn index_of(&self, url_key: &UrlKey) -> Option<usize> {
        self.index.get(url_key).copied()
    }

    pub fn out_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.nodes.len()];
        for &(s, _) in &self.edges {
            degrees[s] += 1;
        }
        degrees
    }

    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.nodes.len()];
        for &(_, t) in &self.edges {
            degrees[t] += 1;
        }
        degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{ErrorCategory, PageError};
    use uuid::Uuid;

    fn key(path: &str) -> UrlKey {
        UrlKey::from_canonical(format!("https://example.com/{}", path))
    }

    fn page(job: JobId, path: &str, status: u16) -> PageNode {
        let mut node = PageNode::failed(
            key(path),
            job,
            &format!("https://example.com/{}", path),
            1,
            PageError {
                category: ErrorCategory::HttpError,
                message: String::new(),
            },
            Some(status),
            Vec::new(),
        );
        if status < 400 {
            node.error = None;
        }
        node
    }

    fn link(from: &str, to: &str) -> LinkEdge {
        LinkEdge {
            source: key(from),
            target: key(to),
            anchor_text: to.to_string(),
            is_internal: true,
            nofollow: false,
        }
    }

    fn graph() -> LinkGraph {
        let store = Arc::new(MemoryStore::new());
        LinkGraph::new(Uuid::new_v4(), store.clone(), store)
    }

    #[tokio::test]
    async fn test_add_page_rejects_other_job() {
        let graph = graph();
        let foreign = page(Uuid::new_v4(), "a", 200);
        assert!(matches!(graph.add_page(&foreign).await, Err(StorageError::WriteFailure(_))));
    }

    #[tokio::test]
    async fn test_writes_are_idempotent() {
        let graph = graph();
        let job = graph.job_id();
        assert!(graph.add_page(&page(job, "a", 200)).await.unwrap());
        assert!(!graph.add_page(&page(job, "a", 200)).await.unwrap());
        assert!(graph.add_edge(&link("a", "b")).await.unwrap());
        assert!(!graph.add_edge(&link("a", "b")).await.unwrap());
        assert_eq!(graph.page_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_neighbors() {
        let graph = graph();
        graph
            .add_edges(&[link("a", "b"), link("a", "c"), link("c", "a"), link("d", "a")])
            .await
            .unwrap();

        assert_eq!(graph.neighbors(&key("a"), Direction::Outbound).await.unwrap(), vec![key("b"), key("c")]);
        assert_eq!(graph.neighbors(&key("a"), Direction::Inbound).await.unwrap(), vec![key("c"), key("d")]);
        assert_eq!(
            graph.neighbors(&key("a"), Direction::Both).await.unwrap(),
            vec![key("b"), key("c"), key("d")]
        );
    }

    #[tokio::test]
    async fn test_snapshot_pages_through_large_graph() {
        let graph = graph();
        let job = graph.job_id();
        let total = SNAPSHOT_BATCH * 2 + 17;
        for i in 0..total {
            graph.add_page(&page(job, &format!("p{}", i), 200)).await.unwrap();
        }
        let edges: Vec<LinkEdge> = (1..total).map(|i| link("p0", &format!("p{}", i))).collect();
        graph.add_edges(&edges).await.unwrap();
        graph.add_edge(&link("p0", "external")).await.unwrap();

        let snapshot = graph.snapshot().await.unwrap();
        assert_eq!(snapshot.node_count(), total);
        assert_eq!(snapshot.edge_count(), total - 1);
        assert_eq!(snapshot.unresolved_edges, 1);
    }

    #[test]
    fn test_snapshot_drops_self_links_and_repeats() {
        let snapshot = GraphSnapshot::from_keys(["a", "b"], [("a", "a"), ("a", "b"), ("a", "b"), ("b", "zz")]);
        assert_eq!(snapshot.edge_count(), 1);
        assert_eq!(snapshot.out_degrees(), vec![1, 0]);
        assert_eq!(snapshot.in_degrees(), vec![0, 1]);
        assert_eq!(snapshot.unresolved_edges, 1);
    }

    #[tokio::test]
    async fn test_snapshot_marks_broken_pages() {
        let graph = graph();
        let job = graph.job_id();
        graph.add_page(&page(job, "ok", 200)).await.unwrap();
        graph.add_page(&page(job, "gone", 404)).await.unwrap();

        let snapshot = graph.snapshot().await.unwrap();
        let gone = snapshot.index_of(&key("gone")).unwrap();
        assert!(snapshot.nodes()[gone].broken);
        assert_eq!(snapshot.nodes()[gone].http_status, Some(404));
    }
}
