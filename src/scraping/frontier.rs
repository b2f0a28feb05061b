//! Politeness scheduler (URL frontier)
//!
//! Job-scoped per-host FIFO queues plus the visited set. The dispatch loop
//! asks [`Frontier::next_ready`] for the next admissible entry; an entry is
//! admissible when its host has:
//! - robots.txt loaded (when robots are respected), and the path allowed
//! - fewer than `per_host_concurrency` fetches in flight
//! - `now >= last_fetch + crawl_delay` and no active 429 backoff
//!
//! Hosts live in a sharded map so concurrent workers enqueueing links for
//! different hosts do not contend on one lock.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use super::host_key;
use super::normalizer::NormalizedUrl;
use super::politeness::RobotsPolicy;
use crate::types::UrlKey;

/// Backoff after the first 429; doubled per consecutive 429
const BASE_429_BACKOFF: Duration = Duration::from_secs(30);
/// Longest 429 backoff
const MAX_429_BACKOFF: Duration = Duration::from_secs(600);

/// A URL waiting to be fetched
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url_key: UrlKey,
    pub url: Url,
    /// Politeness host key (authority)
    pub host: String,
    /// Hops from the nearest seed
    pub depth: u32,
    pub discovered_at: Instant,
    /// Higher is fetched sooner across hosts
    pub priority: f32,
    /// Dispatches so far (retries after 429)
    pub attempts: u32,
}

impl FrontierEntry {
    pub fn new(normalized: NormalizedUrl, depth: u32) -> Self {
        let host = host_key(&normalized.url).unwrap_or_default();
        Self {
            url_key: normalized.key,
            url: normalized.url,
            host,
            depth,
            discovered_at: Instant::now(),
            // Breadth-first bias
            priority: 1.0 - 0.1 * depth as f32,
            attempts: 0,
        }
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.url_key == other.url_key
    }
}

impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then older discovery time
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.discovered_at.cmp(&self.discovered_at))
    }
}

/// Frontier limits for one job
#[derive(Debug, Clone)]
pub struct FrontierConfig {
    pub max_depth: u32,
    /// Total admissions allowed for the job
    pub page_cap: usize,
    /// Minimum spacing between fetch starts on one host
    pub crawl_delay: Duration,
    pub per_host_concurrency: usize,
    /// Hold a host's queue until its robots.txt is loaded
    pub respect_robots: bool,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            page_cap: 1000,
            crawl_delay: Duration::from_secs(1),
            per_host_concurrency: 1,
            respect_robots: true,
        }
    }
}

/// Result of [`Frontier::enqueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Accepted; `new_host` is set the first time a host is seen
    Queued { new_host: bool },
    AlreadySeen,
    TooDeep,
    /// The frontier was closed by cancellation
    Closed,
}

/// Result of [`Frontier::next_ready`]
#[derive(Debug)]
pub enum NextReady {
    /// Dispatch this entry now
    Ready(FrontierEntry),
    /// Popped without dispatch: robots.txt disallows it
    Disallowed(FrontierEntry),
    /// Nothing admissible before this instant
    WaitUntil(Instant),
    /// Nothing admissible until some fetch completes or robots.txt loads
    Idle,
    /// The page cap has been reached
    CapReached,
}

/// How a dispatched fetch ended, for the host's politeness state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    Success,
    /// 429 Too Many Requests, with the server's `Retry-After` if given
    RateLimited(Option<Duration>),
    Failed,
}

#[derive(Debug)]
struct HostQueue {
    queue: VecDeque<FrontierEntry>,
    in_flight: usize,
    last_fetch: Option<Instant>,
    delay: Duration,
    robots_ready: bool,
    robots: Option<Arc<RobotsPolicy>>,
    consecutive_429s: u32,
    backoff_until: Option<Instant>,
}

impl HostQueue {
    fn new(delay: Duration, robots_ready: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: 0,
            last_fetch: None,
            delay,
            robots_ready,
            robots: None,
            consecutive_429s: 0,
            backoff_until: None,
        }
    }

    /// Earliest instant the host may start another fetch
    fn next_allowed(&self) -> Option<Instant> {
        let spacing = self.last_fetch.map(|t| t + self.delay);
        match (spacing, self.backoff_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Per-job frontier
pub struct Frontier {
    hosts: DashMap<String, HostQueue>,
    seen: DashSet<UrlKey>,
    admitted: AtomicUsize,
    closed: AtomicBool,
    config: FrontierConfig,
}

impl Frontier {
    pub fn new(config: FrontierConfig) -> Self {
        Self {
            hosts: DashMap::new(),
            seen: DashSet::new(),
            admitted: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Add a discovered URL. Idempotent on `url_key`.
    pub fn enqueue(&self, entry: FrontierEntry) -> Enqueued {
        if self.is_closed() {
            return Enqueued::Closed;
        }
        if entry.depth > self.config.max_depth {
            return Enqueued::TooDeep;
        }
        if !self.seen.insert(entry.url_key.clone()) {
            return Enqueued::AlreadySeen;
        }

        let mut new_host = false;
        let mut host = self.hosts.entry(entry.host.clone()).or_insert_with(|| {
            new_host = true;
            HostQueue::new(self.config.crawl_delay, !self.config.respect_robots)
        });
        host.queue.push_back(entry);
        Enqueued::Queued { new_host }
    }

    /// Pick the next admissible entry as of `now`.
    ///
    /// Only the dispatch loop calls this; workers only enqueue and complete.
    pub fn next_ready(&self, now: Instant) -> NextReady {
        if self.is_closed() {
            return NextReady::Idle;
        }
        if self.admitted.load(AtomicOrdering::SeqCst) >= self.config.page_cap {
            return NextReady::CapReached;
        }

        let mut best: Option<(String, FrontierEntry)> = None;
        let mut earliest_wait: Option<Instant> = None;

        for host in self.hosts.iter() {
            let state = host.value();
            if !state.robots_ready || state.in_flight >= self.config.per_host_concurrency {
                continue;
            }
            let Some(head) = state.queue.front() else {
                continue;
            };

            match state.next_allowed() {
                Some(at) if at > now => {
                    earliest_wait = Some(earliest_wait.map_or(at, |w| w.min(at)));
                }
                _ => {
                    if best.as_ref().map(|(_, b)| head > b).unwrap_or(true) {
                        best = Some((host.key().clone(), head.clone()));
                    }
                }
            }
        }

        let Some((host, _)) = best else {
            return match earliest_wait {
                Some(at) => NextReady::WaitUntil(at),
                None => NextReady::Idle,
            };
        };

        let Some(mut state) = self.hosts.get_mut(&host) else {
            return NextReady::Idle;
        };
        let Some(mut entry) = state.queue.pop_front() else {
            return NextReady::Idle;
        };

        if let Some(robots) = &state.robots {
            if !robots.is_allowed(&entry.url) {
                return NextReady::Disallowed(entry);
            }
        }

        state.in_flight += 1;
        state.last_fetch = Some(now);
        entry.attempts += 1;
        self.admitted.fetch_add(1, AtomicOrdering::SeqCst);
        NextReady::Ready(entry)
    }

    /// Record the end of a dispatched fetch
    pub fn complete(&self, host: &str, outcome: HostOutcome, now: Instant) {
        let Some(mut state) = self.hosts.get_mut(host) else {
            return;
        };
        state.in_flight = state.in_flight.saturating_sub(1);

        match outcome {
            HostOutcome::Success => {
                state.consecutive_429s = 0;
                state.backoff_until = None;
            }
            HostOutcome::RateLimited(retry_after) => {
                state.consecutive_429s += 1;
                // Exponential backoff: 30s, 60s, 120s, 240s, 480s, max 10min
                let backoff = retry_after.unwrap_or_else(|| {
                    BASE_429_BACKOFF * 2u32.pow(state.consecutive_429s.min(5) - 1)
                });
                state.backoff_until = Some(now + backoff.min(MAX_429_BACKOFF));
            }
            HostOutcome::Failed => {}
        }
    }

    /// Put a dispatched entry back at the head of its host queue (429 retry).
    ///
    /// The entry no longer counts towards the page cap.
    pub fn requeue(&self, entry: FrontierEntry) {
        if self.is_closed() {
            return;
        }
        let _ = self
            .admitted
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1));
        if let Some(mut state) = self.hosts.get_mut(&entry.host) {
            state.queue.push_front(entry);
        }
    }

    /// Release a host's queue once its robots.txt is known.
    ///
    /// The robots crawl-delay only ever lengthens the configured spacing.
    pub fn mark_robots_ready(&self, host: &str, robots: Option<Arc<RobotsPolicy>>) {
        if let Some(mut state) = self.hosts.get_mut(host) {
            if let Some(delay) = robots.as_ref().and_then(|r| r.crawl_delay) {
                state.delay = state.delay.max(delay);
            }
            state.robots = robots;
            state.robots_ready = true;
        }
    }

    /// Re-gate hosts whose robots.txt policy has expired.
    ///
    /// Returns the host key and a queued URL of each host that needs a fresh
    /// policy; those hosts admit nothing until [`Frontier::mark_robots_ready`].
    /// Hosts with nothing queued are left alone until they have work again.
    pub fn take_expired_robots(&self, now: DateTime<Utc>) -> Vec<(String, Url)> {
        let mut expired = Vec::new();
        for mut host in self.hosts.iter_mut() {
            let state = host.value_mut();
            if !state.robots_ready {
                continue;
            }
            let stale = state.robots.as_ref().is_some_and(|r| r.is_expired(now));
            if let (true, Some(head)) = (stale, state.queue.front()) {
                let url = head.url.clone();
                state.robots_ready = false;
                expired.push((host.key().clone(), url));
            }
        }
        expired
    }

    /// Stop all admissions and enqueues
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    /// Entries still queued
    pub fn pending_count(&self) -> usize {
        self.hosts.iter().map(|h| h.queue.len()).sum()
    }

    /// Fetches admitted but not yet completed
    pub fn in_flight(&self) -> usize {
        self.hosts.iter().map(|h| h.in_flight).sum()
    }

    pub fn admitted_count(&self) -> usize {
        self.admitted.load(AtomicOrdering::SeqCst)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_seen(&self, key: &UrlKey) -> bool {
        self.seen.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::normalizer::UrlNormalizer;
    use crate::scraping::politeness::RobotsSource;

    fn entry(raw: &str, depth: u32) -> FrontierEntry {
        let normalized = UrlNormalizer::default().normalize(raw, None).unwrap();
        FrontierEntry::new(normalized, depth)
    }

    fn frontier(delay_ms: u64) -> Frontier {
        Frontier::new(FrontierConfig {
            max_depth: 3,
            page_cap: 100,
            crawl_delay: Duration::from_millis(delay_ms),
            per_host_concurrency: 1,
            respect_robots: false,
        })
    }

    fn expect_ready(frontier: &Frontier, now: Instant) -> FrontierEntry {
        match frontier.next_ready(now) {
            NextReady::Ready(entry) => entry,
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_entry_priority_ordering() {
        let shallow = entry("https://example.com/a", 0);
        let deep = entry("https://example.com/b", 2);
        assert!(shallow > deep);
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let frontier = frontier(0);

        assert_eq!(
            frontier.enqueue(entry("https://example.com/page", 0)),
            Enqueued::Queued { new_host: true }
        );
        assert_eq!(
            frontier.enqueue(entry("https://example.com/page#frag", 1)),
            Enqueued::AlreadySeen
        );
        assert_eq!(
            frontier.enqueue(entry("https://example.com/other", 1)),
            Enqueued::Queued { new_host: false }
        );
        assert_eq!(frontier.pending_count(), 2);
        assert_eq!(frontier.seen_count(), 2);
    }

    #[test]
    fn test_visited_url_is_not_resurrected() {
        let frontier = frontier(0);
        frontier.enqueue(entry("https://example.com/a", 0));
        let now = Instant::now();
        let a = expect_ready(&frontier, now);
        frontier.complete(&a.host, HostOutcome::Success, now);

        assert_eq!(frontier.enqueue(entry("https://example.com/a", 1)), Enqueued::AlreadySeen);
        assert!(matches!(frontier.next_ready(now), NextReady::Idle));
    }

    #[test]
    fn test_depth_limit() {
        let frontier = frontier(0);
        assert_eq!(frontier.enqueue(entry("https://example.com/deep", 4)), Enqueued::TooDeep);
        assert!(!frontier.is_seen(&entry("https://example.com/deep", 4).url_key));
    }

    #[test]
    fn test_same_host_spacing() {
        let frontier = frontier(300);
        frontier.enqueue(entry("https://example.com/1", 0));
        frontier.enqueue(entry("https://example.com/2", 0));

        let t0 = Instant::now();
        let first = expect_ready(&frontier, t0);

        // Host busy
        assert!(matches!(frontier.next_ready(t0), NextReady::Idle));

        frontier.complete(&first.host, HostOutcome::Success, t0 + Duration::from_millis(50));
        match frontier.next_ready(t0 + Duration::from_millis(100)) {
            NextReady::WaitUntil(at) => assert_eq!(at, t0 + Duration::from_millis(300)),
            other => panic!("expected WaitUntil, got {:?}", other),
        }

        let second = expect_ready(&frontier, t0 + Duration::from_millis(300));
        assert_eq!(second.url.path(), "/2");
    }

    #[test]
    fn test_hosts_are_independent() {
        let frontier = frontier(1000);
        frontier.enqueue(entry("https://a.example.com/", 0));
        frontier.enqueue(entry("https://a.example.com/next", 0));
        frontier.enqueue(entry("https://b.example.com/", 0));

        let now = Instant::now();
        let first = expect_ready(&frontier, now);
        let second = expect_ready(&frontier, now);
        assert_ne!(first.host, second.host);
        assert_eq!(frontier.in_flight(), 2);
    }

    #[test]
    fn test_breadth_first_across_hosts() {
        let frontier = frontier(0);
        frontier.enqueue(entry("https://a.example.com/deep", 2));
        frontier.enqueue(entry("https://b.example.com/", 0));

        let first = expect_ready(&frontier, Instant::now());
        assert_eq!(first.depth, 0);
    }

    #[test]
    fn test_page_cap() {
        let frontier = Frontier::new(FrontierConfig {
            page_cap: 1,
            crawl_delay: Duration::ZERO,
            respect_robots: false,
            ..Default::default()
        });
        frontier.enqueue(entry("https://a.example.com/", 0));
        frontier.enqueue(entry("https://b.example.com/", 0));

        let now = Instant::now();
        expect_ready(&frontier, now);
        assert!(matches!(frontier.next_ready(now), NextReady::CapReached));
    }

    #[test]
    fn test_robots_gate_and_disallow() {
        let frontier = Frontier::new(FrontierConfig {
            crawl_delay: Duration::ZERO,
            respect_robots: true,
            ..Default::default()
        });
        frontier.enqueue(entry("https://example.com/private/x", 0));
        frontier.enqueue(entry("https://example.com/public", 0));

        let now = Instant::now();
        // Waiting for robots.txt
        assert!(matches!(frontier.next_ready(now), NextReady::Idle));

        let robots = RobotsPolicy::parse(
            "example.com",
            "User-agent: *\nDisallow: /private\nCrawl-delay: 2",
            "SitegraphBot",
            Duration::from_secs(60),
        );
        assert_eq!(robots.source, RobotsSource::Fetched);
        frontier.mark_robots_ready("example.com", Some(Arc::new(robots)));

        match frontier.next_ready(now) {
            NextReady::Disallowed(e) => assert_eq!(e.url.path(), "/private/x"),
            other => panic!("expected Disallowed, got {:?}", other),
        }
        let public = expect_ready(&frontier, now);
        assert_eq!(public.url.path(), "/public");
        assert_eq!(frontier.admitted_count(), 1);

        frontier.complete(&public.host, HostOutcome::Success, now);
        frontier.enqueue(entry("https://example.com/later", 0));
        match frontier.next_ready(now) {
            NextReady::WaitUntil(at) => assert_eq!(at, now + Duration::from_secs(2)),
            other => panic!("expected WaitUntil, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_robots_policy_is_reloaded() {
        let frontier = Frontier::new(FrontierConfig {
            crawl_delay: Duration::ZERO,
            respect_robots: true,
            ..Default::default()
        });
        frontier.enqueue(entry("https://example.com/a", 0));
        frontier.enqueue(entry("https://example.com/b", 0));

        let robots = RobotsPolicy::parse("example.com", "User-agent: *\nAllow: /", "SitegraphBot", Duration::from_secs(60));
        let fetched_at = robots.fetched_at;
        frontier.mark_robots_ready("example.com", Some(Arc::new(robots)));

        // Still fresh
        assert!(frontier.take_expired_robots(fetched_at).is_empty());
        let now = Instant::now();
        let a = expect_ready(&frontier, now);
        frontier.complete(&a.host, HostOutcome::Success, now);

        let later = fetched_at + chrono::Duration::seconds(61);
        let expired = frontier.take_expired_robots(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "example.com");
        assert_eq!(expired[0].1.path(), "/b");
        assert!(matches!(frontier.next_ready(now), NextReady::Idle));
        // Reported once until reloaded
        assert!(frontier.take_expired_robots(later).is_empty());

        let refreshed = RobotsPolicy::parse("example.com", "User-agent: *\nDisallow: /b", "SitegraphBot", Duration::from_secs(60));
        frontier.mark_robots_ready("example.com", Some(Arc::new(refreshed)));
        match frontier.next_ready(now) {
            NextReady::Disallowed(e) => assert_eq!(e.url.path(), "/b"),
            other => panic!("expected Disallowed, got {:?}", other),
        }
    }

    #[test]
    fn test_429_backoff() {
        let frontier = frontier(0);
        frontier.enqueue(entry("https://example.com/a", 0));

        let now = Instant::now();
        let a = expect_ready(&frontier, now);
        frontier.complete(&a.host, HostOutcome::RateLimited(None), now);
        frontier.requeue(a);
        assert_eq!(frontier.admitted_count(), 0);

        match frontier.next_ready(now) {
            NextReady::WaitUntil(at) => assert_eq!(at, now + BASE_429_BACKOFF),
            other => panic!("expected WaitUntil, got {:?}", other),
        }

        let retry = expect_ready(&frontier, now + BASE_429_BACKOFF);
        assert_eq!(retry.attempts, 2);
        frontier.complete(&retry.host, HostOutcome::RateLimited(Some(Duration::from_secs(5))), now);
        frontier.requeue(retry);
        match frontier.next_ready(now) {
            NextReady::WaitUntil(at) => assert_eq!(at, now + BASE_429_BACKOFF),
            other => panic!("expected WaitUntil, got {:?}", other),
        }
    }

    #[test]
    fn test_close_stops_everything() {
        let frontier = frontier(0);
        frontier.enqueue(entry("https://example.com/a", 0));
        frontier.close();
        assert!(matches!(frontier.next_ready(Instant::now()), NextReady::Idle));
        assert_eq!(frontier.enqueue(entry("https://example.com/b", 0)), Enqueued::Closed);
        assert_eq!(frontier.pending_count(), 1);
    }
}
