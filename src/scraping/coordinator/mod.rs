//! Crawl job coordinator
//!
//! Owns every job started through it. Each job gets its own frontier, link
//! graph and duplicate detector, and one dispatch task that:
//! - admits ready frontier entries to workers under the global fetch cap
//! - commits worker results and feeds discovered links back to the frontier
//! - finalizes with PageRank, duplicate clustering and link analysis once
//!   nothing is queued or in flight
//!
//! Per-page failures are recorded on page nodes. A storage write failure is
//! the only thing that fails a job; pages already written stay in the store.

mod types;
mod url_filter;

pub use types::*;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use self::url_filter::UrlFilter;
use super::dedup::{DuplicateDetector, PageComparison};
use super::extractor::ContentExtractor;
use super::fetcher::FetchEngine;
use super::frontier::{Enqueued, Frontier, FrontierConfig, FrontierEntry, HostOutcome, NextReady};
use super::normalizer::{NormalizedUrl, UrlNormalizer};
use super::politeness::{RobotsCache, RobotsPolicy};
use super::render::{HttpRenderService, RenderService};
use super::site_host;
use super::worker::{CrawlContext, PageResult, PageWorker};
use crate::config::{CrawlConfig, EngineConfig};
use crate::graph::{LinkAnalysis, LinkGraph, PageRank};
use crate::storage::{Repositories, StorageError};
use crate::types::{CrawlJob, ErrorCategory, JobId, JobState, ProjectId, UrlKey};

/// Runs crawl jobs against one set of repositories
pub struct CrawlCoordinator {
    engine: EngineConfig,
    repos: Repositories,
    robots: Arc<RobotsCache>,
    worker: Arc<PageWorker>,
    filter: Arc<UrlFilter>,
    /// Global fetch cap shared by all jobs
    fetch_permits: Arc<Semaphore>,
    jobs: DashMap<JobId, Arc<JobHandle>>,
}

impl CrawlCoordinator {
    /// Create a coordinator, connecting to the render service if one is configured
    pub fn new(engine: EngineConfig, repos: Repositories) -> Result<Self, CoordinatorError> {
        engine.validate().map_err(CoordinatorError::InvalidConfig)?;
        let renderer: Option<Arc<dyn RenderService>> = match engine.render_config() {
            Some(config) => Some(Arc::new(HttpRenderService::new(config)?)),
            None => None,
        };
        Self::with_renderer(engine, repos, renderer)
    }

    /// Create a coordinator with an explicit render service
    pub fn with_renderer(
        engine: EngineConfig,
        repos: Repositories,
        renderer: Option<Arc<dyn RenderService>>,
    ) -> Result<Self, CoordinatorError> {
        engine.validate().map_err(CoordinatorError::InvalidConfig)?;

        let mut robots = RobotsCache::new(engine.robots_config())?;
        if let Some(repository) = &repos.robots {
            robots = robots.with_repository(Arc::clone(repository));
        }

        let fetcher = Arc::new(FetchEngine::new(engine.fetch_config())?);
        let worker = PageWorker::new(
            fetcher,
            renderer,
            Arc::new(ContentExtractor::default()),
            Arc::new(UrlNormalizer::new(engine.normalizer_config())),
            Duration::from_millis(engine.render_timeout_ms),
        );

        Ok(Self {
            filter: Arc::new(UrlFilter::new(&engine)),
            fetch_permits: Arc::new(Semaphore::new(engine.max_concurrent_fetches)),
            robots: Arc::new(robots),
            worker: Arc::new(worker),
            jobs: DashMap::new(),
            engine,
            repos,
        })
    }

    /// Validate and persist a new job, then start crawling in the background.
    ///
    /// Seeds that fail normalization are skipped and counted as invalid URLs;
    /// the job is rejected only when none is usable.
    pub async fn start(
        self: &Arc<Self>,
        project_id: impl Into<ProjectId>,
        seed_urls: Vec<String>,
        config: CrawlConfig,
    ) -> Result<JobId, CoordinatorError> {
        config.validate().map_err(CoordinatorError::InvalidConfig)?;
        if config.enable_js && !self.worker.has_renderer() {
            return Err(CoordinatorError::InvalidConfig(vec![
                "enable_js requires a render_endpoint".to_string(),
            ]));
        }

        let mut seeds = Vec::new();
        let mut invalid = 0;
        for raw in &seed_urls {
            match self.worker.normalizer().normalize(raw, None) {
                Ok(seed) => seeds.push(seed),
                Err(e) => {
                    warn!("Ignoring seed '{}': {}", raw, e);
                    invalid += 1;
                }
            }
        }
        if seeds.is_empty() {
            return Err(CoordinatorError::NoValidSeeds);
        }

        let mut job = CrawlJob::new(project_id, seed_urls, config.clone());
        job.counters.invalid_urls = invalid;
        self.repos.jobs.put_job(&job).await?;

        let job_id = job.id;
        let frontier = Arc::new(Frontier::new(FrontierConfig {
            max_depth: config.max_depth,
            page_cap: config.page_cap,
            crawl_delay: config.crawl_delay(),
            per_host_concurrency: self.engine.per_host_concurrency,
            respect_robots: config.respect_robots_txt,
        }));
        let (state, _) = watch::channel(JobState::Pending);
        let handle = Arc::new(JobHandle {
            status: Mutex::new(JobStatus {
                job,
                breakdown: Breakdown::default(),
                report: None,
            }),
            state,
            frontier,
            graph: LinkGraph::new(job_id, Arc::clone(&self.repos.pages), Arc::clone(&self.repos.edges)),
            dedup: Arc::new(DuplicateDetector::new(self.engine.min_dedup_words)),
        });
        self.jobs.insert(job_id, Arc::clone(&handle));

        info!("Starting crawl job {} with {} seed(s)", job_id, seeds.len());
        tokio::spawn(Arc::clone(self).run_job(handle, seeds));
        Ok(job_id)
    }

    /// Stop admissions immediately. In-flight fetches finish but nothing
    /// they produce is written.
    pub fn cancel(&self, job_id: JobId) -> Result<(), CoordinatorError> {
        let handle = self.handle(job_id)?;
        handle.transition(JobState::Cancelled)?;
        handle.frontier.close();
        info!("Cancelled crawl job {}", job_id);
        Ok(())
    }

    /// Stop admissions; in-flight fetches are still committed
    pub fn pause(&self, job_id: JobId) -> Result<(), CoordinatorError> {
        self.handle(job_id)?.transition(JobState::Paused)?;
        info!("Paused crawl job {}", job_id);
        Ok(())
    }

    pub fn resume(&self, job_id: JobId) -> Result<(), CoordinatorError> {
        let handle = self.handle(job_id)?;
        let current = handle.state();
        if current != JobState::Paused {
            return Err(CoordinatorError::InvalidTransition {
                job_id,
                from: current,
                to: JobState::Running,
            });
        }
        handle.transition(JobState::Running)?;
        info!("Resumed crawl job {}", job_id);
        Ok(())
    }

    pub fn progress(&self, job_id: JobId) -> Result<CrawlProgress, CoordinatorError> {
        let handle = self.handle(job_id)?;
        let (pending, in_flight, hosts) = (
            handle.frontier.pending_count(),
            handle.frontier.in_flight(),
            handle.frontier.host_count(),
        );
        let status = handle.status.lock();
        Ok(CrawlProgress {
            job_id,
            state: status.job.state,
            counters: status.job.counters.clone(),
            pending,
            in_flight,
            hosts,
            breakdown: status.breakdown.clone(),
            started_at: status.job.started_at,
            finished_at: status.job.finished_at,
            error: status.job.error.clone(),
        })
    }

    /// Finalized results; `None` until the job has completed
    pub fn report(&self, job_id: JobId) -> Result<Option<CrawlReport>, CoordinatorError> {
        Ok(self.handle(job_id)?.status.lock().report.clone())
    }

    /// Current job record
    pub fn job(&self, job_id: JobId) -> Result<CrawlJob, CoordinatorError> {
        Ok(self.handle(job_id)?.status.lock().job.clone())
    }

    /// Link graph of a job, for reading page records and edges
    pub fn graph(&self, job_id: JobId) -> Result<LinkGraph, CoordinatorError> {
        Ok(self.handle(job_id)?.graph.clone())
    }

    /// Compare the content fingerprints of two pages of a job.
    ///
    /// `None` when either page was not registered for duplicate analysis.
    pub fn compare_pages(&self, job_id: JobId, a: &UrlKey, b: &UrlKey) -> Result<Option<PageComparison>, CoordinatorError> {
        let handle = self.handle(job_id)?;
        let threshold = handle.status.lock().job.config.dedup_threshold;
        Ok(handle.dedup.compare(a, b, threshold))
    }

    /// Resolve once the job is completed, failed or cancelled
    pub async fn wait(&self, job_id: JobId) -> Result<JobState, CoordinatorError> {
        let handle = self.handle(job_id)?;
        let mut state = handle.state.subscribe();
        let terminal = state.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        Ok(terminal.unwrap_or_else(|_| handle.state()))
    }

    fn handle(&self, job_id: JobId) -> Result<Arc<JobHandle>, CoordinatorError> {
        self.jobs
            .get(&job_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(CoordinatorError::UnknownJob(job_id))
    }

    async fn persist(&self, handle: &JobHandle) -> Result<(), StorageError> {
        let job = handle.status.lock().job.clone();
        self.repos.jobs.put_job(&job).await
    }

    /// Write the terminal job record. A failure here can no longer change the
    /// state, so it is kept on the record in memory.
    async fn persist_final(&self, handle: &JobHandle) {
        if let Err(e) = self.persist(handle).await {
            warn!("Failed to persist final record of job {}: {}", handle.graph.job_id(), e);
            handle.update(|s| {
                s.breakdown.record_error(ErrorCategory::StorageWriteFailure);
                s.job
                    .error
                    .get_or_insert_with(|| format!("Failed to persist job record: {}", e));
            });
        }
    }

    /// Dispatch loop of one job
    async fn run_job(self: Arc<Self>, handle: Arc<JobHandle>, seeds: Vec<NormalizedUrl>) {
        let job_id = handle.graph.job_id();
        if let Err(e) = handle.transition(JobState::Running) {
            debug!("Job {} not started: {}", job_id, e);
            self.persist_final(&handle).await;
            return;
        }
        if let Err(e) = self.persist(&handle).await {
            handle.fail(format!("Failed to persist job record: {}", e));
            self.persist_final(&handle).await;
            return;
        }

        let config = handle.status.lock().job.config.clone();
        let ctx = Arc::new(CrawlContext {
            job_id,
            enable_js: config.enable_js,
            seed_sites: seeds.iter().filter_map(|s| site_host(&s.url)).collect(),
        });
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut state_rx = handle.state.subscribe();

        let mut run = JobRun {
            coordinator: Arc::clone(&self),
            handle: Arc::clone(&handle),
            ctx,
            config,
            events,
            tasks: 0,
            robots_pending: 0,
            cap_reached: false,
            spare_permit: None,
        };
        for seed in seeds {
            run.enqueue(seed, 0);
        }

        loop {
            let state = *state_rx.borrow_and_update();
            if state.is_terminal() {
                break;
            }

            let mut dispatch = Dispatch::default();
            if state == JobState::Running {
                dispatch = run.dispatch();
                if run.is_drained(&dispatch) {
                    match run.finalize().await {
                        Ok(true) => break,
                        // Paused or cancelled while finalizing
                        Ok(false) => continue,
                        Err(e) => {
                            run.fail(format!("Storage failure while finalizing: {}", e));
                            continue;
                        }
                    }
                }
            } else {
                run.spare_permit = None;
            }

            let wake_at = dispatch.wake_at;
            tokio::select! {
                Some(event) = rx.recv() => {
                    if let Err(e) = run.on_event(event).await {
                        run.fail(e.to_string());
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {}
                permit = Arc::clone(&self.fetch_permits).acquire_owned(), if dispatch.starved => {
                    run.spare_permit = permit.ok();
                }
            }
        }

        // Wait out in-flight fetches; their results are discarded
        run.spare_permit = None;
        while run.tasks > 0 {
            match rx.recv().await {
                Some(event) => {
                    let _ = run.on_event(event).await;
                }
                None => break,
            }
        }

        let job = handle.status.lock().job.clone();
        info!(
            "Crawl job {} finished as {}: {} fetched, {} errors, {} disallowed, {} discarded",
            job_id,
            job.state,
            job.counters.fetched,
            job.counters.errored,
            job.counters.robots_disallowed,
            job.counters.discarded
        );
        self.persist_final(&handle).await;
    }
}

/// Mutable record of a job, guarded by one lock
struct JobStatus {
    job: CrawlJob,
    breakdown: Breakdown,
    report: Option<CrawlReport>,
}

/// Shared per-job state
struct JobHandle {
    status: Mutex<JobStatus>,
    /// Broadcast of `status.job.state`
    state: watch::Sender<JobState>,
    frontier: Arc<Frontier>,
    graph: LinkGraph,
    dedup: Arc<DuplicateDetector>,
}

impl JobHandle {
    fn state(&self) -> JobState {
        *self.state.borrow()
    }

    fn transition(&self, to: JobState) -> Result<JobState, CoordinatorError> {
        self.transition_with(to, |_| {})
    }

    /// Move to `to` if the lifecycle allows it, applying `update` under the
    /// same lock before the new state is broadcast
    fn transition_with(&self, to: JobState, update: impl FnOnce(&mut JobStatus)) -> Result<JobState, CoordinatorError> {
        let mut status = self.status.lock();
        let from = status.job.state;
        if !from.can_transition_to(to) {
            return Err(CoordinatorError::InvalidTransition {
                job_id: status.job.id,
                from,
                to,
            });
        }

        status.job.state = to;
        if to == JobState::Running && status.job.started_at.is_none() {
            status.job.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            status.job.finished_at = Some(Utc::now());
        }
        update(&mut *status);
        self.state.send_replace(to);
        Ok(from)
    }

    fn update(&self, update: impl FnOnce(&mut JobStatus)) {
        update(&mut *self.status.lock());
    }

    /// Fail the job on a storage error and stop admissions
    fn fail(&self, message: String) {
        warn!("Crawl job {} failed: {}", self.graph.job_id(), message);
        let _ = self.transition_with(JobState::Failed, |s| {
            s.breakdown.record_error(ErrorCategory::StorageWriteFailure);
            s.job.error = Some(message);
        });
        self.frontier.close();
    }
}

enum WorkerEvent {
    PageDone(Box<PageResult>),
    RobotsLoaded { host: String, policy: Arc<RobotsPolicy> },
}

/// What one dispatch round ended on
#[derive(Debug, Default)]
struct Dispatch {
    /// Earliest instant a queued entry becomes admissible
    wake_at: Option<Instant>,
    /// Every global fetch permit is taken
    starved: bool,
    /// Nothing admissible until a fetch completes or robots.txt loads
    idle: bool,
}

/// Loop-local state of a running job
struct JobRun {
    coordinator: Arc<CrawlCoordinator>,
    handle: Arc<JobHandle>,
    ctx: Arc<CrawlContext>,
    config: CrawlConfig,
    events: mpsc::UnboundedSender<WorkerEvent>,
    /// Fetch tasks spawned and not yet reported
    tasks: usize,
    /// robots.txt loads not yet reported
    robots_pending: usize,
    cap_reached: bool,
    spare_permit: Option<OwnedSemaphorePermit>,
}

impl JobRun {
    fn enqueue(&mut self, url: NormalizedUrl, depth: u32) {
        let entry = FrontierEntry::new(url, depth);
        let host = entry.host.clone();
        let robots_url = entry.url.clone();

        if let Enqueued::Queued { new_host } = self.handle.frontier.enqueue(entry) {
            self.handle.update(|s| s.job.counters.queued += 1);
            if new_host && self.config.respect_robots_txt {
                self.load_robots(host, robots_url);
            }
        }
    }

    fn load_robots(&mut self, host: String, url: Url) {
        self.robots_pending += 1;
        let robots = Arc::clone(&self.coordinator.robots);
        let events = self.events.clone();
        tokio::spawn(async move {
            let policy = robots.policy_for(&url).await;
            let _ = events.send(WorkerEvent::RobotsLoaded { host, policy });
        });
    }

    /// Admit ready entries while global fetch permits are available
    fn dispatch(&mut self) -> Dispatch {
        let mut outcome = Dispatch::default();
        self.cap_reached = false;

        if self.config.respect_robots_txt {
            for (host, url) in self.handle.frontier.take_expired_robots(Utc::now()) {
                debug!("robots.txt for {} expired, reloading", host);
                self.load_robots(host, url);
            }
        }

        loop {
            let permit = match self.spare_permit.take() {
                Some(permit) => permit,
                None => match Arc::clone(&self.coordinator.fetch_permits).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        outcome.starved = true;
                        return outcome;
                    }
                },
            };

            match self.handle.frontier.next_ready(Instant::now()) {
                NextReady::Ready(entry) => self.spawn_fetch(entry, permit),
                NextReady::Disallowed(entry) => {
                    debug!("robots.txt disallows {}", entry.url);
                    self.spare_permit = Some(permit);
                    self.handle.update(|s| {
                        s.job.counters.robots_disallowed += 1;
                        s.breakdown.record_error(ErrorCategory::RobotsDisallowed);
                    });
                }
                NextReady::WaitUntil(at) => {
                    outcome.wake_at = Some(at);
                    return outcome;
                }
                NextReady::Idle => {
                    outcome.idle = true;
                    return outcome;
                }
                NextReady::CapReached => {
                    self.cap_reached = true;
                    return outcome;
                }
            }
        }
    }

    fn spawn_fetch(&mut self, entry: FrontierEntry, permit: OwnedSemaphorePermit) {
        debug!("Dispatching {} (depth {}, attempt {})", entry.url, entry.depth, entry.attempts);
        self.tasks += 1;
        let worker = Arc::clone(&self.coordinator.worker);
        let ctx = Arc::clone(&self.ctx);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = worker.process(entry, &ctx).await;
            drop(permit);
            let _ = events.send(WorkerEvent::PageDone(Box::new(result)));
        });
    }

    /// Nothing queued that could still be admitted, and nothing outstanding
    fn is_drained(&self, dispatch: &Dispatch) -> bool {
        self.tasks == 0
            && self.robots_pending == 0
            && (self.cap_reached || dispatch.idle || self.handle.frontier.pending_count() == 0)
    }

    async fn on_event(&mut self, event: WorkerEvent) -> Result<(), StorageError> {
        match event {
            WorkerEvent::RobotsLoaded { host, policy } => {
                self.robots_pending = self.robots_pending.saturating_sub(1);
                debug!("robots.txt ready for {} ({:?})", host, policy.source);
                self.handle.frontier.mark_robots_ready(&host, Some(policy));
                Ok(())
            }
            WorkerEvent::PageDone(result) => self.on_page_done(*result).await,
        }
    }

    async fn on_page_done(&mut self, result: PageResult) -> Result<(), StorageError> {
        self.tasks = self.tasks.saturating_sub(1);
        let frontier = &self.handle.frontier;
        frontier.complete(&result.entry.host, result.host_outcome, Instant::now());

        if self.handle.state().is_terminal() {
            debug!("Discarding result for {}", result.entry.url);
            self.handle.update(|s| s.job.counters.discarded += 1);
            return Ok(());
        }

        if let HostOutcome::RateLimited(_) = result.host_outcome {
            if result.entry.attempts < MAX_FETCH_ATTEMPTS {
                debug!("Rate limited on {}, requeueing", result.entry.url);
                frontier.requeue(result.entry);
                return Ok(());
            }
        }

        self.commit(result).await
    }

    /// Write a page and its edges, then feed its links to the frontier
    async fn commit(&mut self, result: PageResult) -> Result<(), StorageError> {
        let PageResult {
            entry,
            node,
            edges,
            discovered,
            invalid_links,
            fingerprint,
            ..
        } = result;

        self.handle.graph.add_page(&node).await?;
        self.handle.graph.add_edges(&edges).await?;

        if node.error.is_none() {
            if let Some(fingerprint) = fingerprint {
                self.handle.dedup.register(node.url_key.clone(), fingerprint);
            }
        }

        self.handle.update(|s| {
            s.job.counters.fetched += 1;
            s.job.counters.invalid_urls += invalid_links as u64;
            if let Some(status) = node.http_status {
                s.breakdown.record_status(status);
            }
            if let Some(error) = &node.error {
                s.job.counters.errored += 1;
                s.breakdown.record_error(error.category);
            }
            if node.js_render_failed {
                s.breakdown.record_error(ErrorCategory::RenderServiceTimeout);
            }
        });

        for url in discovered {
            if self.coordinator.filter.allows(&url.url) {
                self.enqueue(url, entry.depth + 1);
            }
        }
        Ok(())
    }

    /// Rank, cluster and analyse the finished graph, then complete the job.
    ///
    /// Returns `false` if the job left `running` in the meantime.
    async fn finalize(&mut self) -> Result<bool, StorageError> {
        let job_id = self.ctx.job_id;
        debug!("Crawl job {} drained, finalizing", job_id);

        let engine = &self.coordinator.engine;
        let snapshot = self.handle.graph.snapshot().await?;
        let pagerank = PageRank::compute(&snapshot, &engine.pagerank_config());
        let links = LinkAnalysis::analyze(&snapshot, &pagerank, &engine.analysis_config());
        let duplicates = self.handle.dedup.cluster(self.config.dedup_threshold);

        info!(
            "Crawl job {}: {} pages, {} links, PageRank {} in {} iterations, {} exact / {} near duplicate groups",
            job_id,
            snapshot.node_count(),
            snapshot.edge_count(),
            if pagerank.converged { "converged" } else { "did not converge" },
            pagerank.iterations,
            duplicates.exact_groups.len(),
            duplicates.near_groups.len()
        );

        // The completed record must reach the store before the job reports it
        let mut record = self.handle.status.lock().job.clone();
        record.state = JobState::Completed;
        record.finished_at = Some(Utc::now());
        self.coordinator.repos.jobs.put_job(&record).await?;

        let completed = self.handle.transition_with(JobState::Completed, |s| {
            s.report = Some(CrawlReport {
                job_id,
                counters: s.job.counters.clone(),
                breakdown: s.breakdown.clone(),
                pagerank,
                duplicates,
                links,
            });
        });
        match completed {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("Job {} not completed: {}", job_id, e);
                self.coordinator.persist(&self.handle).await?;
                Ok(false)
            }
        }
    }

    fn fail(&self, message: String) {
        self.handle.fail(message);
    }
}
