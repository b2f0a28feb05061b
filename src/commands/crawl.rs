use anyhow::{Context, Result};
use sitegraph::{
    config::{Config, CrawlConfig},
    storage::Repositories,
    CrawlCoordinator, CrawlReport, JobState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Command-line overrides of the `[crawl]` defaults
pub struct CrawlOverrides {
    pub max_depth: Option<u32>,
    pub page_cap: Option<usize>,
    pub delay_ms: Option<u64>,
    pub enable_js: bool,
    pub ignore_robots: bool,
}

impl CrawlOverrides {
    fn apply(&self, mut config: CrawlConfig) -> CrawlConfig {
        if let Some(depth) = self.max_depth {
            config.max_depth = depth;
        }
        if let Some(cap) = self.page_cap {
            config.page_cap = cap;
        }
        if let Some(delay) = self.delay_ms {
            config.crawl_delay_ms = delay;
        }
        config.enable_js |= self.enable_js;
        if self.ignore_robots {
            config.respect_robots_txt = false;
        }
        config
    }
}

pub async fn crawl(config: Config, urls: Vec<String>, overrides: CrawlOverrides, json: bool) -> Result<()> {
    let crawl_config = overrides.apply(config.crawl.clone());
    let (repos, _store) = Repositories::in_memory();
    let coordinator = Arc::new(CrawlCoordinator::new(config.engine, repos)?);

    let job_id = coordinator.start("cli", urls, crawl_config).await?;
    info!("Crawl job {} started", job_id);

    let finished = coordinator.wait(job_id);
    tokio::pin!(finished);
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    ticker.tick().await;

    let state = loop {
        tokio::select! {
            state = &mut finished => break state?,
            _ = ticker.tick() => {
                let progress = coordinator.progress(job_id)?;
                info!(
                    "{}: {} fetched, {} queued, {} pending, {} in flight, {} errors",
                    progress.state,
                    progress.counters.fetched,
                    progress.counters.queued,
                    progress.pending,
                    progress.in_flight,
                    progress.counters.errored
                );
            }
        }
    };

    if state != JobState::Completed {
        let progress = coordinator.progress(job_id)?;
        anyhow::bail!(
            "Crawl {}: {}",
            state,
            progress.error.unwrap_or_else(|| "no further detail".to_string())
        );
    }

    let report = coordinator
        .report(job_id)?
        .context("Completed crawl has no report")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &CrawlReport) {
    let counters = &report.counters;
    println!("Crawl {}", report.job_id);
    println!(
        "  pages: {} fetched, {} with errors, {} disallowed by robots.txt, {} invalid links",
        counters.fetched, counters.errored, counters.robots_disallowed, counters.invalid_urls
    );

    if !report.breakdown.status_codes.is_empty() {
        let codes: Vec<String> = report
            .breakdown
            .status_codes
            .iter()
            .map(|(code, n)| format!("{}={}", code, n))
            .collect();
        println!("  status codes: {}", codes.join(" "));
    }
    for (category, n) in &report.breakdown.errors {
        println!("  {}: {}", category.as_str(), n);
    }

    let rank = &report.pagerank;
    println!(
        "\nTop pages by PageRank ({} iterations{}):",
        rank.iterations,
        if rank.converged { "" } else { ", not converged" }
    );
    for page in &report.links.top_pages {
        println!(
            "  {:.4}  in={:<3} out={:<3} {}",
            page.score, page.indegree, page.outdegree, page.url_key
        );
    }

    let links = &report.links;
    println!("\nLinks: {} pages, {} internal edges", links.total_pages, links.total_links);
    for (depth, n) in &links.depth_distribution {
        println!("  depth {}: {} pages", depth, n);
    }
    if !links.orphan_pages.is_empty() {
        println!("  orphan pages:");
        for key in &links.orphan_pages {
            println!("    {}", key);
        }
    }
    if !links.broken_links.is_empty() {
        println!("  broken links:");
        for link in &links.broken_links {
            let status = link
                .http_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "no response".to_string());
            println!("    {} -> {} ({})", link.source, link.target, status);
        }
    }

    let dups = &report.duplicates;
    println!(
        "\nDuplicates (threshold {}): {} exact groups, {} near groups, {} pages analysed",
        dups.threshold,
        dups.exact_groups.len(),
        dups.near_groups.len(),
        dups.pages_analyzed
    );
    for group in &dups.exact_groups {
        println!("  exact:");
        for key in &group.url_keys {
            println!("    {}", key);
        }
    }
    for group in &dups.near_groups {
        println!("  near (max distance {}):", group.max_distance);
        for key in &group.url_keys {
            println!("    {}", key);
        }
    }
}
