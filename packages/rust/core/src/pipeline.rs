//! End-to-end harvest run: search → change filter → crawl → fetch/parse →
//! dedup → merge → bundle → (probe) → (deploy).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use nodeharvest_crawler::{
    ContentCrawler, CrawlLimits, CrawlOutcome, GitHubClient, QuotaGuard, SearchQuery,
    search_repositories,
};
use nodeharvest_decoder::parse_outcome;
use nodeharvest_shared::{
    CandidateLink, NodeDescriptor, ParseOutcome, ParseReport, RepositoryRef, Result, RunConfig,
};
use nodeharvest_storage::{
    BundleSummary, BundleWriter, ChangeTracker, HISTORY_FILE, HistoryStore, STATE_FILE,
};

use crate::dedup::Deduplicator;
use crate::deploy::deploy;
use crate::merge::{MergeStats, merge};
use crate::probe::{ProbeSettings, probe_reachable};

/// Subdirectory of the output directory receiving the probed bundle.
pub const VALIDATED_DIR: &str = "validated";

/// Result of one harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Repositories returned by search.
    pub repositories_found: usize,
    /// Repositories whose change marker had not moved.
    pub repositories_skipped: usize,
    pub repositories_crawled: usize,
    /// Distinct candidate files across all crawled repositories.
    pub candidate_links: usize,
    pub report: ParseReport,
    pub merge: MergeStats,
    pub bundle: BundleSummary,
    /// Present when validation ran and its bundle was written.
    pub validated: Option<BundleSummary>,
    /// Present when a deploy command is configured.
    pub deployed: Option<bool>,
    /// API calls counted against the quota.
    pub api_calls: u32,
    pub elapsed: Duration,
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a repository walk finishes.
    fn repo_crawled(&self, key: &str, current: usize, total: usize);
    /// Called when a candidate file has been fetched and classified.
    fn link_parsed(&self, source: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn repo_crawled(&self, _key: &str, _current: usize, _total: usize) {}
    fn link_parsed(&self, _source: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Run a full harvest.
///
/// Only client construction and writing the primary bundle can fail the run.
/// Everything else (a search keyword, a directory, a download, a line, the
/// state files, validation, deploy) is logged and skipped.
#[instrument(skip_all, fields(keywords = config.keywords.len(), output = %config.output_dir.display()))]
pub async fn run(
    config: &RunConfig,
    token: &str,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();
    info!("starting harvest run");

    let quota = Arc::new(QuotaGuard::new(config.quota_limit, config.quota_window));
    let client = Arc::new(GitHubClient::from_config(token, config, Arc::clone(&quota))?);

    // --- Phase 1: Search ---
    progress.phase("Searching repositories");
    let query = SearchQuery {
        keywords: config.keywords.clone(),
        max_results: config.max_results,
        per_page: config.per_page,
        page_delay: config.page_delay,
    };
    let found = search_repositories(&client, &query).await;

    // --- Phase 2: Change filter ---
    let mut tracker = ChangeTracker::load(config.output_dir.join(STATE_FILE));
    let to_crawl: Vec<RepositoryRef> = found
        .iter()
        .filter(|repo| tracker.should_process(&repo.key, &repo.change_marker))
        .cloned()
        .collect();
    let skipped = found.len() - to_crawl.len();
    info!(crawl = to_crawl.len(), unchanged = skipped, "change filter applied");

    // --- Phase 3: Crawl ---
    progress.phase("Crawling repositories");
    let crawler = Arc::new(ContentCrawler::new(
        Arc::clone(&client),
        CrawlLimits::from(config),
    ));
    let crawled = crawl_all(&crawler, &to_crawl, config.concurrency, progress).await;
    let links = unique_links(&crawled);
    info!(links = links.len(), "candidate files collected");

    // --- Phase 4: Fetch and parse ---
    progress.phase("Parsing candidate files");
    let candidate_links = links.len();
    let (fresh, report) = fetch_and_parse(&client, links, config, progress).await;
    info!(
        links = report.total_links,
        ok = report.success_count,
        failed = report.failure_count,
        nodes = report.total_nodes_seen,
        unique = report.total_unique_nodes,
        "parsing complete"
    );

    // --- Phase 5: Merge with history ---
    progress.phase("Merging with history");
    let history = HistoryStore::new(config.output_dir.join(HISTORY_FILE));
    let merged = merge(fresh, history.load(), config.merge_policy);
    info!(
        total = merged.nodes.len(),
        history = merged.from_history,
        fresh = merged.from_fresh,
        collisions = merged.collisions,
        "merged with history"
    );

    // --- Phase 6: Write outputs ---
    progress.phase("Writing bundle");
    let writer = BundleWriter::new(config.chunk_size);
    let bundle = writer.write(&config.output_dir, &merged.nodes)?;
    if let Err(e) = history.save(&merged.nodes) {
        warn!(error = %e, "failed to save node history");
    }
    // Record only repositories whose root listing succeeded, so a transient
    // failure is retried next run.
    for (repo, outcome) in &crawled {
        if outcome.stats.directories_listed == 0 {
            continue;
        }
        if let Err(e) = tracker.record_processed(&repo.key, &repo.change_marker, &repo.content_hash) {
            warn!(repo = %repo.key, error = %e, "failed to record repository state");
        }
    }

    // --- Phase 7: Validate (optional) ---
    let validated = if config.validate {
        progress.phase("Probing nodes");
        let settings = ProbeSettings {
            concurrency: config.probe_concurrency,
            timeout: config.probe_timeout,
        };
        let alive = probe_reachable(&merged.nodes, settings).await;
        match writer.write(&config.output_dir.join(VALIDATED_DIR), &alive) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "failed to write validated bundle");
                None
            }
        }
    } else {
        None
    };

    // --- Phase 8: Deploy (optional) ---
    let deployed = match &config.deploy_command {
        Some(command) => {
            progress.phase("Deploying");
            match deploy(command, &config.output_dir).await {
                Ok(ok) => Some(ok),
                Err(e) => {
                    warn!(error = %e, "deploy failed");
                    Some(false)
                }
            }
        }
        None => None,
    };

    let summary = RunSummary {
        repositories_found: found.len(),
        repositories_skipped: skipped,
        repositories_crawled: crawled.len(),
        candidate_links,
        report,
        merge: merged.stats(),
        bundle,
        validated,
        deployed,
        api_calls: quota.calls().await,
        elapsed: start.elapsed(),
    };

    info!(
        nodes = summary.bundle.node_count,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "harvest run complete"
    );

    progress.done(&summary);
    Ok(summary)
}

/// Crawl repositories in parallel, at most `concurrency` at a time.
/// Results come back in input order.
async fn crawl_all(
    crawler: &Arc<ContentCrawler>,
    repos: &[RepositoryRef],
    concurrency: usize,
    progress: &dyn ProgressReporter,
) -> Vec<(RepositoryRef, CrawlOutcome)> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (i, repo) in repos.iter().cloned().enumerate() {
        let crawler = Arc::clone(crawler);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = crawler.crawl(&repo).await;
            (i, repo, outcome)
        });
    }

    let total = repos.len();
    let mut results = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, repo, outcome)) => {
                progress.repo_crawled(&repo.key, results.len() + 1, total);
                results.push((i, repo, outcome));
            }
            Err(e) => warn!(error = %e, "crawl task failed"),
        }
    }

    results.sort_by_key(|(i, _, _)| *i);
    results
        .into_iter()
        .map(|(_, repo, outcome)| (repo, outcome))
        .collect()
}

/// Candidate links across all repositories, first occurrence of each URL.
fn unique_links(crawled: &[(RepositoryRef, CrawlOutcome)]) -> Vec<CandidateLink> {
    let mut seen = HashSet::new();
    crawled
        .iter()
        .flat_map(|(_, outcome)| outcome.links.iter())
        .filter(|link| seen.insert(link.fetch_url.clone()))
        .cloned()
        .collect()
}

/// Download and classify every link in parallel; a single consumer folds the
/// outcomes into the report and the seen-set.
///
/// Outcomes are folded in link order regardless of completion order, so the
/// first occurrence of a duplicated node is stable across runs.
async fn fetch_and_parse(
    client: &Arc<GitHubClient>,
    links: Vec<CandidateLink>,
    config: &RunConfig,
    progress: &dyn ProgressReporter,
) -> (Vec<NodeDescriptor>, ParseReport) {
    let total = links.len();
    let concurrency = config.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (tx, mut rx) = mpsc::channel::<(usize, ParseOutcome)>(concurrency * 2);

    for (i, link) in links.into_iter().enumerate() {
        let client = Arc::clone(client);
        let semaphore = Arc::clone(&semaphore);
        let tx = tx.clone();
        let max_size = config.max_file_size;
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = match client.fetch_text(&link.fetch_url, max_size).await {
                Ok(text) => parse_outcome(&link.fetch_url, text.as_bytes()),
                Err(e) => ParseOutcome::failed(&link.fetch_url, e.to_string()),
            };
            let _ = tx.send((i, outcome)).await;
        });
    }
    drop(tx);

    let mut fold = Fold::default();
    let mut pending: BTreeMap<usize, ParseOutcome> = BTreeMap::new();
    let mut next = 0;
    let mut received = 0;

    while let Some((i, outcome)) = rx.recv().await {
        received += 1;
        progress.link_parsed(&outcome.source, received, total);
        pending.insert(i, outcome);
        while let Some(outcome) = pending.remove(&next) {
            fold.push(outcome);
            next += 1;
        }
    }
    // A panicked task leaves a gap; fold whatever is left.
    for outcome in pending.into_values() {
        fold.push(outcome);
    }

    fold.finish()
}

#[derive(Default)]
struct Fold {
    report: ParseReport,
    seen: Deduplicator,
    nodes: Vec<NodeDescriptor>,
}

impl Fold {
    fn push(&mut self, outcome: ParseOutcome) {
        self.report.record(&outcome);
        if let Some(reason) = &outcome.failure {
            debug!(source = %outcome.source, reason = %reason, "link produced no nodes");
        }
        for node in outcome.nodes {
            if self.seen.insert(&node) {
                self.nodes.push(node);
            }
        }
    }

    fn finish(mut self) -> (Vec<NodeDescriptor>, ParseReport) {
        self.report.total_nodes_seen = self.seen.total();
        self.report.total_unique_nodes = self.seen.unique();
        self.report.duplicate_nodes = self.seen.duplicates();
        (self.nodes, self.report)
    }
}
