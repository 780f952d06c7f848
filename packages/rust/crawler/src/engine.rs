//! Depth- and size-bounded repository content crawler.
//!
//! Walks one repository's file tree breadth-first through the contents API,
//! one directory at a time. Each directory listing is fetched page by page,
//! filtered entry by entry, and yields subdirectories to visit and candidate
//! files to download. Failures abandon a single directory, never the crawl.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use nodeharvest_shared::{CandidateLink, ContentEntry, EntryKind, RepositoryRef, RunConfig};

use crate::client::GitHubClient;

/// Directory names that are pure date stamps (`2024`, `20240131`, `2024-01`, `2024_01_31`).
static DATE_STAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}([-_.]?\d{2}){0,2}$").expect("date stamp regex"));

/// File names associated with subscription content.
static KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(v2ray|clash|node|proxy|proxies|sub|vless|vmess|trojan|hysteria|ssr|shadowsocks)")
        .expect("keyword regex")
});

const RESERVED_PREFIXES: [char; 2] = ['.', '_'];
const BASE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "txt"];

// ---------------------------------------------------------------------------
// Settings and results
// ---------------------------------------------------------------------------

/// Limits for one repository walk.
#[derive(Debug, Clone)]
pub struct CrawlLimits {
    /// Deepest directory level fetched; the root is level 0.
    pub max_depth: u32,
    pub max_file_size: u64,
    /// A listing with more entries than this is abandoned.
    pub max_dir_entries: usize,
    pub per_page: usize,
    pub page_delay: Duration,
    pub include_json: bool,
}

impl From<&RunConfig> for CrawlLimits {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_file_size: config.max_file_size,
            max_dir_entries: config.max_dir_entries,
            per_page: config.per_page.max(1),
            page_delay: config.page_delay,
            include_json: config.include_json,
        }
    }
}

/// Counters for one repository walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub directories_listed: usize,
    pub directories_abandoned: usize,
    pub depth_cutoffs: usize,
    pub oversized: usize,
    pub skipped: usize,
}

/// Candidate files and counters from one repository.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub links: Vec<CandidateLink>,
    pub stats: CrawlStats,
}

/// What to do with one listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDecision {
    /// Descend into the directory at this API URL.
    Recurse(String),
    /// Candidate file.
    Emit(CandidateLink),
    Skip(SkipReason),
}

/// Why an entry was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingFields,
    Reserved,
    Oversized,
    DateStamp,
    Extension,
    Keyword,
    Scheme,
    Unsupported,
}

enum Listing {
    Entries(Vec<ContentEntry>),
    TooLarge(usize),
}

// ---------------------------------------------------------------------------
// ContentCrawler
// ---------------------------------------------------------------------------

/// Walks repository trees through the contents API.
pub struct ContentCrawler {
    client: Arc<GitHubClient>,
    limits: CrawlLimits,
}

impl ContentCrawler {
    pub fn new(client: Arc<GitHubClient>, limits: CrawlLimits) -> Self {
        Self { client, limits }
    }

    /// Collect candidate links from one repository.
    #[instrument(skip_all, fields(repo = %repo.key))]
    pub async fn crawl(&self, repo: &RepositoryRef) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::default();
        let mut queue: VecDeque<(String, u32)> = VecDeque::from([(repo.contents_url.clone(), 0)]);

        while let Some((dir_url, depth)) = queue.pop_front() {
            let entries = match self.list_all(&dir_url).await {
                Ok(Listing::Entries(entries)) => entries,
                Ok(Listing::TooLarge(seen)) => {
                    warn!(dir = %dir_url, entries = seen, "directory too large, abandoned");
                    outcome.stats.directories_abandoned += 1;
                    continue;
                }
                Err(e) => {
                    warn!(dir = %dir_url, error = %e, "directory listing failed, abandoned");
                    outcome.stats.directories_abandoned += 1;
                    continue;
                }
            };
            outcome.stats.directories_listed += 1;

            for entry in &entries {
                match classify_entry(entry, &self.limits) {
                    EntryDecision::Recurse(child) => {
                        if depth + 1 > self.limits.max_depth {
                            warn!(dir = %child, depth = depth + 1, "depth ceiling reached, not descending");
                            outcome.stats.depth_cutoffs += 1;
                        } else {
                            queue.push_back((child, depth + 1));
                        }
                    }
                    EntryDecision::Emit(link) => {
                        debug!(file = %link.name, "candidate");
                        outcome.links.push(link);
                    }
                    EntryDecision::Skip(SkipReason::Oversized) => outcome.stats.oversized += 1,
                    EntryDecision::Skip(reason) => {
                        debug!(name = ?entry.name, ?reason, "skipped");
                        outcome.stats.skipped += 1;
                    }
                }
            }
        }

        info!(
            links = outcome.links.len(),
            directories = outcome.stats.directories_listed,
            abandoned = outcome.stats.directories_abandoned,
            oversized = outcome.stats.oversized,
            "crawl completed"
        );
        outcome
    }

    /// Fetch every page of a directory listing.
    async fn list_all(&self, dir_url: &str) -> nodeharvest_shared::Result<Listing> {
        let per_page = self.limits.per_page;
        let mut entries = Vec::new();
        let mut page = 1;

        loop {
            let batch = self.client.list_directory(dir_url, page, per_page).await?;
            let short = batch.len() < per_page;
            entries.extend(batch);

            if entries.len() > self.limits.max_dir_entries {
                return Ok(Listing::TooLarge(entries.len()));
            }
            if short {
                return Ok(Listing::Entries(entries));
            }
            if !self.limits.page_delay.is_zero() {
                tokio::time::sleep(self.limits.page_delay).await;
            }
            page += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Entry filter chain
// ---------------------------------------------------------------------------

/// Run one listing entry through the filter chain.
pub fn classify_entry(entry: &ContentEntry, limits: &CrawlLimits) -> EntryDecision {
    let (Some(name), Some(kind), Some(size)) = (entry.name.as_deref(), entry.kind, entry.size)
    else {
        return EntryDecision::Skip(SkipReason::MissingFields);
    };
    let fetch = match kind {
        EntryKind::Dir => entry.url.as_deref(),
        EntryKind::File => entry.download_url.as_deref(),
        EntryKind::Other => return EntryDecision::Skip(SkipReason::Unsupported),
    };
    let Some(fetch) = fetch.filter(|f| !f.is_empty()) else {
        return EntryDecision::Skip(SkipReason::MissingFields);
    };
    if name.is_empty() {
        return EntryDecision::Skip(SkipReason::MissingFields);
    }

    if name.starts_with(RESERVED_PREFIXES) {
        return EntryDecision::Skip(SkipReason::Reserved);
    }
    if size > limits.max_file_size {
        return EntryDecision::Skip(SkipReason::Oversized);
    }

    match kind {
        EntryKind::Dir => {
            if DATE_STAMP.is_match(name) {
                return EntryDecision::Skip(SkipReason::DateStamp);
            }
        }
        _ => {
            if !has_allowed_extension(name, limits.include_json) {
                return EntryDecision::Skip(SkipReason::Extension);
            }
            if !KEYWORDS.is_match(name) {
                return EntryDecision::Skip(SkipReason::Keyword);
            }
        }
    }

    let http = Url::parse(fetch).is_ok_and(|u| matches!(u.scheme(), "http" | "https"));
    if !http {
        return EntryDecision::Skip(SkipReason::Scheme);
    }

    match kind {
        EntryKind::Dir => EntryDecision::Recurse(fetch.to_string()),
        _ => EntryDecision::Emit(CandidateLink {
            name: name.to_string(),
            fetch_url: fetch.to_string(),
            display_url: entry.html_url.clone(),
        }),
    }
}

fn has_allowed_extension(name: &str, include_json: bool) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    BASE_EXTENSIONS.contains(&ext.as_str()) || (include_json && ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::quota::QuotaGuard;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn limits(max_depth: u32) -> CrawlLimits {
        CrawlLimits {
            max_depth,
            max_file_size: 512 * 1024,
            max_dir_entries: 1000,
            per_page: 100,
            page_delay: Duration::ZERO,
            include_json: false,
        }
    }

    fn file(name: &str, size: u64) -> ContentEntry {
        ContentEntry {
            name: Some(name.into()),
            kind: Some(EntryKind::File),
            size: Some(size),
            url: Some(format!("https://api.example.com/{name}")),
            download_url: Some(format!("https://raw.example.com/{name}")),
            html_url: None,
        }
    }

    fn dir(name: &str) -> ContentEntry {
        ContentEntry {
            name: Some(name.into()),
            kind: Some(EntryKind::Dir),
            size: Some(0),
            url: Some(format!("https://api.example.com/{name}")),
            download_url: None,
            html_url: None,
        }
    }

    fn crawler(server: &MockServer, limits: CrawlLimits) -> ContentCrawler {
        let client = GitHubClient::new(
            "",
            &server.uri(),
            Duration::from_secs(5),
            Arc::new(QuotaGuard::new(1000, Duration::from_secs(3600))),
            RetryPolicy {
                attempts: 1,
                ..RetryPolicy::default()
            },
        )
        .unwrap();
        ContentCrawler::new(Arc::new(client), limits)
    }

    fn repo(server: &MockServer) -> RepositoryRef {
        RepositoryRef {
            key: "a/b".into(),
            html_url: "https://github.com/a/b".into(),
            contents_url: format!("{}/root", server.uri()),
            change_marker: "2024-01-01T00:00:00Z".into(),
            content_hash: "R_b".into(),
        }
    }

    fn listing(server: &MockServer, entries: &[(&str, &str)]) -> serde_json::Value {
        let items: Vec<serde_json::Value> = entries
            .iter()
            .map(|(name, kind)| {
                serde_json::json!({
                    "name": name,
                    "type": kind,
                    "size": 100,
                    "url": format!("{}/{name}", server.uri()),
                    "download_url": if *kind == "file" {
                        serde_json::Value::String(format!("{}/raw/{name}", server.uri()))
                    } else {
                        serde_json::Value::Null
                    },
                })
            })
            .collect();
        serde_json::Value::Array(items)
    }

    #[test]
    fn filter_chain() {
        let l = limits(3);
        assert!(matches!(classify_entry(&file("clash.yaml", 10), &l), EntryDecision::Emit(_)));
        assert!(matches!(classify_entry(&file("V2RAY.TXT", 10), &l), EntryDecision::Emit(_)));
        assert_eq!(
            classify_entry(&file(".sub.yaml", 10), &l),
            EntryDecision::Skip(SkipReason::Reserved)
        );
        assert_eq!(
            classify_entry(&file("_nodes.txt", 10), &l),
            EntryDecision::Skip(SkipReason::Reserved)
        );
        assert_eq!(
            classify_entry(&file("clash.yaml", 600 * 1024), &l),
            EntryDecision::Skip(SkipReason::Oversized)
        );
        assert_eq!(
            classify_entry(&file("nodes.json", 10), &l),
            EntryDecision::Skip(SkipReason::Extension)
        );
        assert_eq!(
            classify_entry(&file("README.md", 10), &l),
            EntryDecision::Skip(SkipReason::Extension)
        );
        assert_eq!(
            classify_entry(&file("notes.txt", 10), &l),
            EntryDecision::Skip(SkipReason::Keyword)
        );
        assert_eq!(
            classify_entry(&dir("2024-01-31"), &l),
            EntryDecision::Skip(SkipReason::DateStamp)
        );
        assert_eq!(
            classify_entry(&dir("20240131"), &l),
            EntryDecision::Skip(SkipReason::DateStamp)
        );
        assert!(matches!(classify_entry(&dir("configs"), &l), EntryDecision::Recurse(_)));
    }

    #[test]
    fn json_is_opt_in() {
        let mut l = limits(3);
        l.include_json = true;
        assert!(matches!(classify_entry(&file("nodes.json", 10), &l), EntryDecision::Emit(_)));
    }

    #[test]
    fn incomplete_or_odd_entries_are_skipped() {
        let l = limits(3);
        let mut no_size = file("clash.yaml", 1);
        no_size.size = None;
        assert_eq!(classify_entry(&no_size, &l), EntryDecision::Skip(SkipReason::MissingFields));

        let mut no_download = file("clash.yaml", 1);
        no_download.download_url = None;
        assert_eq!(
            classify_entry(&no_download, &l),
            EntryDecision::Skip(SkipReason::MissingFields)
        );

        let mut ftp = file("clash.yaml", 1);
        ftp.download_url = Some("ftp://example.com/clash.yaml".into());
        assert_eq!(classify_entry(&ftp, &l), EntryDecision::Skip(SkipReason::Scheme));

        let mut link = file("clash.yaml", 1);
        link.kind = Some(EntryKind::Other);
        assert_eq!(classify_entry(&link, &l), EntryDecision::Skip(SkipReason::Unsupported));
    }

    #[tokio::test]
    async fn never_fetches_beyond_depth_ceiling() {
        let server = MockServer::start().await;
        for (dir_path, child) in [("/root", "d1"), ("/d1", "d2"), ("/d2", "d3")] {
            Mock::given(method("GET"))
                .and(path(dir_path))
                .respond_with(ResponseTemplate::new(200).set_body_json(listing(
                    &server,
                    &[(child, "dir"), ("sub.txt", "file")],
                )))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(path("/d3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(&server, &[])))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = crawler(&server, limits(2)).crawl(&repo(&server)).await;
        assert_eq!(outcome.stats.directories_listed, 3);
        assert_eq!(outcome.stats.depth_cutoffs, 1);
        assert_eq!(outcome.links.len(), 3);
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(path("/root"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(
                &server,
                &[("a-sub.txt", "file"), ("b-sub.txt", "file")],
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/root"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(
                &server,
                &[("c-sub.txt", "file")],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let mut l = limits(3);
        l.per_page = 2;
        let outcome = crawler(&server, l).crawl(&repo(&server)).await;
        let names: Vec<&str> = outcome.links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["a-sub.txt", "b-sub.txt", "c-sub.txt"]);
    }

    #[tokio::test]
    async fn oversized_directory_is_abandoned_whole() {
        let server = MockServer::start().await;
        Mock::given(path("/root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(
                &server,
                &[("a-sub.txt", "file"), ("b-sub.txt", "file"), ("c-sub.txt", "file")],
            )))
            .mount(&server)
            .await;

        let mut l = limits(3);
        l.max_dir_entries = 2;
        let outcome = crawler(&server, l).crawl(&repo(&server)).await;
        assert!(outcome.links.is_empty());
        assert_eq!(outcome.stats.directories_abandoned, 1);
    }

    #[tokio::test]
    async fn failed_directory_does_not_stop_siblings() {
        let server = MockServer::start().await;
        Mock::given(path("/root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(
                &server,
                &[("broken", "dir"), ("fine", "dir")],
            )))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(path("/fine"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(
                &server,
                &[("clash.yml", "file")],
            )))
            .mount(&server)
            .await;

        let outcome = crawler(&server, limits(3)).crawl(&repo(&server)).await;
        assert_eq!(outcome.stats.directories_abandoned, 1);
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(
            outcome.links[0].fetch_url,
            format!("{}/raw/clash.yml", server.uri())
        );
    }
}
