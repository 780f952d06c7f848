//! Repository search.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use nodeharvest_shared::{NodeHarvestError, RepositoryRef};

use crate::client::GitHubClient;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    html_url: String,
    full_name: String,
    #[serde(default)]
    pushed_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    node_id: String,
}

/// Search settings for one run.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    /// Repositories collected per keyword at most.
    pub max_results: usize,
    pub per_page: usize,
    pub page_delay: Duration,
}

/// Search every keyword, most recently updated first.
///
/// Results are deduplicated by repository key across keywords. Failures are
/// logged and end that keyword only; whatever was collected is returned.
#[instrument(skip_all, fields(keywords = query.keywords.len()))]
pub async fn search_repositories(client: &GitHubClient, query: &SearchQuery) -> Vec<RepositoryRef> {
    let endpoint = format!("{}/search/repositories", client.api_base());
    let per_page = query.per_page.max(1);
    let mut seen = HashSet::new();
    let mut repos = Vec::new();

    for keyword in &query.keywords {
        let mut collected = 0usize;
        let mut page = 1usize;

        while collected < query.max_results {
            if page > 1 && !query.page_delay.is_zero() {
                tokio::time::sleep(query.page_delay).await;
            }
            let wanted = per_page.min(query.max_results - collected);
            let params = [
                ("q", keyword.clone()),
                ("sort", "updated".to_string()),
                ("order", "desc".to_string()),
                ("per_page", wanted.to_string()),
                ("page", page.to_string()),
            ];

            let result: SearchPage = match client.get_json(&endpoint, &params).await {
                Ok(result) => result,
                Err(NodeHarvestError::Http { status: 422, .. }) => {
                    debug!(%keyword, page, "search window exhausted");
                    break;
                }
                Err(e) => {
                    warn!(%keyword, page, error = %e, "search failed, keeping partial results");
                    break;
                }
            };

            let returned = result.items.len();
            for item in result.items {
                collected += 1;
                let repo = to_repository(client.api_base(), item);
                if seen.insert(repo.key.clone()) {
                    repos.push(repo);
                }
            }

            if returned < wanted {
                break;
            }
            page += 1;
        }

        info!(%keyword, collected, "search keyword done");
    }

    info!(repositories = repos.len(), "search complete");
    repos
}

fn to_repository(api_base: &str, item: SearchItem) -> RepositoryRef {
    RepositoryRef {
        key: repository_key(&item.html_url).unwrap_or_else(|| item.full_name.clone()),
        contents_url: format!("{api_base}/repos/{}/contents/", item.full_name),
        change_marker: item.pushed_at.or(item.updated_at).unwrap_or_default(),
        content_hash: item.node_id,
        html_url: item.html_url,
    }
}

/// Canonical repository key: the URL path without surrounding slashes.
pub fn repository_key(html_url: &str) -> Option<String> {
    let url = Url::parse(html_url).ok()?;
    let key = url.path().trim_matches('/');
    (!key.is_empty()).then(|| key.to_string())
}
