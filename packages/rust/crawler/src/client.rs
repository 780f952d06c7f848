//! HTTP client for the search and contents APIs.
//!
//! Wraps `reqwest` with the per-request timeout, the shared [`QuotaGuard`] and
//! a bounded exponential-backoff retry for transient failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use nodeharvest_shared::{ContentEntry, NodeHarvestError, Result, RunConfig};

use crate::quota::QuotaGuard;

/// User-Agent string for API and download requests.
const USER_AGENT: &str = concat!("nodeharvest/", env!("CARGO_PKG_VERSION"));

const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl From<&RunConfig> for RetryPolicy {
    fn from(config: &RunConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            max_delay: config.retry_max_delay,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

/// Authenticated client shared by search, crawl and download workers.
pub struct GitHubClient {
    http: Client,
    api_base: String,
    quota: Arc<QuotaGuard>,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Build a client with a bearer token.
    pub fn new(
        token: &str,
        api_base: &str,
        timeout: Duration,
        quota: Arc<QuotaGuard>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if !token.is_empty() {
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| NodeHarvestError::config("API token contains invalid characters"))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| NodeHarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            quota,
            retry,
        })
    }

    /// Build a client from the run configuration.
    pub fn from_config(token: &str, config: &RunConfig, quota: Arc<QuotaGuard>) -> Result<Self> {
        Self::new(
            token,
            &config.api_base,
            config.timeout,
            quota,
            RetryPolicy::from(config),
        )
    }

    /// API base URL without a trailing slash.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// The shared quota guard.
    pub fn quota(&self) -> &Arc<QuotaGuard> {
        &self.quota
    }

    /// GET an API endpoint and deserialize the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.send(url, query, true).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| NodeHarvestError::parse(format!("{url}: invalid JSON body: {e}")))
    }

    /// One page of a contents API directory listing.
    pub async fn list_directory(
        &self,
        url: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<ContentEntry>> {
        self.get_json(
            url,
            &[("page", page.to_string()), ("per_page", per_page.to_string())],
        )
        .await
    }

    /// Download a candidate file as text, refusing bodies over `max_size` bytes.
    ///
    /// Raw downloads are not API calls and do not count against the quota.
    pub async fn fetch_text(&self, url: &str, max_size: u64) -> Result<String> {
        let response = self.send(url, &[], false).await?;
        if response.content_length().is_some_and(|len| len > max_size) {
            return Err(NodeHarvestError::validation(format!(
                "{url}: body exceeds {max_size} bytes"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| NodeHarvestError::Network(format!("{url}: body read failed: {e}")))?;
        if bytes.len() as u64 > max_size {
            return Err(NodeHarvestError::validation(format!(
                "{url}: body exceeds {max_size} bytes"
            )));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a GET with retries. Returns the first successful response.
    async fn send(&self, url: &str, query: &[(&str, String)], api_call: bool) -> Result<Response> {
        let mut retry = 0;
        loop {
            if api_call {
                self.quota.check_and_wait().await;
            }
            debug!(%url, attempt = retry + 1, "GET");

            let (error, reset_wait) = match self.http.get(url).query(query).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let reset_wait = (status == StatusCode::FORBIDDEN)
                        .then(|| rate_limit_wait(&response))
                        .flatten();
                    let error = NodeHarvestError::Http {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };
                    (error, reset_wait)
                }
                Err(e) => (NodeHarvestError::Network(format!("{url}: {e}")), None),
            };

            if !error.is_transient() || retry + 1 >= self.retry.attempts {
                return Err(error);
            }

            let delay = reset_wait
                .map(|wait| wait.min(self.retry.max_delay))
                .unwrap_or_else(|| self.retry.delay_for(retry));
            warn!(
                %url,
                error = %error,
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

/// Time until the `X-RateLimit-Reset` instant, if the header is present.
fn rate_limit_wait(response: &Response) -> Option<Duration> {
    let reset = response
        .headers()
        .get(RATE_LIMIT_RESET)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let wait = (reset - Utc::now().timestamp()).max(0);
    Some(Duration::from_secs(wait as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    fn client(server: &MockServer, attempts: u32) -> GitHubClient {
        GitHubClient::new(
            "test-token",
            &server.uri(),
            Duration::from_secs(5),
            Arc::new(QuotaGuard::new(1000, Duration::from_secs(3600))),
            fast_retry(attempts),
        )
        .unwrap()
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(20));
        assert_eq!(policy.delay_for(40), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn sends_token_and_counts_quota() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b/contents/"))
            .and(header("authorization", "Bearer test-token"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "sub.yaml", "type": "file", "size": 10,
                 "url": "https://api/x", "download_url": "https://raw/x"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let url = format!("{}/repos/a/b/contents/", server.uri());
        let entries = client.list_directory(&url, 1, 100).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name.as_deref(), Some("sub.yaml"));
        assert_eq!(client.quota().calls().await, 1);
    }

    #[tokio::test]
    async fn retries_rate_limited_then_succeeds() {
        let server = MockServer::start().await;
        let reset = Utc::now().timestamp().to_string();
        Mock::given(path("/limited"))
            .respond_with(ResponseTemplate::new(403).insert_header("X-RateLimit-Reset", reset.as_str()))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let body: serde_json::Value = client
            .get_json(&format!("{}/limited", server.uri()), &[])
            .await
            .unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(client.quota().calls().await, 2);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let server = MockServer::start().await;
        Mock::given(path("/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let err = client
            .get_json::<serde_json::Value>(&format!("{}/flaky", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeHarvestError::Http { status: 502, .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, 5);
        let err = client
            .get_json::<serde_json::Value>(&format!("{}/missing", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeHarvestError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn fetch_text_enforces_size_ceiling() {
        let server = MockServer::start().await;
        Mock::given(path("/small.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("trojan://pw@h:443"))
            .mount(&server)
            .await;
        Mock::given(path("/big.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&server)
            .await;

        let client = client(&server, 1);
        let text = client
            .fetch_text(&format!("{}/small.txt", server.uri()), 1024)
            .await
            .unwrap();
        assert_eq!(text, "trojan://pw@h:443");
        assert!(
            client
                .fetch_text(&format!("{}/big.txt", server.uri()), 1024)
                .await
                .is_err()
        );
        // Downloads are not API calls.
        assert_eq!(client.quota().calls().await, 0);
    }
}
