//! Application configuration for nodeharvest.
//!
//! User config lives at `~/.nodeharvest/nodeharvest.toml`.
//! Environment variables override the config file, CLI flags override both,
//! and every value has a default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NodeHarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "nodeharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".nodeharvest";

// ---------------------------------------------------------------------------
// Config structs (matching nodeharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Search API access.
    #[serde(default)]
    pub github: GithubConfig,

    /// Repository tree walk limits.
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// API call budget.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Output files.
    #[serde(default)]
    pub output: OutputConfig,

    /// Optional reachability validation stage.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Optional deployment stage.
    #[serde(default)]
    pub deploy: DeployConfig,
}

/// `[github]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Name of the env var holding the API token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// API base URL (overridable for mirrors and tests).
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Search keywords; one repository search per keyword.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Maximum repositories collected per keyword.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Items per page for search and contents listings.
    #[serde(default = "default_per_page")]
    pub per_page: usize,

    /// Courtesy delay between consecutive page fetches.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_base: default_api_base(),
            keywords: default_keywords(),
            max_results: default_max_results(),
            per_page: default_per_page(),
            page_delay_ms: default_page_delay(),
        }
    }
}

fn default_token_env() -> String {
    "CRAWLER_GITHUB_TOKEN".into()
}
fn default_api_base() -> String {
    "https://api.github.com".into()
}
fn default_keywords() -> Vec<String> {
    vec!["v2ray free in:readme,description".into()]
}
fn default_max_results() -> usize {
    30
}
fn default_per_page() -> usize {
    100
}
fn default_page_delay() -> u64 {
    1200
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Directories deeper than this (root = 0) are never listed.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Entries larger than this are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directories with more entries than this are abandoned.
    #[serde(default = "default_max_dir_entries")]
    pub max_dir_entries: usize,

    /// Also accept `.json` files as candidates.
    #[serde(default)]
    pub include_json: bool,

    /// Repositories crawled in parallel (also bounds content downloads).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per request before giving up on transient failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_file_size: default_max_file_size(),
            max_dir_entries: default_max_dir_entries(),
            include_json: false,
            concurrency: default_concurrency(),
            timeout_secs: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_max_delay_secs: default_retry_max_delay(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}
fn default_max_file_size() -> u64 {
    512 * 1024
}
fn default_max_dir_entries() -> usize {
    1000
}
fn default_concurrency() -> usize {
    4
}
fn default_timeout() -> u64 {
    20
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_max_delay() -> u64 {
    20
}

/// `[quota]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Call count at which callers block until the window resets.
    #[serde(default = "default_quota_limit")]
    pub limit: u32,

    /// Rolling window length.
    #[serde(default = "default_quota_window")]
    pub window_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: default_quota_limit(),
            window_secs: default_quota_window(),
        }
    }
}

fn default_quota_limit() -> u32 {
    4800
}
fn default_quota_window() -> u64 {
    3590
}

/// Which record survives when a fresh node collides with a historical one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Keep the historical record (preserves curated metadata).
    #[default]
    HistoryWins,
    /// Replace the historical record with the freshly decoded one.
    FreshWins,
}

impl FromStr for MergePolicy {
    type Err = NodeHarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "history-wins" => Ok(Self::HistoryWins),
            "fresh-wins" => Ok(Self::FreshWins),
            other => Err(NodeHarvestError::config(format!(
                "unknown merge policy '{other}' (expected history-wins or fresh-wins)"
            ))),
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving bundles and persisted state.
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Subscription lists longer than this are also written as numbered chunks.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Collision policy for the history merge.
    #[serde(default)]
    pub merge_policy: MergePolicy,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            chunk_size: default_chunk_size(),
            merge_policy: MergePolicy::default(),
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_chunk_size() -> usize {
    1000
}

/// `[validation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Probe every merged node and write a second, validated bundle.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum simultaneous probe connections.
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,

    /// Per-node connect timeout.
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: default_probe_concurrency(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_probe_concurrency() -> usize {
    50
}
fn default_probe_timeout() -> u64 {
    15
}

/// `[deploy]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Run the deploy command after the bundle is written.
    #[serde(default)]
    pub enabled: bool,

    /// Program and arguments; the output directory is appended.
    #[serde(default)]
    pub command: Vec<String>,
}

// ---------------------------------------------------------------------------
// Environment overlay
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Override values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Override values using `lookup` as the environment source.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("NODEHARVEST_KEYWORDS") {
            let keywords: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
            if !keywords.is_empty() {
                self.github.keywords = keywords;
            }
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_MAX_RESULTS")? {
            self.github.max_results = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_PER_PAGE")? {
            self.github.per_page = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_PAGE_DELAY_MS")? {
            self.github.page_delay_ms = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_MAX_DEPTH")? {
            self.crawl.max_depth = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_MAX_FILE_SIZE")? {
            self.crawl.max_file_size = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_MAX_DIR_ENTRIES")? {
            self.crawl.max_dir_entries = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_QUOTA_LIMIT")? {
            self.quota.limit = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_QUOTA_WINDOW_SECS")? {
            self.quota.window_secs = v;
        }
        if let Some(dir) = lookup("NODEHARVEST_OUTPUT_DIR") {
            self.output.dir = dir;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_VALIDATE")? {
            self.validation.enabled = v;
        }
        if let Some(v) = env_value(&lookup, "NODEHARVEST_DEPLOY")? {
            self.deploy.enabled = v;
        }
        Ok(())
    }
}

fn env_value<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| NodeHarvestError::config(format!("{name}={raw:?}: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + env + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for one harvest run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// API base URL.
    pub api_base: String,
    /// Search keywords.
    pub keywords: Vec<String>,
    /// Maximum repositories per keyword.
    pub max_results: usize,
    /// Items per page.
    pub per_page: usize,
    /// Delay between consecutive page fetches.
    pub page_delay: Duration,
    /// Recursion ceiling for directory walks.
    pub max_depth: u32,
    /// Byte ceiling for candidate files.
    pub max_file_size: u64,
    /// Entry-count ceiling per directory listing.
    pub max_dir_entries: usize,
    /// Accept `.json` candidates.
    pub include_json: bool,
    /// Parallel repository crawls / content downloads.
    pub concurrency: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per request.
    pub retry_attempts: u32,
    /// Maximum single backoff delay.
    pub retry_max_delay: Duration,
    /// Quota threshold.
    pub quota_limit: u32,
    /// Quota window.
    pub quota_window: Duration,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Subscription chunk size.
    pub chunk_size: usize,
    /// History merge collision policy.
    pub merge_policy: MergePolicy,
    /// Whether to run the reachability prober.
    pub validate: bool,
    /// Prober parallelism.
    pub probe_concurrency: usize,
    /// Prober connect timeout.
    pub probe_timeout: Duration,
    /// Deploy command, when the deploy stage is enabled.
    pub deploy_command: Option<Vec<String>>,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            api_base: config.github.api_base.clone(),
            keywords: config.github.keywords.clone(),
            max_results: config.github.max_results,
            per_page: config.github.per_page.max(1),
            page_delay: Duration::from_millis(config.github.page_delay_ms),
            max_depth: config.crawl.max_depth,
            max_file_size: config.crawl.max_file_size,
            max_dir_entries: config.crawl.max_dir_entries,
            include_json: config.crawl.include_json,
            concurrency: config.crawl.concurrency.max(1),
            timeout: Duration::from_secs(config.crawl.timeout_secs),
            retry_attempts: config.crawl.retry_attempts.max(1),
            retry_max_delay: Duration::from_secs(config.crawl.retry_max_delay_secs),
            quota_limit: config.quota.limit,
            quota_window: Duration::from_secs(config.quota.window_secs),
            output_dir: PathBuf::from(&config.output.dir),
            chunk_size: config.output.chunk_size.max(1),
            merge_policy: config.output.merge_policy,
            validate: config.validation.enabled,
            probe_concurrency: config.validation.concurrency.max(1),
            probe_timeout: Duration::from_secs(config.validation.timeout_secs),
            deploy_command: (config.deploy.enabled && !config.deploy.command.is_empty())
                .then(|| config.deploy.command.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.nodeharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NodeHarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.nodeharvest/nodeharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NodeHarvestError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        NodeHarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NodeHarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NodeHarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NodeHarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API token from the configured env var. Missing or empty is fatal.
pub fn resolve_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.github.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(NodeHarvestError::config(format!(
            "API token not found. Set the {var_name} environment variable."
        ))),
    }
}
