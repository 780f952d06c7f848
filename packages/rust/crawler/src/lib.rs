//! Repository discovery and content crawling.
//!
//! This crate provides:
//! - [`quota`]: shared API call budget with blocking backpressure
//! - [`client`]: authenticated API client with timeout and retry policy
//! - [`search`]: keyword repository search
//! - [`engine`]: depth- and size-bounded repository tree crawler

pub mod client;
pub mod engine;
pub mod quota;
pub mod search;

pub use client::{GitHubClient, RetryPolicy};
pub use engine::{
    ContentCrawler, CrawlLimits, CrawlOutcome, CrawlStats, EntryDecision, SkipReason,
    classify_entry,
};
pub use quota::QuotaGuard;
pub use search::{SearchQuery, repository_key, search_repositories};
