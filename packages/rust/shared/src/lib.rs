//! Shared types, error model, and configuration for nodeharvest.
//!
//! This crate is the foundation depended on by all other nodeharvest crates.
//! It provides:
//! - [`NodeHarvestError`]: the unified error type
//! - Domain types ([`RepositoryRef`], [`ContentEntry`], [`NodeDescriptor`], [`ParseReport`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlSettings, DeployConfig, GithubConfig, MergePolicy, OutputConfig, QuotaConfig,
    RunConfig, ValidationConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_token,
};
pub use error::{NodeHarvestError, Result};
pub use types::{
    CandidateLink, ContentEntry, EntryKind, NodeDescriptor, NodeKind, ParseFailure, ParseOutcome,
    ParseReport, Protocol, RepositoryRef, SourceFormat,
};
