//! Run orchestration and node-set logic for nodeharvest.
//!
//! This crate ties together search, crawling, decoding, deduplication and
//! persistence into one harvest run ([`pipeline::run`]).

pub mod dedup;
pub mod deploy;
pub mod merge;
pub mod pipeline;
pub mod probe;

pub use dedup::{Deduplicator, Fingerprint, dedup, fingerprint};
pub use merge::{MergeOutcome, MergeStats, merge};
pub use pipeline::{ProgressReporter, RunSummary, SilentProgress, VALIDATED_DIR, run};
pub use probe::{ProbeSettings, probe_reachable};
