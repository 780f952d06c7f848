//! File-backed persistence for run state and outputs.
//!
//! Everything that outlives a run lives in the output directory:
//! - [`repo_state`]: repository change markers (`repo_status.json`)
//! - [`history`]: accumulated node set (`all_clash_config.yaml`)
//! - [`bundle`]: subscription list and structured config for consumers
//!
//! All files are replaced atomically so a crash never leaves a truncated file.

pub mod bundle;
pub mod history;
pub mod repo_state;

use std::path::Path;

use nodeharvest_shared::{NodeHarvestError, Result};

pub use bundle::{BundleSummary, BundleWriter};
pub use history::HistoryStore;
pub use repo_state::{ChangeTracker, RepoState, parse_marker};

/// Newline-delimited share URIs, all nodes.
pub const SUBSCRIPTION_FILE: &str = "subscription.txt";
/// Structured `proxies:` document.
pub const STRUCTURED_FILE: &str = "clash_config.yaml";
/// Persisted node history.
pub const HISTORY_FILE: &str = "all_clash_config.yaml";
/// Persisted repository state.
pub const STATE_FILE: &str = "repo_status.json";

/// Write `contents` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| NodeHarvestError::io(dir, e))?;

    let filename = path
        .file_name()
        .ok_or_else(|| NodeHarvestError::validation(format!("{} has no file name", path.display())))?
        .to_string_lossy();
    let temp = dir.join(format!(".{filename}.tmp"));

    std::fs::write(&temp, contents).map_err(|e| NodeHarvestError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| NodeHarvestError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn temp_dir(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("nh-{label}-{}", uuid::Uuid::now_v7()))
}
