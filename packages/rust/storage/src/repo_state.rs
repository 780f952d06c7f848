//! Repository change tracking across runs.
//!
//! A repository is re-crawled only when its change marker moved forward since
//! the last recorded crawl. Markers are timestamps and are compared as
//! instants, never as strings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use nodeharvest_shared::{NodeHarvestError, Result};

use crate::write_atomic;

/// Persisted state for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    /// Change marker seen at the last crawl.
    pub last_change: String,
    /// Content hash reported alongside the marker.
    pub content_hash: String,
}

/// Persisted map of repository key to [`RepoState`].
#[derive(Debug)]
pub struct ChangeTracker {
    path: PathBuf,
    entries: BTreeMap<String, RepoState>,
}

impl ChangeTracker {
    /// Load the state file. A missing or unreadable file yields empty state.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "repository state unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no repository state yet");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "repository state unreadable, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    /// Whether `key` is new or its marker is strictly newer than the stored one.
    ///
    /// Unparseable markers fail open.
    pub fn should_process(&self, key: &str, marker: &str) -> bool {
        let Some(stored) = self.entries.get(key) else {
            return true;
        };
        match (parse_marker(marker), parse_marker(&stored.last_change)) {
            (Some(candidate), Some(previous)) => candidate > previous,
            _ => {
                warn!(
                    repo = key,
                    candidate = marker,
                    stored = %stored.last_change,
                    "unparseable change marker, processing anyway"
                );
                true
            }
        }
    }

    /// Overwrite the entry for `key` and persist the whole map atomically.
    pub fn record_processed(&mut self, key: &str, marker: &str, content_hash: &str) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            RepoState {
                last_change: marker.to_string(),
                content_hash: content_hash.to_string(),
            },
        );
        self.save()?;
        debug!(repo = key, marker, "recorded repository state");
        Ok(())
    }

    /// Stored state for `key`.
    pub fn get(&self, key: &str) -> Option<&RepoState> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| NodeHarvestError::parse(format!("failed to serialize repository state: {e}")))?;
        write_atomic(&self.path, json.as_bytes())
    }
}

/// Parse a change marker: RFC 3339, or a naive timestamp taken as UTC.
pub fn parse_marker(marker: &str) -> Option<DateTime<Utc>> {
    let marker = marker.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(marker) {
        return Some(dt.with_timezone(&Utc));
    }
    [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
    ]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(marker, fmt).ok())
        .map(|naive| naive.and_utc())
}
