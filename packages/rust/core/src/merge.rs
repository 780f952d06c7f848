//! Union of freshly decoded nodes with the persisted history.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use nodeharvest_shared::{MergePolicy, NodeDescriptor};

use crate::dedup::{Fingerprint, fingerprint};

/// Merged node set plus where each record came from.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// History first, then fresh nodes not already known.
    pub nodes: Vec<NodeDescriptor>,
    /// Records contributed by history.
    pub from_history: usize,
    /// Records contributed by the fresh set.
    pub from_fresh: usize,
    /// Fresh records whose fingerprint was already in history.
    pub collisions: usize,
}

/// Counters only, for run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub from_history: usize,
    pub from_fresh: usize,
    pub collisions: usize,
}

impl MergeOutcome {
    pub fn stats(&self) -> MergeStats {
        MergeStats {
            from_history: self.from_history,
            from_fresh: self.from_fresh,
            collisions: self.collisions,
        }
    }
}

/// Fingerprint-union `fresh` into `history`.
///
/// Order is stable: history in its stored order, then fresh nodes in
/// decode order. On collision `policy` decides which record survives; the
/// survivor keeps the historical position.
pub fn merge(
    fresh: Vec<NodeDescriptor>,
    history: Vec<NodeDescriptor>,
    policy: MergePolicy,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut index: HashMap<Fingerprint, usize> = HashMap::new();

    for node in history {
        let fp = fingerprint(&node);
        if index.contains_key(&fp) {
            continue;
        }
        index.insert(fp, outcome.nodes.len());
        outcome.nodes.push(node);
        outcome.from_history += 1;
    }

    let history_len = outcome.nodes.len();
    for node in fresh {
        let fp = fingerprint(&node);
        match index.get(&fp) {
            Some(&pos) => {
                if pos < history_len {
                    outcome.collisions += 1;
                    if policy == MergePolicy::FreshWins {
                        debug!(node = %node.identity(), "fresh record replaces history");
                        outcome.nodes[pos] = node;
                    }
                }
            }
            None => {
                index.insert(fp, outcome.nodes.len());
                outcome.nodes.push(node);
                outcome.from_fresh += 1;
            }
        }
    }

    outcome
}
