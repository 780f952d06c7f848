//! Persisted node history, in the same `proxies:` shape as the structured output.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use nodeharvest_decoder::structured;
use nodeharvest_shared::{NodeDescriptor, Result};

use crate::write_atomic;

/// Reads and rewrites the accumulated node set.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load prior nodes. Missing, unreadable or unparseable history is empty.
    pub fn load(&self) -> Vec<NodeDescriptor> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no node history yet");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "node history unreadable, treating as empty");
                return Vec::new();
            }
        };

        match structured::parse_document(&text) {
            Some(nodes) => {
                info!(path = %self.path.display(), nodes = nodes.len(), "loaded node history");
                nodes
            }
            None => {
                warn!(path = %self.path.display(), "node history is not a proxies document, treating as empty");
                Vec::new()
            }
        }
    }

    /// Replace the history with `nodes`.
    pub fn save(&self, nodes: &[NodeDescriptor]) -> Result<()> {
        let document = structured::render_document(nodes)?;
        write_atomic(&self.path, document.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_dir;
    use nodeharvest_shared::Protocol;

    fn trojan(name: &str, server: &str) -> NodeDescriptor {
        NodeDescriptor::new(
            name,
            server,
            443,
            Protocol::Trojan {
                password: "pw".into(),
                sni: String::new(),
                security: "tls".into(),
                network: "tcp".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn missing_history_is_empty() {
        let tmp = temp_dir("history-missing");
        let store = HistoryStore::new(tmp.join("all_clash_config.yaml"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn garbage_history_is_empty() {
        let tmp = temp_dir("history-garbage");
        std::fs::create_dir_all(&tmp).unwrap();
        let path = tmp.join("all_clash_config.yaml");
        std::fs::write(&path, "::: not yaml [").unwrap();
        assert!(HistoryStore::new(&path).load().is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn save_then_load_preserves_order() {
        let tmp = temp_dir("history-roundtrip");
        let store = HistoryStore::new(tmp.join("all_clash_config.yaml"));
        let nodes = vec![trojan("b", "b.example.com"), trojan("a", "a.example.com")];
        store.save(&nodes).unwrap();
        assert_eq!(store.load(), nodes);

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
