//! Output bundle: subscription list and structured config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use nodeharvest_decoder::{render_document, to_uri};
use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, Result};

use crate::{STRUCTURED_FILE, SUBSCRIPTION_FILE, write_atomic};

const CHUNK_PREFIX: &str = "subscription_";

/// What a bundle write produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BundleSummary {
    pub files: Vec<PathBuf>,
    pub node_count: usize,
    /// Nodes written to the subscription list (`unknown` nodes have no URI).
    pub uri_count: usize,
    pub kind_counts: BTreeMap<String, usize>,
}

/// Writes the subscription list, its chunks and the structured config.
#[derive(Debug, Clone)]
pub struct BundleWriter {
    chunk_size: usize,
}

impl BundleWriter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Write the bundle for `nodes` into `dir`, in insertion order.
    ///
    /// When the list exceeds the chunk size, numbered chunk files are written
    /// alongside the full list. Chunks left over from earlier runs are removed.
    #[instrument(skip_all, fields(dir = %dir.display(), nodes = nodes.len()))]
    pub fn write(&self, dir: &Path, nodes: &[NodeDescriptor]) -> Result<BundleSummary> {
        std::fs::create_dir_all(dir).map_err(|e| NodeHarvestError::io(dir, e))?;
        remove_stale_chunks(dir)?;

        let uris: Vec<String> = nodes.iter().filter_map(to_uri).collect();
        let mut summary = BundleSummary {
            node_count: nodes.len(),
            uri_count: uris.len(),
            ..BundleSummary::default()
        };
        for node in nodes {
            *summary
                .kind_counts
                .entry(node.kind().as_str().to_string())
                .or_default() += 1;
        }

        let full = dir.join(SUBSCRIPTION_FILE);
        write_atomic(&full, join_lines(&uris).as_bytes())?;
        summary.files.push(full);

        if uris.len() > self.chunk_size {
            for (i, chunk) in uris.chunks(self.chunk_size).enumerate() {
                let path = dir.join(format!("{CHUNK_PREFIX}{}.txt", i + 1));
                write_atomic(&path, join_lines(chunk).as_bytes())?;
                debug!(file = %path.display(), uris = chunk.len(), "wrote chunk");
                summary.files.push(path);
            }
        }

        let structured = dir.join(STRUCTURED_FILE);
        write_atomic(&structured, render_document(nodes)?.as_bytes())?;
        summary.files.push(structured);

        info!(
            files = summary.files.len(),
            uris = summary.uri_count,
            "bundle written"
        );
        Ok(summary)
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn remove_stale_chunks(dir: &Path) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| NodeHarvestError::io(dir, e))?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let is_chunk = name
            .strip_prefix(CHUNK_PREFIX)
            .and_then(|rest| rest.strip_suffix(".txt"))
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
        if is_chunk {
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| NodeHarvestError::io(&path, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_dir;
    use nodeharvest_decoder::parse_document;
    use nodeharvest_shared::Protocol;

    fn tcp(i: u16) -> NodeDescriptor {
        NodeDescriptor::new(format!("n{i}"), "10.0.0.1", 1000 + i, Protocol::PlainTcp { tls: false })
            .unwrap()
    }

    #[test]
    fn small_set_has_no_chunks() {
        let tmp = temp_dir("bundle-small");
        let nodes: Vec<_> = (1..=3).map(tcp).collect();
        let summary = BundleWriter::new(10).write(&tmp, &nodes).unwrap();

        assert_eq!(summary.files.len(), 2);
        let list = std::fs::read_to_string(tmp.join(SUBSCRIPTION_FILE)).unwrap();
        assert_eq!(list.lines().count(), 3);
        assert!(list.starts_with("tcp://10.0.0.1:1001#n1\n"));
        assert_eq!(summary.kind_counts.get("tcp"), Some(&3));

        let doc = std::fs::read_to_string(tmp.join(STRUCTURED_FILE)).unwrap();
        assert_eq!(parse_document(&doc).unwrap(), nodes);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn large_set_is_chunked_and_stale_chunks_removed() {
        let tmp = temp_dir("bundle-chunks");
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(tmp.join("subscription_9.txt"), "stale").unwrap();

        let nodes: Vec<_> = (1..=5).map(tcp).collect();
        let summary = BundleWriter::new(2).write(&tmp, &nodes).unwrap();

        // full list + 3 chunks + structured config
        assert_eq!(summary.files.len(), 5);
        assert!(!tmp.join("subscription_9.txt").exists());
        let last = std::fs::read_to_string(tmp.join("subscription_3.txt")).unwrap();
        assert_eq!(last, "tcp://10.0.0.1:1005#n5\n");
        let full = std::fs::read_to_string(tmp.join(SUBSCRIPTION_FILE)).unwrap();
        assert_eq!(full.lines().count(), 5);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unknown_nodes_stay_out_of_the_list() {
        let tmp = temp_dir("bundle-unknown");
        let nodes = vec![
            tcp(1),
            NodeDescriptor::new(
                "wg",
                "10.0.0.2",
                51820,
                Protocol::Unknown {
                    type_name: "wireguard".into(),
                    fields: Default::default(),
                },
            )
            .unwrap(),
        ];
        let summary = BundleWriter::new(10).write(&tmp, &nodes).unwrap();
        assert_eq!(summary.node_count, 2);
        assert_eq!(summary.uri_count, 1);
        assert_eq!(summary.kind_counts.get("unknown"), Some(&1));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
