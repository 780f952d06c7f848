//! Content fingerprints and within-run deduplication.
//!
//! A fingerprint covers the fields that identify an endpoint and its
//! credentials: kind, host, port and the kind's secret or transport fields.
//! Display names and other metadata never take part, so the same node
//! published under different names collapses to one entry.

use std::collections::HashSet;
use std::fmt;

use sha2::{Digest, Sha256};

use nodeharvest_shared::{NodeDescriptor, Protocol};

/// SHA-256 hex digest over a descriptor's canonical fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a descriptor. Pure and deterministic.
pub fn fingerprint(node: &NodeDescriptor) -> Fingerprint {
    let fields = canonical_fields(node);
    // A JSON array of pairs is unambiguous regardless of field contents.
    let serialized = serde_json::to_string(&fields).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// Ordered `(key, value)` pairs identifying a descriptor.
fn canonical_fields(node: &NodeDescriptor) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("type", node.kind().as_str().to_string()),
        ("server", node.server.to_ascii_lowercase()),
        ("port", node.port.to_string()),
    ];

    let mut push = |key: &'static str, value: &str| fields.push((key, value.to_string()));
    match &node.protocol {
        Protocol::Shadowsocks { cipher, password } => {
            push("cipher", cipher);
            push("password", password);
        }
        Protocol::Vmess {
            uuid,
            alter_id,
            network,
            ..
        } => {
            push("uuid", uuid);
            push("alterId", &alter_id.to_string());
            push("network", network);
        }
        Protocol::Trojan { password, sni, .. } => {
            push("password", password);
            push("sni", sni);
        }
        Protocol::Vless { uuid, network, .. } => {
            push("uuid", uuid);
            push("network", network);
        }
        Protocol::ShadowsocksR {
            cipher,
            password,
            protocol,
            obfs,
            ..
        } => {
            push("cipher", cipher);
            push("password", password);
            push("protocol", protocol);
            push("obfs", obfs);
        }
        Protocol::Hysteria2 { password, sni, .. } => {
            push("password", password);
            push("sni", sni);
        }
        Protocol::PlainTcp { tls } => push("tls", &tls.to_string()),
        Protocol::Websocket { path, host, .. } | Protocol::HttpUpgrade { path, host, .. } => {
            push("path", path);
            push("host", host);
        }
        Protocol::Grpc {
            uuid, service_name, ..
        } => {
            push("uuid", uuid);
            push("serviceName", service_name);
        }
        Protocol::Unknown { type_name, fields: raw } => {
            // No canonical subset: hash everything, in sorted key order.
            push("typeName", type_name);
            push("name", &node.name);
            for (key, value) in raw {
                fields.push(("field", format!("{key}={value}")));
            }
        }
    }
    fields
}

/// Seen-set threaded through one run. First occurrence wins.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<Fingerprint>,
    total: usize,
    duplicates: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `node`; `true` when its fingerprint was not seen before.
    pub fn insert(&mut self, node: &NodeDescriptor) -> bool {
        self.total += 1;
        let fresh = self.seen.insert(fingerprint(node));
        if !fresh {
            self.duplicates += 1;
        }
        fresh
    }

    /// Descriptors offered so far.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Descriptors rejected as repeats.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Distinct fingerprints.
    pub fn unique(&self) -> usize {
        self.seen.len()
    }
}

/// Keep the first occurrence of every fingerprint, preserving order.
pub fn dedup(nodes: Vec<NodeDescriptor>) -> Vec<NodeDescriptor> {
    let mut seen = Deduplicator::new();
    nodes.into_iter().filter(|n| seen.insert(n)).collect()
}
