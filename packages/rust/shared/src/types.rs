//! Core domain types for nodeharvest runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NodeHarvestError, Result};

// ---------------------------------------------------------------------------
// RepositoryRef
// ---------------------------------------------------------------------------

/// A repository returned by the search API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Canonical key: the path component of the repository URL (`owner/name`).
    pub key: String,
    /// Browser URL of the repository.
    pub html_url: String,
    /// Contents API URL of the repository root.
    pub contents_url: String,
    /// Last-change marker (RFC 3339 timestamp).
    pub change_marker: String,
    /// Opaque content hash reported by the API.
    pub content_hash: String,
}

// ---------------------------------------------------------------------------
// ContentEntry / CandidateLink
// ---------------------------------------------------------------------------

/// Type of a file-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, submodules and anything else the API may report.
    #[serde(other)]
    Other,
}

/// One entry of a contents API directory listing.
///
/// Every field is optional so that a listing with incomplete items still
/// deserializes; the crawler rejects incomplete entries one by one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentEntry {
    /// Path segment name.
    #[serde(default)]
    pub name: Option<String>,
    /// `file` or `dir`.
    #[serde(rename = "type", default)]
    pub kind: Option<EntryKind>,
    /// Size in bytes (0 for directories).
    #[serde(default)]
    pub size: Option<u64>,
    /// API URL; the fetch reference for directories.
    #[serde(default)]
    pub url: Option<String>,
    /// Raw download URL; the fetch reference for files.
    #[serde(default)]
    pub download_url: Option<String>,
    /// Display reference.
    #[serde(default)]
    pub html_url: Option<String>,
}

/// A file that passed the crawler's filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateLink {
    /// File name.
    pub name: String,
    /// Raw content URL.
    pub fetch_url: String,
    /// Browser URL, if the API provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_url: Option<String>,
}

// ---------------------------------------------------------------------------
// NodeDescriptor
// ---------------------------------------------------------------------------

/// Protocol kind of a node descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Shadowsocks,
    Vmess,
    Trojan,
    Vless,
    ShadowsocksR,
    Hysteria2,
    PlainTcp,
    Websocket,
    Grpc,
    HttpUpgrade,
    Unknown,
}

impl NodeKind {
    /// The `type` value used in structured documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shadowsocks => "ss",
            Self::Vmess => "vmess",
            Self::Trojan => "trojan",
            Self::Vless => "vless",
            Self::ShadowsocksR => "ssr",
            Self::Hysteria2 => "hysteria2",
            Self::PlainTcp => "tcp",
            Self::Websocket => "ws",
            Self::Grpc => "grpc",
            Self::HttpUpgrade => "httpupgrade",
            Self::Unknown => "unknown",
        }
    }

    /// Resolve a structured-document `type` value, accepting common aliases.
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ss" | "shadowsocks" => Self::Shadowsocks,
            "vmess" => Self::Vmess,
            "trojan" => Self::Trojan,
            "vless" => Self::Vless,
            "ssr" | "shadowsocksr" => Self::ShadowsocksR,
            "hysteria2" | "hy2" => Self::Hysteria2,
            "tcp" => Self::PlainTcp,
            "ws" | "websocket" => Self::Websocket,
            "grpc" => Self::Grpc,
            "httpupgrade" | "http-upgrade" => Self::HttpUpgrade,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific fields. Empty strings mean "not set".
#[derive(Debug, Clone, PartialEq)]
pub enum Protocol {
    Shadowsocks {
        cipher: String,
        password: String,
    },
    Vmess {
        uuid: String,
        alter_id: u32,
        cipher: String,
        network: String,
        tls: bool,
        sni: String,
        path: String,
        host: String,
    },
    Trojan {
        password: String,
        sni: String,
        security: String,
        network: String,
    },
    Vless {
        uuid: String,
        sni: String,
        security: String,
        flow: String,
        network: String,
    },
    ShadowsocksR {
        cipher: String,
        password: String,
        protocol: String,
        protocol_param: String,
        obfs: String,
        obfs_param: String,
    },
    Hysteria2 {
        password: String,
        sni: String,
        obfs: String,
        obfs_password: String,
        insecure: bool,
    },
    PlainTcp {
        tls: bool,
    },
    Websocket {
        path: String,
        host: String,
        tls: bool,
    },
    Grpc {
        uuid: String,
        service_name: String,
        tls: bool,
    },
    HttpUpgrade {
        path: String,
        host: String,
        tls: bool,
    },
    /// A `type` with no canonical field table; all raw fields are kept.
    Unknown {
        type_name: String,
        fields: BTreeMap<String, serde_json::Value>,
    },
}

impl Protocol {
    /// The protocol kind of these fields.
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Shadowsocks { .. } => NodeKind::Shadowsocks,
            Self::Vmess { .. } => NodeKind::Vmess,
            Self::Trojan { .. } => NodeKind::Trojan,
            Self::Vless { .. } => NodeKind::Vless,
            Self::ShadowsocksR { .. } => NodeKind::ShadowsocksR,
            Self::Hysteria2 { .. } => NodeKind::Hysteria2,
            Self::PlainTcp { .. } => NodeKind::PlainTcp,
            Self::Websocket { .. } => NodeKind::Websocket,
            Self::Grpc { .. } => NodeKind::Grpc,
            Self::HttpUpgrade { .. } => NodeKind::HttpUpgrade,
            Self::Unknown { .. } => NodeKind::Unknown,
        }
    }
}

/// A normalized proxy endpoint.
///
/// Constructed only through [`NodeDescriptor::new`], which rejects an empty
/// host or a zero port.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    /// Display name.
    pub name: String,
    /// Server host (domain, IPv4, or bare IPv6).
    pub server: String,
    /// Server port.
    pub port: u16,
    /// Kind-specific fields.
    pub protocol: Protocol,
}

impl NodeDescriptor {
    /// Build a descriptor, rejecting a missing host or port.
    pub fn new(
        name: impl Into<String>,
        server: impl Into<String>,
        port: u16,
        protocol: Protocol,
    ) -> Result<Self> {
        let server = server.into().trim().to_string();
        if server.is_empty() {
            return Err(NodeHarvestError::malformed("descriptor has no server host"));
        }
        if port == 0 {
            return Err(NodeHarvestError::malformed(format!(
                "descriptor for {server} has no port"
            )));
        }
        let mut name = name.into().trim().to_string();
        if name.is_empty() {
            name = format!("{server}:{port}");
        }
        Ok(Self {
            name,
            server,
            port,
            protocol,
        })
    }

    /// Protocol kind.
    pub fn kind(&self) -> NodeKind {
        self.protocol.kind()
    }

    /// Short human-readable identity (`type://server:port`) for logs.
    pub fn identity(&self) -> String {
        format!("{}://{}:{}", self.kind(), self.server, self.port)
    }
}

// ---------------------------------------------------------------------------
// ParseOutcome / ParseReport
// ---------------------------------------------------------------------------

/// Which cascade stage recognized a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceFormat {
    /// A mapping document with a `proxies` sequence.
    Structured,
    /// Line-delimited share URIs.
    UriList,
    /// Base64-wrapped content (possibly nested).
    Base64,
}

/// Result of processing one candidate link.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// The link the content came from.
    pub source: String,
    /// Recognizing stage, when successful.
    pub format: Option<SourceFormat>,
    /// Decoded descriptors (before deduplication).
    pub nodes: Vec<NodeDescriptor>,
    /// Why the link produced nothing.
    pub failure: Option<String>,
    /// Lines that looked like share URIs but failed to decode.
    pub line_failures: usize,
}

impl ParseOutcome {
    /// Whether any descriptor was produced.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// An outcome for a link whose content could not be obtained or decoded.
    pub fn failed(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            format: None,
            nodes: Vec::new(),
            failure: Some(reason.into()),
            line_failures: 0,
        }
    }
}

/// A failed link and its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub source: String,
    pub reason: String,
}

/// Run-level aggregation of [`ParseOutcome`]s. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseReport {
    /// Links processed.
    pub total_links: usize,
    /// Links yielding at least one descriptor.
    pub success_count: usize,
    /// Links yielding nothing.
    pub failure_count: usize,
    /// Descriptors seen before deduplication.
    pub total_nodes_seen: usize,
    /// Unique descriptors after deduplication.
    pub total_unique_nodes: usize,
    /// Descriptors dropped as duplicates.
    pub duplicate_nodes: usize,
    /// Lines that failed to decode, summed over all links.
    pub line_failures: usize,
    /// Failed links with reasons.
    pub failures: Vec<ParseFailure>,
}

impl ParseReport {
    /// Fold one outcome into the report (deduplication counts are recorded separately).
    pub fn record(&mut self, outcome: &ParseOutcome) {
        self.total_links += 1;
        self.line_failures += outcome.line_failures;
        match &outcome.failure {
            None => self.success_count += 1,
            Some(reason) => {
                self.failure_count += 1;
                self.failures.push(ParseFailure {
                    source: outcome.source.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }
}
