//! Share-URI decoders and the registry that dispatches lines to them.
//!
//! Each decoder owns one or more URI schemes. The registry picks a decoder by
//! scheme prefix; a line with no registered scheme is simply not a node.

mod hysteria2;
mod shadowsocks;
mod ssr;
mod transport;
mod trojan;
mod vless;
mod vmess;

use std::collections::HashMap;

use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, Result};
use percent_encoding::percent_decode_str;
use url::Url;

pub use hysteria2::Hysteria2Decoder;
pub use shadowsocks::ShadowsocksDecoder;
pub use ssr::ShadowsocksRDecoder;
pub use transport::TransportDecoder;
pub use trojan::TrojanDecoder;
pub use vless::VlessDecoder;
pub use vmess::VmessDecoder;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Decoder for one family of share URIs.
pub trait SchemeDecoder: Send + Sync {
    /// Lowercase schemes handled, without `://`.
    fn schemes(&self) -> &'static [&'static str];

    /// Decode a full URI line. Missing required fields are an error.
    fn decode(&self, uri: &str) -> Result<NodeDescriptor>;

    /// Human-readable decoder name for tracing.
    fn name(&self) -> &str;
}

/// What a single line turned out to be.
#[derive(Debug)]
pub enum LineResult {
    /// No registered scheme; not an error.
    NotANode,
    /// Decoded successfully.
    Node(NodeDescriptor),
    /// Registered scheme but undecodable.
    Failed(NodeHarvestError),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered decoders.
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn SchemeDecoder>>,
}

impl DecoderRegistry {
    /// Create a registry with all built-in decoders.
    pub fn new() -> Self {
        Self {
            decoders: vec![
                Box::new(ShadowsocksDecoder),
                Box::new(VmessDecoder),
                Box::new(TrojanDecoder),
                Box::new(VlessDecoder),
                Box::new(ShadowsocksRDecoder),
                Box::new(Hysteria2Decoder),
                Box::new(TransportDecoder::plain_tcp()),
                Box::new(TransportDecoder::websocket()),
                Box::new(TransportDecoder::grpc()),
                Box::new(TransportDecoder::http_upgrade()),
            ],
        }
    }

    /// Find the decoder registered for the line's scheme.
    pub fn detect(&self, line: &str) -> Option<&dyn SchemeDecoder> {
        let (scheme, _) = split_scheme(line)?;
        let scheme = scheme.to_ascii_lowercase();
        self.decoders
            .iter()
            .find(|d| d.schemes().contains(&scheme.as_str()))
            .map(|d| d.as_ref())
    }

    /// Decode one trimmed, non-empty line.
    pub fn decode_line(&self, line: &str) -> LineResult {
        match self.detect(line) {
            None => LineResult::NotANode,
            Some(decoder) => match decoder.decode(line) {
                Ok(node) => LineResult::Node(node),
                Err(e) => LineResult::Failed(e),
            },
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared parsing helpers
// ---------------------------------------------------------------------------

/// Split `scheme://rest`. The scheme must be a plausible URI scheme.
pub(crate) fn split_scheme(line: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = line.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}

/// Split off a `#fragment` and percent-decode it as the display name.
pub(crate) fn split_fragment(rest: &str) -> (&str, String) {
    match rest.split_once('#') {
        Some((body, fragment)) => (body, percent_decode(fragment)),
        None => (rest, String::new()),
    }
}

/// Percent-decode, replacing invalid UTF-8.
pub(crate) fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Parse `host:port` or `[v6]:port`. Both parts are required.
pub(crate) fn split_host_port(input: &str) -> Result<(String, u16)> {
    let input = input.trim();
    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        rest.split_once("]:")
            .ok_or_else(|| NodeHarvestError::malformed(format!("no port in '{input}'")))?
    } else {
        input
            .rsplit_once(':')
            .ok_or_else(|| NodeHarvestError::malformed(format!("no host:port in '{input}'")))?
    };
    if host.is_empty() {
        return Err(NodeHarvestError::malformed(format!("no host in '{input}'")));
    }
    Ok((host.to_string(), parse_port(port)?))
}

/// Parse a non-zero TCP port.
pub(crate) fn parse_port(input: &str) -> Result<u16> {
    match input.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(NodeHarvestError::malformed(format!("invalid port '{input}'"))),
    }
}

/// Host and port section of `scheme://[userinfo@]host:port[/path][?query][#name]`.
fn raw_authority(uri: &str) -> &str {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    authority.rsplit_once('@').map_or(authority, |(_, host_port)| host_port)
}

/// Authority-style URI (`scheme://[userinfo@]host:port[?query][#name]`) split
/// into decoded parts.
#[derive(Debug)]
pub(crate) struct AuthorityUri {
    pub userinfo: String,
    pub host: String,
    pub port: u16,
    pub query: HashMap<String, String>,
    pub name: String,
}

impl AuthorityUri {
    /// Parse with the `url` crate; host and port are mandatory.
    pub(crate) fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| NodeHarvestError::malformed(format!("invalid URI: {e}")))?;

        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| NodeHarvestError::malformed("URI has no host"))?;

        // `url` fills in and strips default ports for known schemes, so the
        // port is read from the authority as written.
        let (_, port) = split_host_port(raw_authority(uri))
            .map_err(|_| NodeHarvestError::malformed(format!("URI for {host} has no port")))?;

        let mut userinfo = percent_decode(url.username());
        if let Some(password) = url.password() {
            userinfo.push(':');
            userinfo.push_str(&percent_decode(password));
        }

        let mut query = HashMap::new();
        for (key, value) in url.query_pairs() {
            query.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }

        let name = url.fragment().map(percent_decode).unwrap_or_default();

        Ok(Self {
            userinfo,
            host,
            port,
            query,
            name,
        })
    }

    /// Query value, or `default` when absent or empty.
    pub(crate) fn param(&self, key: &str, default: &str) -> String {
        self.query
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// First non-empty value among `keys`.
    pub(crate) fn param_any(&self, keys: &[&str]) -> String {
        keys.iter()
            .find_map(|k| self.query.get(*k).filter(|v| !v.is_empty()))
            .cloned()
            .unwrap_or_default()
    }

    /// Boolean query flag (`1`, `true`).
    pub(crate) fn flag(&self, key: &str) -> bool {
        self.query
            .get(key)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true"))
    }

    /// Whether the URI asks for TLS via `security=tls|reality`.
    pub(crate) fn wants_tls(&self) -> bool {
        matches!(
            self.param("security", "none").to_ascii_lowercase().as_str(),
            "tls" | "reality"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeharvest_shared::NodeKind;

    #[test]
    fn registry_dispatches_by_scheme() {
        let registry = DecoderRegistry::new();
        assert_eq!(registry.detect("ss://abc").map(|d| d.name()), Some("shadowsocks"));
        assert_eq!(registry.detect("VMESS://abc").map(|d| d.name()), Some("vmess"));
        assert_eq!(registry.detect("hy2://pw@h:1").map(|d| d.name()), Some("hysteria2"));
        assert_eq!(registry.detect("wss://h:443").map(|d| d.name()), Some("websocket"));
        assert!(registry.detect("https://example.com").is_none());
        assert!(registry.detect("just some text").is_none());
    }

    #[test]
    fn unknown_scheme_is_not_a_node() {
        let registry = DecoderRegistry::new();
        assert!(matches!(
            registry.decode_line("wireguard://key@h:51820"),
            LineResult::NotANode
        ));
    }

    #[test]
    fn known_scheme_with_bad_payload_fails() {
        let registry = DecoderRegistry::new();
        assert!(matches!(
            registry.decode_line("trojan://@:443"),
            LineResult::Failed(_)
        ));
    }

    #[test]
    fn decode_line_yields_node() {
        let registry = DecoderRegistry::new();
        match registry.decode_line("trojan://secret@example.com:443#home") {
            LineResult::Node(node) => {
                assert_eq!(node.kind(), NodeKind::Trojan);
                assert_eq!(node.name, "home");
            }
            other => panic!("expected node, got {other:?}"),
        }
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("example.com:443").unwrap(), ("example.com".into(), 443));
        assert_eq!(split_host_port("[2001:db8::1]:8388").unwrap(), ("2001:db8::1".into(), 8388));
        assert!(split_host_port("").is_err());
        assert!(split_host_port(":443").is_err());
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port("example.com:0").is_err());
        assert!(split_host_port("example.com:99999").is_err());
    }

    #[test]
    fn authority_uri_parts() {
        let uri = AuthorityUri::parse("trojan://p%40ss@[::1]:443?sni=a.example&sni=b#My%20Node").unwrap();
        assert_eq!(uri.userinfo, "p@ss");
        assert_eq!(uri.host, "::1");
        assert_eq!(uri.port, 443);
        assert_eq!(uri.param("sni", ""), "a.example");
        assert_eq!(uri.param("type", "tcp"), "tcp");
        assert_eq!(uri.name, "My Node");
    }

    #[test]
    fn authority_port_is_never_defaulted() {
        assert!(AuthorityUri::parse("ws://edge.example.com").is_err());
        assert!(AuthorityUri::parse("wss://edge.example.com/x?path=%2Fx").is_err());
        assert_eq!(AuthorityUri::parse("wss://edge.example.com:443").unwrap().port, 443);
        assert_eq!(AuthorityUri::parse("ws://u@edge.example.com:80/").unwrap().port, 80);
        assert_eq!(raw_authority("trojan://p@ss@[::1]:443?x=1"), "[::1]:443");
    }
}
