use nodeharvest_shared::{NodeDescriptor, NodeKind, Protocol, Result};

use super::{AuthorityUri, SchemeDecoder, split_scheme};

/// Bare transport links (`tcp://`, `ws://`, `wss://`, `grpc://`, `httpupgrade://`).
///
/// These carry little beyond an endpoint and transport options, so one decoder
/// parameterized by kind handles all of them.
pub struct TransportDecoder {
    kind: NodeKind,
    schemes: &'static [&'static str],
}

impl TransportDecoder {
    pub fn plain_tcp() -> Self {
        Self {
            kind: NodeKind::PlainTcp,
            schemes: &["tcp"],
        }
    }

    pub fn websocket() -> Self {
        Self {
            kind: NodeKind::Websocket,
            schemes: &["ws", "wss"],
        }
    }

    pub fn grpc() -> Self {
        Self {
            kind: NodeKind::Grpc,
            schemes: &["grpc"],
        }
    }

    pub fn http_upgrade() -> Self {
        Self {
            kind: NodeKind::HttpUpgrade,
            schemes: &["httpupgrade"],
        }
    }
}

impl SchemeDecoder for TransportDecoder {
    fn schemes(&self) -> &'static [&'static str] {
        self.schemes
    }

    fn decode(&self, uri: &str) -> Result<NodeDescriptor> {
        let parsed = AuthorityUri::parse(uri)?;
        let secure_scheme = split_scheme(uri).is_some_and(|(s, _)| s.eq_ignore_ascii_case("wss"));
        let tls = secure_scheme || parsed.wants_tls();

        let protocol = match self.kind {
            NodeKind::Websocket => Protocol::Websocket {
                path: parsed.param("path", "/"),
                host: parsed.param("host", ""),
                tls,
            },
            NodeKind::Grpc => Protocol::Grpc {
                uuid: parsed.userinfo.clone(),
                service_name: parsed.param_any(&["serviceName", "service_name"]),
                tls,
            },
            NodeKind::HttpUpgrade => Protocol::HttpUpgrade {
                path: parsed.param("path", "/"),
                host: parsed.param("host", ""),
                tls,
            },
            _ => Protocol::PlainTcp { tls },
        };

        NodeDescriptor::new(parsed.name.clone(), parsed.host.clone(), parsed.port, protocol)
    }

    fn name(&self) -> &str {
        match self.kind {
            NodeKind::Websocket => "websocket",
            NodeKind::Grpc => "grpc",
            NodeKind::HttpUpgrade => "httpupgrade",
            _ => "tcp",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wss_implies_tls() {
        let node = TransportDecoder::websocket()
            .decode("wss://edge.example.com:443?path=%2Fws&host=cdn.example.com#edge")
            .unwrap();
        assert_eq!(node.kind(), NodeKind::Websocket);
        assert_eq!(
            node.protocol,
            Protocol::Websocket {
                path: "/ws".into(),
                host: "cdn.example.com".into(),
                tls: true,
            }
        );
    }

    #[test]
    fn ws_defaults() {
        let node = TransportDecoder::websocket().decode("ws://1.2.3.4:8080").unwrap();
        assert!(matches!(node.protocol, Protocol::Websocket { ref path, tls: false, .. } if path == "/"));
    }

    #[test]
    fn websocket_without_port_is_rejected() {
        let ws = TransportDecoder::websocket();
        assert!(ws.decode("ws://h.example.com").is_err());
        assert!(ws.decode("wss://h.example.com").is_err());
        assert!(ws.decode("wss://edge.example.com?path=%2Fx").is_err());

        let node = ws.decode("wss://h.example.com:443").unwrap();
        assert_eq!(node.port, 443);
        let node = ws.decode("ws://h.example.com:80/").unwrap();
        assert_eq!(node.port, 80);
    }

    #[test]
    fn grpc_service_name() {
        let node = TransportDecoder::grpc()
            .decode("grpc://uuid-1@g.example.com:443?serviceName=tunnel&security=tls")
            .unwrap();
        assert_eq!(
            node.protocol,
            Protocol::Grpc {
                uuid: "uuid-1".into(),
                service_name: "tunnel".into(),
                tls: true,
            }
        );
    }

    #[test]
    fn plain_tcp_requires_port() {
        assert!(TransportDecoder::plain_tcp().decode("tcp://1.2.3.4").is_err());
        let node = TransportDecoder::plain_tcp().decode("tcp://1.2.3.4:9000").unwrap();
        assert_eq!(node.protocol, Protocol::PlainTcp { tls: false });
    }
}
