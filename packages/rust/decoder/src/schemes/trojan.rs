use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, Protocol, Result};

use super::{AuthorityUri, SchemeDecoder};

/// `trojan://password@host:port?sni=..&security=..&type=..#name`
pub struct TrojanDecoder;

impl SchemeDecoder for TrojanDecoder {
    fn schemes(&self) -> &'static [&'static str] {
        &["trojan"]
    }

    fn decode(&self, uri: &str) -> Result<NodeDescriptor> {
        let parsed = AuthorityUri::parse(uri)?;
        if parsed.userinfo.is_empty() {
            return Err(NodeHarvestError::malformed("trojan URI has no password"));
        }

        NodeDescriptor::new(
            parsed.name.clone(),
            parsed.host.clone(),
            parsed.port,
            Protocol::Trojan {
                password: parsed.userinfo.clone(),
                sni: parsed.param_any(&["sni", "peer"]),
                security: parsed.param("security", "tls"),
                network: parsed.param("type", "tcp"),
            },
        )
    }

    fn name(&self) -> &str {
        "trojan"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_with_query() {
        let node = TrojanDecoder
            .decode("trojan://s3cret@t.example.com:8443?peer=sni.example.com&type=ws#US%20West")
            .unwrap();
        assert_eq!(node.server, "t.example.com");
        assert_eq!(node.port, 8443);
        assert_eq!(node.name, "US West");
        assert_eq!(
            node.protocol,
            Protocol::Trojan {
                password: "s3cret".into(),
                sni: "sni.example.com".into(),
                security: "tls".into(),
                network: "ws".into(),
            }
        );
    }

    #[test]
    fn requires_password() {
        assert!(TrojanDecoder.decode("trojan://t.example.com:443").is_err());
    }

    #[test]
    fn requires_port() {
        assert!(TrojanDecoder.decode("trojan://pw@t.example.com").is_err());
    }
}
