use nodeharvest_shared::{NodeDescriptor, Protocol, Result};

use super::{AuthorityUri, SchemeDecoder};

/// `hysteria2://[password@]host:port?sni=..&obfs=..&obfs-password=..&insecure=1#name`
pub struct Hysteria2Decoder;

impl SchemeDecoder for Hysteria2Decoder {
    fn schemes(&self) -> &'static [&'static str] {
        &["hysteria2", "hy2"]
    }

    fn decode(&self, uri: &str) -> Result<NodeDescriptor> {
        let parsed = AuthorityUri::parse(uri)?;
        NodeDescriptor::new(
            parsed.name.clone(),
            parsed.host.clone(),
            parsed.port,
            Protocol::Hysteria2 {
                password: parsed.userinfo.clone(),
                sni: parsed.param_any(&["sni", "peer"]),
                obfs: parsed.param("obfs", ""),
                obfs_password: parsed.param("obfs-password", ""),
                insecure: parsed.flag("insecure"),
            },
        )
    }

    fn name(&self) -> &str {
        "hysteria2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_short_scheme() {
        let node = Hysteria2Decoder
            .decode("hy2://letmein@hy.example.com:8443?sni=real.example.com&obfs=salamander&obfs-password=x&insecure=1#JP")
            .unwrap();
        assert_eq!(node.port, 8443);
        assert_eq!(node.name, "JP");
        assert_eq!(
            node.protocol,
            Protocol::Hysteria2 {
                password: "letmein".into(),
                sni: "real.example.com".into(),
                obfs: "salamander".into(),
                obfs_password: "x".into(),
                insecure: true,
            }
        );
    }

    #[test]
    fn password_is_optional() {
        let node = Hysteria2Decoder.decode("hysteria2://hy.example.com:443").unwrap();
        assert!(matches!(node.protocol, Protocol::Hysteria2 { ref password, insecure: false, .. } if password.is_empty()));
    }
}
