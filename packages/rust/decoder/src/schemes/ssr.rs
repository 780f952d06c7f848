use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, Protocol, Result};

use super::{SchemeDecoder, parse_port, split_scheme};
use crate::b64;

/// `ssr://base64(host:port:protocol:method:obfs:base64(password)/?params)`
pub struct ShadowsocksRDecoder;

impl SchemeDecoder for ShadowsocksRDecoder {
    fn schemes(&self) -> &'static [&'static str] {
        &["ssr"]
    }

    fn decode(&self, uri: &str) -> Result<NodeDescriptor> {
        let (_, payload) =
            split_scheme(uri).ok_or_else(|| NodeHarvestError::malformed("not an ssr URI"))?;
        let decoded = b64::decode_text(payload.trim())
            .ok_or_else(|| NodeHarvestError::malformed("ssr payload is not valid base64"))?;

        let (main, params) = match decoded.split_once("/?") {
            Some((main, params)) => (main, params),
            None => (decoded.trim_end_matches('/'), ""),
        };

        // The host may be an IPv6 literal, so split from the right.
        let parts: Vec<&str> = main.rsplitn(6, ':').collect();
        let [password_b64, obfs, cipher, protocol, port, host] = parts[..] else {
            return Err(NodeHarvestError::malformed(
                "ssr payload needs host:port:protocol:method:obfs:password",
            ));
        };

        let password = b64::decode_text(password_b64)
            .ok_or_else(|| NodeHarvestError::malformed("ssr password is not valid base64"))?;
        let port = parse_port(port)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let mut name = String::new();
        let mut obfs_param = String::new();
        let mut protocol_param = String::new();
        for pair in params.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = b64::decode_text(value).unwrap_or_default();
            match key {
                "remarks" => name = value,
                "obfsparam" => obfs_param = value,
                "protoparam" => protocol_param = value,
                _ => {}
            }
        }

        NodeDescriptor::new(
            name,
            host.to_string(),
            port,
            Protocol::ShadowsocksR {
                cipher: cipher.to_string(),
                password,
                protocol: protocol.to_string(),
                protocol_param,
                obfs: obfs.to_string(),
                obfs_param,
            },
        )
    }

    fn name(&self) -> &str {
        "shadowsocksr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::b64::{encode_standard, encode_url_safe};

    fn link(body: &str) -> String {
        format!("ssr://{}", encode_url_safe(body.as_bytes()))
    }

    #[test]
    fn decodes_with_params() {
        let body = format!(
            "1.2.3.4:8989:auth_aes128_md5:aes-256-cfb:tls1.2_ticket_auth:{}/?obfsparam={}&remarks={}",
            encode_url_safe(b"hunter2"),
            encode_url_safe(b"cdn.example.com"),
            encode_url_safe("Node Å".as_bytes()),
        );
        let node = ShadowsocksRDecoder.decode(&link(&body)).unwrap();
        assert_eq!(node.server, "1.2.3.4");
        assert_eq!(node.port, 8989);
        assert_eq!(node.name, "Node Å");
        assert_eq!(
            node.protocol,
            Protocol::ShadowsocksR {
                cipher: "aes-256-cfb".into(),
                password: "hunter2".into(),
                protocol: "auth_aes128_md5".into(),
                protocol_param: String::new(),
                obfs: "tls1.2_ticket_auth".into(),
                obfs_param: "cdn.example.com".into(),
            }
        );
    }

    #[test]
    fn decodes_without_params() {
        let body = format!(
            "ssr.example.com:443:origin:chacha20:plain:{}",
            encode_standard(b"pw")
        );
        let node = ShadowsocksRDecoder.decode(&link(&body)).unwrap();
        assert_eq!(node.name, "ssr.example.com:443");
    }

    #[test]
    fn too_few_fields() {
        let body = format!("1.2.3.4:8989:origin:{}", encode_url_safe(b"pw"));
        assert!(ShadowsocksRDecoder.decode(&link(&body)).is_err());
    }
}
