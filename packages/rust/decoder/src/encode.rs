//! Render descriptors back to share URIs for the subscription list.

use nodeharvest_shared::{NodeDescriptor, Protocol};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::form_urlencoded;

use crate::b64;

/// Everything except RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Share URI for a descriptor. `Unknown` descriptors have no URI form.
pub fn to_uri(node: &NodeDescriptor) -> Option<String> {
    let authority = authority(&node.server, node.port);
    let fragment = format!("#{}", encode_component(&node.name));

    let uri = match &node.protocol {
        Protocol::Shadowsocks { cipher, password } => {
            let userinfo = b64::encode_url_safe(format!("{cipher}:{password}").as_bytes());
            format!("ss://{userinfo}@{authority}{fragment}")
        }
        Protocol::Vmess {
            uuid,
            alter_id,
            cipher,
            network,
            tls,
            sni,
            path,
            host,
        } => {
            let tls = tls_param(*tls);
            let payload = serde_json::json!({
                "v": "2",
                "ps": node.name,
                "add": node.server,
                "port": node.port.to_string(),
                "id": uuid,
                "aid": alter_id.to_string(),
                "scy": cipher,
                "net": network,
                "type": "none",
                "host": host,
                "path": path,
                "tls": tls,
                "sni": sni,
            });
            format!("vmess://{}", b64::encode_standard(payload.to_string().as_bytes()))
        }
        Protocol::Trojan {
            password,
            sni,
            security,
            network,
        } => format!(
            "trojan://{}@{authority}{}{fragment}",
            encode_component(password),
            query(&[
                ("security", security.as_str()),
                ("sni", sni.as_str()),
                ("type", network.as_str()),
            ]),
        ),
        Protocol::Vless {
            uuid,
            sni,
            security,
            flow,
            network,
        } => format!(
            "vless://{}@{authority}{}{fragment}",
            encode_component(uuid),
            query(&[
                ("encryption", "none"),
                ("security", security.as_str()),
                ("sni", sni.as_str()),
                ("flow", flow.as_str()),
                ("type", network.as_str()),
            ]),
        ),
        Protocol::ShadowsocksR {
            cipher,
            password,
            protocol,
            protocol_param,
            obfs,
            obfs_param,
        } => {
            let body = format!(
                "{}:{}:{protocol}:{cipher}:{obfs}:{}/?obfsparam={}&protoparam={}&remarks={}",
                node.server,
                node.port,
                b64::encode_url_safe(password.as_bytes()),
                b64::encode_url_safe(obfs_param.as_bytes()),
                b64::encode_url_safe(protocol_param.as_bytes()),
                b64::encode_url_safe(node.name.as_bytes()),
            );
            format!("ssr://{}", b64::encode_url_safe(body.as_bytes()))
        }
        Protocol::Hysteria2 {
            password,
            sni,
            obfs,
            obfs_password,
            insecure,
        } => format!(
            "hysteria2://{}{authority}{}{fragment}",
            userinfo(password),
            query(&[
                ("sni", sni.as_str()),
                ("obfs", obfs.as_str()),
                ("obfs-password", obfs_password.as_str()),
                ("insecure", if *insecure { "1" } else { "" }),
            ]),
        ),
        Protocol::PlainTcp { tls } => format!(
            "tcp://{authority}{}{fragment}",
            query(&[("security", tls_param(*tls))]),
        ),
        Protocol::Websocket { path, host, tls } => format!(
            "{}://{authority}{}{fragment}",
            if *tls { "wss" } else { "ws" },
            query(&[("path", path.as_str()), ("host", host.as_str())]),
        ),
        Protocol::Grpc {
            uuid,
            service_name,
            tls,
        } => format!(
            "grpc://{}{authority}{}{fragment}",
            userinfo(uuid),
            query(&[
                ("serviceName", service_name.as_str()),
                ("security", tls_param(*tls)),
            ]),
        ),
        Protocol::HttpUpgrade { path, host, tls } => format!(
            "httpupgrade://{authority}{}{fragment}",
            query(&[
                ("path", path.as_str()),
                ("host", host.as_str()),
                ("security", tls_param(*tls)),
            ]),
        ),
        Protocol::Unknown { .. } => return None,
    };
    Some(uri)
}

fn authority(server: &str, port: u16) -> String {
    if server.contains(':') {
        format!("[{server}]:{port}")
    } else {
        format!("{server}:{port}")
    }
}

fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT).to_string()
}

fn userinfo(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        format!("{}@", encode_component(secret))
    }
}

fn tls_param(tls: bool) -> &'static str {
    if tls { "tls" } else { "" }
}

/// `?k=v&...` over the non-empty pairs, or nothing at all.
fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in pairs.iter().filter(|(_, v)| !v.is_empty()) {
        serializer.append_pair(key, value);
        any = true;
    }
    if any {
        format!("?{}", serializer.finish())
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemes::{DecoderRegistry, LineResult};
    use nodeharvest_shared::NodeKind;

    fn node(server: &str, port: u16, protocol: Protocol) -> NodeDescriptor {
        NodeDescriptor::new("Node #1 ü", server, port, protocol).unwrap()
    }

    fn samples() -> Vec<NodeDescriptor> {
        vec![
            node(
                "1.2.3.4",
                8388,
                Protocol::Shadowsocks {
                    cipher: "aes-256-gcm".into(),
                    password: "p@ss:word".into(),
                },
            ),
            node(
                "v.example.com",
                443,
                Protocol::Vmess {
                    uuid: "b831381d-6324-4d53-ad4f-8cda48b30811".into(),
                    alter_id: 0,
                    cipher: "auto".into(),
                    network: "ws".into(),
                    tls: true,
                    sni: "v.example.com".into(),
                    path: "/ray".into(),
                    host: "cdn.example.com".into(),
                },
            ),
            node(
                "2001:db8::2",
                443,
                Protocol::Trojan {
                    password: "s e/cret".into(),
                    sni: "t.example.com".into(),
                    security: "tls".into(),
                    network: "tcp".into(),
                },
            ),
            node(
                "vl.example.com",
                8443,
                Protocol::Vless {
                    uuid: "id-1".into(),
                    sni: "www.example.com".into(),
                    security: "reality".into(),
                    flow: "xtls-rprx-vision".into(),
                    network: "tcp".into(),
                },
            ),
            node(
                "ssr.example.com",
                8989,
                Protocol::ShadowsocksR {
                    cipher: "aes-256-cfb".into(),
                    password: "pw".into(),
                    protocol: "origin".into(),
                    protocol_param: String::new(),
                    obfs: "plain".into(),
                    obfs_param: String::new(),
                },
            ),
            node(
                "hy.example.com",
                8443,
                Protocol::Hysteria2 {
                    password: "letmein".into(),
                    sni: "hy.example.com".into(),
                    obfs: String::new(),
                    obfs_password: String::new(),
                    insecure: true,
                },
            ),
            node("5.6.7.8", 9000, Protocol::PlainTcp { tls: false }),
            node(
                "w.example.com",
                443,
                Protocol::Websocket {
                    path: "/ws?ed=2048".into(),
                    host: "cdn.example.com".into(),
                    tls: true,
                },
            ),
            node(
                "g.example.com",
                443,
                Protocol::Grpc {
                    uuid: "u-1".into(),
                    service_name: "tunnel".into(),
                    tls: true,
                },
            ),
            node(
                "h.example.com",
                80,
                Protocol::HttpUpgrade {
                    path: "/up".into(),
                    host: String::new(),
                    tls: false,
                },
            ),
        ]
    }

    #[test]
    fn reencoded_uris_decode_to_same_descriptor() {
        let registry = DecoderRegistry::new();
        for original in samples() {
            let uri = to_uri(&original).unwrap();
            match registry.decode_line(&uri) {
                LineResult::Node(decoded) => {
                    assert_eq!(decoded.kind(), original.kind(), "{uri}");
                    assert_eq!(decoded.server, original.server, "{uri}");
                    assert_eq!(decoded.port, original.port, "{uri}");
                    assert_eq!(decoded.name, original.name, "{uri}");
                    assert_eq!(decoded.protocol, original.protocol, "{uri}");
                }
                other => panic!("{uri} did not decode: {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_has_no_uri() {
        let node = node(
            "10.0.0.1",
            51820,
            Protocol::Unknown {
                type_name: "wireguard".into(),
                fields: Default::default(),
            },
        );
        assert_eq!(node.kind(), NodeKind::Unknown);
        assert!(to_uri(&node).is_none());
    }

    #[test]
    fn empty_query_is_omitted() {
        let node = node("5.6.7.8", 9000, Protocol::PlainTcp { tls: false });
        assert_eq!(
            to_uri(&node).unwrap(),
            "tcp://5.6.7.8:9000#Node%20%231%20%C3%BC"
        );
    }
}
