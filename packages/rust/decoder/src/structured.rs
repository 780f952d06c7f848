//! Structured (`proxies:`) document projection in both directions.
//!
//! Field names follow the widely used Clash layout, so documents written here
//! can be read back by the structured stage of the cascade.

use std::collections::BTreeMap;

use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, NodeKind, Protocol, Result};
use serde_yaml::{Mapping, Value};
use tracing::debug;

const REQUIRED_KEYS: [&str; 4] = ["name", "type", "server", "port"];

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse a document with a top-level `proxies` sequence.
///
/// Returns `None` when the text is not such a document. Elements without the
/// four required keys, or with an empty host or invalid port, are dropped.
pub fn parse_document(text: &str) -> Option<Vec<NodeDescriptor>> {
    let doc: Value = serde_yaml::from_str(text).ok()?;
    let proxies = doc.as_mapping()?.get("proxies")?.as_sequence()?;

    let nodes: Vec<NodeDescriptor> = proxies
        .iter()
        .filter_map(Value::as_mapping)
        .filter_map(|entry| match project(entry) {
            Ok(node) => node,
            Err(e) => {
                debug!(error = %e, "dropping structured entry");
                None
            }
        })
        .collect();
    Some(nodes)
}

/// Project one `proxies` element. `Ok(None)` means a required key is absent.
fn project(entry: &Mapping) -> Result<Option<NodeDescriptor>> {
    if REQUIRED_KEYS.iter().any(|k| entry.get(*k).is_none()) {
        return Ok(None);
    }

    let name = text(entry, "name");
    let type_name = text(entry, "type");
    let server = text(entry, "server");
    let port = text(entry, "port")
        .parse::<u16>()
        .map_err(|_| NodeHarvestError::malformed(format!("invalid port for {server}")))?;

    let protocol = match NodeKind::from_type_name(&type_name) {
        NodeKind::Shadowsocks => Protocol::Shadowsocks {
            cipher: text(entry, "cipher"),
            password: text(entry, "password"),
        },
        NodeKind::Vmess => Protocol::Vmess {
            uuid: text(entry, "uuid"),
            alter_id: text(entry, "alterId").parse().unwrap_or(0),
            cipher: text_or(entry, "cipher", "auto"),
            network: text_or(entry, "network", "tcp"),
            tls: flag(entry, "tls"),
            sni: first_text(entry, &["servername", "sni"]),
            path: nested_text(entry, &["ws-opts", "path"]),
            host: nested_text(entry, &["ws-opts", "headers", "Host"]),
        },
        NodeKind::Trojan => Protocol::Trojan {
            password: text(entry, "password"),
            sni: first_text(entry, &["sni", "servername"]),
            security: text_or(entry, "security", "tls"),
            network: text_or(entry, "network", "tcp"),
        },
        NodeKind::Vless => Protocol::Vless {
            uuid: text(entry, "uuid"),
            sni: first_text(entry, &["servername", "sni"]),
            security: match text(entry, "security") {
                s if !s.is_empty() => s,
                _ if entry.get("reality-opts").is_some() => "reality".to_string(),
                _ if flag(entry, "tls") => "tls".to_string(),
                _ => "none".to_string(),
            },
            flow: text(entry, "flow"),
            network: text_or(entry, "network", "tcp"),
        },
        NodeKind::ShadowsocksR => Protocol::ShadowsocksR {
            cipher: text(entry, "cipher"),
            password: text(entry, "password"),
            protocol: text(entry, "protocol"),
            protocol_param: text(entry, "protocol-param"),
            obfs: text(entry, "obfs"),
            obfs_param: text(entry, "obfs-param"),
        },
        NodeKind::Hysteria2 => Protocol::Hysteria2 {
            password: text(entry, "password"),
            sni: text(entry, "sni"),
            obfs: text(entry, "obfs"),
            obfs_password: text(entry, "obfs-password"),
            insecure: flag(entry, "skip-cert-verify"),
        },
        NodeKind::PlainTcp => Protocol::PlainTcp {
            tls: flag(entry, "tls"),
        },
        NodeKind::Websocket => Protocol::Websocket {
            path: match nested_text(entry, &["ws-opts", "path"]) {
                p if p.is_empty() => text_or(entry, "path", "/"),
                p => p,
            },
            host: first_non_empty([
                nested_text(entry, &["ws-opts", "headers", "Host"]),
                text(entry, "host"),
            ]),
            tls: flag(entry, "tls"),
        },
        NodeKind::Grpc => Protocol::Grpc {
            uuid: text(entry, "uuid"),
            service_name: nested_text(entry, &["grpc-opts", "grpc-service-name"]),
            tls: flag(entry, "tls"),
        },
        NodeKind::HttpUpgrade => Protocol::HttpUpgrade {
            path: text_or(entry, "path", "/"),
            host: text(entry, "host"),
            tls: flag(entry, "tls"),
        },
        NodeKind::Unknown => Protocol::Unknown {
            type_name,
            fields: extra_fields(entry),
        },
    };

    NodeDescriptor::new(name, server, port, protocol).map(Some)
}

/// Scalar rendered as text; absent or non-scalar values are empty.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn text(entry: &Mapping, key: &str) -> String {
    entry.get(key).map(scalar).unwrap_or_default()
}

fn text_or(entry: &Mapping, key: &str, default: &str) -> String {
    first_non_empty([text(entry, key), default.to_string()])
}

fn first_text(entry: &Mapping, keys: &[&str]) -> String {
    first_non_empty(keys.iter().map(|k| text(entry, k)))
}

fn first_non_empty(values: impl IntoIterator<Item = String>) -> String {
    values
        .into_iter()
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

fn nested_text(entry: &Mapping, path: &[&str]) -> String {
    let mut current = entry;
    let Some((last, parents)) = path.split_last() else {
        return String::new();
    };
    for key in parents {
        match current.get(*key).and_then(Value::as_mapping) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    text(current, last)
}

fn flag(entry: &Mapping, key: &str) -> bool {
    match entry.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "tls"),
        Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Every non-required field of an unknown entry, as JSON values.
fn extra_fields(entry: &Mapping) -> BTreeMap<String, serde_json::Value> {
    entry
        .iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?;
            if REQUIRED_KEYS.contains(&key) {
                return None;
            }
            let value = serde_json::to_value(v).ok()?;
            Some((key.to_string(), value))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Project a descriptor back to a `proxies` element.
///
/// `name`, `type`, `server` and `port` come first; empty optional fields are
/// omitted.
pub fn to_mapping(node: &NodeDescriptor) -> Mapping {
    let mut m = Mapping::new();
    let type_name = match &node.protocol {
        Protocol::Unknown { type_name, .. } => type_name.clone(),
        other => other.kind().as_str().to_string(),
    };
    m.insert("name".into(), node.name.clone().into());
    m.insert("type".into(), type_name.into());
    m.insert("server".into(), node.server.clone().into());
    m.insert("port".into(), Value::from(node.port));

    match &node.protocol {
        Protocol::Shadowsocks { cipher, password } => {
            put(&mut m, "cipher", cipher);
            put(&mut m, "password", password);
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
            put(&mut m, "uuid", uuid);
            m.insert("alterId".into(), Value::from(*alter_id));
            put(&mut m, "cipher", cipher);
            put(&mut m, "network", network);
            put_flag(&mut m, "tls", *tls);
            put(&mut m, "servername", sni);
            if let Some(opts) = ws_opts(path, host) {
                m.insert("ws-opts".into(), Value::Mapping(opts));
            }
        }
        Protocol::Trojan {
            password,
            sni,
            security,
            network,
        } => {
            put(&mut m, "password", password);
            put(&mut m, "sni", sni);
            put(&mut m, "security", security);
            put(&mut m, "network", network);
        }
        Protocol::Vless {
            uuid,
            sni,
            security,
            flow,
            network,
        } => {
            put(&mut m, "uuid", uuid);
            put(&mut m, "servername", sni);
            put(&mut m, "security", security);
            put_flag(&mut m, "tls", matches!(security.as_str(), "tls" | "reality"));
            put(&mut m, "flow", flow);
            put(&mut m, "network", network);
        }
        Protocol::ShadowsocksR {
            cipher,
            password,
            protocol,
            protocol_param,
            obfs,
            obfs_param,
        } => {
            put(&mut m, "cipher", cipher);
            put(&mut m, "password", password);
            put(&mut m, "protocol", protocol);
            put(&mut m, "protocol-param", protocol_param);
            put(&mut m, "obfs", obfs);
            put(&mut m, "obfs-param", obfs_param);
        }
        Protocol::Hysteria2 {
            password,
            sni,
            obfs,
            obfs_password,
            insecure,
        } => {
            put(&mut m, "password", password);
            put(&mut m, "sni", sni);
            put(&mut m, "obfs", obfs);
            put(&mut m, "obfs-password", obfs_password);
            put_flag(&mut m, "skip-cert-verify", *insecure);
        }
        Protocol::PlainTcp { tls } => put_flag(&mut m, "tls", *tls),
        Protocol::Websocket { path, host, tls } => {
            put_flag(&mut m, "tls", *tls);
            if let Some(opts) = ws_opts(path, host) {
                m.insert("ws-opts".into(), Value::Mapping(opts));
            }
        }
        Protocol::Grpc {
            uuid,
            service_name,
            tls,
        } => {
            put(&mut m, "uuid", uuid);
            put_flag(&mut m, "tls", *tls);
            if !service_name.is_empty() {
                let mut opts = Mapping::new();
                opts.insert("grpc-service-name".into(), service_name.clone().into());
                m.insert("grpc-opts".into(), Value::Mapping(opts));
            }
        }
        Protocol::HttpUpgrade { path, host, tls } => {
            put(&mut m, "path", path);
            put(&mut m, "host", host);
            put_flag(&mut m, "tls", *tls);
        }
        Protocol::Unknown { fields, .. } => {
            for (key, value) in fields {
                if let Ok(value) = serde_yaml::to_value(value) {
                    m.insert(key.clone().into(), value);
                }
            }
        }
    }
    m
}

/// Render a full `proxies:` document.
pub fn render_document(nodes: &[NodeDescriptor]) -> Result<String> {
    let proxies: Vec<Value> = nodes.iter().map(|n| Value::Mapping(to_mapping(n))).collect();
    let mut doc = Mapping::new();
    doc.insert("proxies".into(), Value::Sequence(proxies));
    serde_yaml::to_string(&doc)
        .map_err(|e| NodeHarvestError::parse(format!("failed to render proxies document: {e}")))
}

fn put(m: &mut Mapping, key: &str, value: &str) {
    if !value.is_empty() {
        m.insert(key.into(), value.into());
    }
}

fn put_flag(m: &mut Mapping, key: &str, value: bool) {
    if value {
        m.insert(key.into(), Value::Bool(true));
    }
}

fn ws_opts(path: &str, host: &str) -> Option<Mapping> {
    if path.is_empty() && host.is_empty() {
        return None;
    }
    let mut opts = Mapping::new();
    put(&mut opts, "path", path);
    if !host.is_empty() {
        let mut headers = Mapping::new();
        headers.insert("Host".into(), host.into());
        opts.insert("headers".into(), Value::Mapping(headers));
    }
    Some(opts)
}
