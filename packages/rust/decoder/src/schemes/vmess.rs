use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, Protocol, Result};
use serde_json::{Map, Value};

use super::{SchemeDecoder, parse_port, percent_decode, split_scheme};
use crate::b64;

/// `vmess://base64(json)` links in the v2rayN share format.
pub struct VmessDecoder;

impl SchemeDecoder for VmessDecoder {
    fn schemes(&self) -> &'static [&'static str] {
        &["vmess"]
    }

    fn decode(&self, uri: &str) -> Result<NodeDescriptor> {
        let (_, payload) =
            split_scheme(uri).ok_or_else(|| NodeHarvestError::malformed("not a vmess URI"))?;
        let payload = payload.split('#').next().unwrap_or_default();

        let text = b64::decode_text(&percent_decode(payload))
            .ok_or_else(|| NodeHarvestError::malformed("vmess payload is not valid base64"))?;
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| NodeHarvestError::parse(format!("vmess payload is not JSON: {e}")))?;
        let obj = json
            .as_object()
            .ok_or_else(|| NodeHarvestError::malformed("vmess payload is not a JSON object"))?;

        for key in ["add", "port", "id"] {
            if !obj.contains_key(key) {
                return Err(NodeHarvestError::malformed(format!(
                    "vmess payload has no '{key}'"
                )));
            }
        }

        let uuid = text_field(obj, "id");
        if uuid.is_empty() {
            return Err(NodeHarvestError::malformed("vmess payload has an empty 'id'"));
        }

        let port = parse_port(&text_field(obj, "port"))?;
        let alter_id = text_field(obj, "aid").parse::<u32>().unwrap_or(0);
        let tls = match obj.get("tls") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty() && s != "none",
            _ => false,
        };

        NodeDescriptor::new(
            text_field(obj, "ps"),
            text_field(obj, "add"),
            port,
            Protocol::Vmess {
                uuid,
                alter_id,
                cipher: non_empty(text_field(obj, "scy"), "auto"),
                network: non_empty(text_field(obj, "net"), "tcp"),
                tls,
                sni: text_field(obj, "sni"),
                path: text_field(obj, "path"),
                host: text_field(obj, "host"),
            },
        )
    }

    fn name(&self) -> &str {
        "vmess"
    }
}

/// A JSON field rendered as text; numbers are common for `port` and `aid`.
fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn non_empty(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}
