use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, Protocol, Result};

use super::{AuthorityUri, SchemeDecoder};

/// `vless://uuid@host:port?security=..&sni=..&flow=..&type=..#name`
pub struct VlessDecoder;

impl SchemeDecoder for VlessDecoder {
    fn schemes(&self) -> &'static [&'static str] {
        &["vless"]
    }

    fn decode(&self, uri: &str) -> Result<NodeDescriptor> {
        let parsed = AuthorityUri::parse(uri)?;
        if parsed.userinfo.is_empty() {
            return Err(NodeHarvestError::malformed("vless URI has no uuid"));
        }

        NodeDescriptor::new(
            parsed.name.clone(),
            parsed.host.clone(),
            parsed.port,
            Protocol::Vless {
                uuid: parsed.userinfo.clone(),
                sni: parsed.param_any(&["sni", "serverName"]),
                security: parsed.param("security", "none"),
                flow: parsed.param("flow", ""),
                network: parsed.param("type", "tcp"),
            },
        )
    }

    fn name(&self) -> &str {
        "vless"
    }
}
