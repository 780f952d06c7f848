use nodeharvest_shared::{NodeDescriptor, NodeHarvestError, Protocol, Result};

use super::{SchemeDecoder, percent_decode, split_fragment, split_host_port, split_scheme};
use crate::b64;

/// `ss://` links, both SIP002 (`ss://base64(method:password)@host:port#name`)
/// and legacy (`ss://base64(method:password@host:port)#name`).
pub struct ShadowsocksDecoder;

impl SchemeDecoder for ShadowsocksDecoder {
    fn schemes(&self) -> &'static [&'static str] {
        &["ss"]
    }

    fn decode(&self, uri: &str) -> Result<NodeDescriptor> {
        let (_, rest) = split_scheme(uri)
            .ok_or_else(|| NodeHarvestError::malformed("not a shadowsocks URI"))?;
        let (body, name) = split_fragment(rest);
        // Plugin options and the optional trailing slash are not node identity.
        let body = body.split('?').next().unwrap_or_default().trim_end_matches('/');

        let (credentials, host_port) = match body.rsplit_once('@') {
            Some((userinfo, host_port)) => {
                let userinfo = percent_decode(userinfo);
                let credentials = if userinfo.contains(':') {
                    userinfo
                } else {
                    b64::decode_text(&userinfo).ok_or_else(|| {
                        NodeHarvestError::malformed("shadowsocks userinfo is not valid base64")
                    })?
                };
                (credentials, host_port.to_string())
            }
            None => {
                let decoded = b64::decode_text(body).ok_or_else(|| {
                    NodeHarvestError::malformed("shadowsocks payload is not valid base64")
                })?;
                let (credentials, host_port) = decoded.rsplit_once('@').ok_or_else(|| {
                    NodeHarvestError::malformed("shadowsocks payload has no '@' before host:port")
                })?;
                (credentials.to_string(), host_port.to_string())
            }
        };

        let (cipher, password) = credentials.split_once(':').ok_or_else(|| {
            NodeHarvestError::malformed("shadowsocks credentials have no ':' between method and password")
        })?;
        let (server, port) = split_host_port(&host_port)?;

        NodeDescriptor::new(
            name,
            server,
            port,
            Protocol::Shadowsocks {
                cipher: cipher.to_string(),
                password: password.to_string(),
            },
        )
    }

    fn name(&self) -> &str {
        "shadowsocks"
    }
}
