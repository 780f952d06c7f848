//! Lenient Base64 handling for subscription payloads.
//!
//! Published payloads mix the standard and URL-safe alphabets, drop or keep
//! padding arbitrarily, and wrap lines. Both engines here accept either
//! padding style and non-canonical trailing bits.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decode Base64 in either alphabet, ignoring ASCII whitespace.
pub fn decode_bytes(input: &str) -> Option<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    let engine = if cleaned.contains(['-', '_']) {
        &URL_SAFE_LENIENT
    } else {
        &STANDARD_LENIENT
    };
    engine.decode(cleaned.as_bytes()).ok()
}

/// Decode Base64 into UTF-8 text.
pub fn decode_text(input: &str) -> Option<String> {
    String::from_utf8(decode_bytes(input)?).ok()
}

/// Whether the whole content consists of Base64 alphabet characters
/// (whitespace allowed, padding only at the end).
pub fn looks_like_base64(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return false;
    }
    let body = trimmed.trim_end_matches('=');
    if trimmed.len() - body.len() > 2 || body.is_empty() {
        return false;
    }
    body.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '-' | '_') || c.is_ascii_whitespace())
}

/// Encode with the URL-safe alphabet, no padding.
pub fn encode_url_safe(input: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(input)
}

/// Encode with the standard alphabet, padded.
pub fn encode_standard(input: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(input)
}
