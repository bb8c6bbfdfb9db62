//! Eddystone-URL compression.
//!
//! A URL is sent as a scheme prefix code followed by up to 17 bytes where
//! bytes `0x00..=0x0D` stand for common top-level-domain expansions.

use crate::{
    errors::{ProtocolError, Result},
    frame::UrlFrame,
};

const SCHEMES: [(u8, &str); 4] =
    [(0x00, "http://www."), (0x01, "https://www."), (0x02, "http://"), (0x03, "https://")];

const EXPANSIONS: [&str; 14] = [
    ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu", ".net",
    ".info", ".biz", ".gov",
];

/// Compress `url` into a scheme code and encoded bytes.
///
/// # Errors
///
/// - `ProtocolError::InvalidUrl` if the scheme is not http/https, a
///   character is outside printable ASCII, or the result exceeds 17 bytes
pub fn encode_url(url: &str) -> Result<(u8, Vec<u8>)> {
    // Longest prefix first so "http://www." wins over "http://".
    let Some((scheme, rest)) = SCHEMES
        .iter()
        .filter_map(|(code, prefix)| url.strip_prefix(prefix).map(|rest| (*code, rest)))
        .min_by_key(|(_, rest)| rest.len())
    else {
        return Err(ProtocolError::InvalidUrl(format!("unsupported scheme in {url:?}")));
    };

    let mut encoded = Vec::with_capacity(UrlFrame::MAX_ENCODED_URL);
    let mut remaining = rest;
    while !remaining.is_empty() {
        if let Some((code, expansion)) = EXPANSIONS
            .iter()
            .enumerate()
            .find(|(_, expansion)| remaining.starts_with(**expansion))
        {
            encoded.push(code as u8);
            remaining = &remaining[expansion.len()..];
            continue;
        }

        let byte = remaining.as_bytes()[0];
        if !(0x21..=0x7E).contains(&byte) {
            return Err(ProtocolError::InvalidUrl(format!("byte {byte:#04x} is not encodable")));
        }
        encoded.push(byte);
        remaining = &remaining[1..];
    }

    if encoded.len() > UrlFrame::MAX_ENCODED_URL {
        return Err(ProtocolError::InvalidUrl(format!(
            "{url:?} compresses to {} bytes, at most {} fit",
            encoded.len(),
            UrlFrame::MAX_ENCODED_URL
        )));
    }
    Ok((scheme, encoded))
}

/// Expand a scheme code and encoded bytes back into a URL.
///
/// # Errors
///
/// - `ProtocolError::InvalidUrl` for an unknown scheme code or a byte that
///   is neither an expansion code nor printable ASCII
pub fn decode_url(scheme: u8, encoded: &[u8]) -> Result<String> {
    let Some((_, prefix)) = SCHEMES.iter().find(|(code, _)| *code == scheme) else {
        return Err(ProtocolError::InvalidUrl(format!("unknown scheme code {scheme:#04x}")));
    };

    let mut url = String::from(*prefix);
    for &byte in encoded {
        if let Some(expansion) = EXPANSIONS.get(usize::from(byte)) {
            url.push_str(expansion);
        } else if (0x21..=0x7E).contains(&byte) {
            url.push(char::from(byte));
        } else {
            return Err(ProtocolError::InvalidUrl(format!("byte {byte:#04x} is not decodable")));
        }
    }
    Ok(url)
}
