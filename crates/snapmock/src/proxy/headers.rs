//! Header handling for proxied exchanges.
//!
//! Hop-by-hop headers (RFC 9110 §7.6.1) are connection-scoped and never
//! forwarded, recorded into mocks, or replayed. Headers named in a
//! `Connection` value are hop-by-hop too.

use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use std::collections::HashSet;

pub static X_SNAPMOCK_ERROR: HeaderName = HeaderName::from_static("x-snapmock-error");

pub static VALUE_UPSTREAM: HeaderValue = HeaderValue::from_static("upstream");
pub static VALUE_REQUEST: HeaderValue = HeaderValue::from_static("request");

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// True for the fixed hop-by-hop set. `name` must be lowercase.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name)
}

/// Lowercased tokens listed in the `Connection` header(s).
fn connection_tokens(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Copy of `headers` without hop-by-hop entries.
pub fn end_to_end(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_tokens(headers);
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if is_hop_by_hop(lower) || listed.contains(lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Header list in wire order, for storage. Non-UTF-8 values are decoded lossily.
pub fn to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
