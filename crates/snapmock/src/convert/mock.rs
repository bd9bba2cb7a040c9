//! Mock definitions consumed by the mock-serving engine.

use crate::error::{Error, Result};
use crate::proxy::headers::is_hop_by_hop;
use crate::recording::{BodyEncoding, Recording};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request headers never folded into a matcher
const NON_MATCHING_REQUEST_HEADERS: &[&str] = &["host", "content-length"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockMatcher {
    pub method: String,
    pub path: String,
    /// Exact-match request header constraints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Present only for binary bodies, which are base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockDefinition {
    pub matcher: MockMatcher,
    pub response: MockResponse,
    /// ID of the recording this mock was generated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// The document handed to the mock-serving engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockDocument {
    pub mocks: Vec<MockDefinition>,
}

impl MockDocument {
    pub fn new(mocks: Vec<MockDefinition>) -> Self {
        Self { mocks }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Conversion {
            id: "<document>".into(),
            reason: e.to_string(),
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Conversion {
            id: "<document>".into(),
            reason: e.to_string(),
        })
    }
}

/// Reject recordings that cannot be turned back into a request/response.
pub(crate) fn validate(recording: &Recording) -> Result<()> {
    let fail = |reason: String| Error::Conversion {
        id: recording.id.clone(),
        reason,
    };
    let method = &recording.request.method;
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(fail(format!("invalid method '{method}'")));
    }
    if !recording.request.path.starts_with('/') {
        return Err(fail(format!(
            "path '{}' is not absolute",
            recording.request.path
        )));
    }
    let status = recording.response.status_code;
    if !(100..=999).contains(&status) {
        return Err(fail(format!("invalid status code {status}")));
    }
    for body in [&recording.request.body, &recording.response.body]
        .into_iter()
        .flatten()
    {
        body.decode()
            .map_err(|e| fail(format!("undecodable body: {e}")))?;
    }
    Ok(())
}

/// Matcher headers: captured request headers minus transport-level ones.
pub(crate) fn matcher_headers(recording: &Recording) -> BTreeMap<String, String> {
    collect_headers(&recording.request.headers, |name| {
        !NON_MATCHING_REQUEST_HEADERS.contains(&name)
    })
}

pub(crate) fn build_mock(
    recording: &Recording,
    path: String,
    include_headers: bool,
) -> MockDefinition {
    let response = &recording.response;
    let (body, body_encoding) = match &response.body {
        Some(b) if b.encoding == BodyEncoding::Base64 => {
            (Some(b.data.clone()), Some(BodyEncoding::Base64))
        }
        Some(b) => (Some(b.data.clone()), None),
        None => (None, None),
    };

    MockDefinition {
        matcher: MockMatcher {
            method: recording.request.method.to_ascii_uppercase(),
            path,
            headers: include_headers
                .then(|| matcher_headers(recording))
                .filter(|h| !h.is_empty()),
        },
        response: MockResponse {
            status_code: response.status_code,
            // Length is recomputed by whoever serves the body
            headers: collect_headers(&response.headers, |name| name != "content-length"),
            body,
            body_encoding,
        },
        source: Some(recording.id.clone()),
    }
}

/// Lowercased, hop-by-hop stripped, repeated names joined with `, `.
fn collect_headers(
    headers: &[(String, String)],
    keep: impl Fn(&str) -> bool,
) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        if is_hop_by_hop(&name) || !keep(&name) {
            continue;
        }
        out.entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    out
}
