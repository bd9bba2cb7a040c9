//! Types for captured exchanges - requests, responses and body snapshots.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One captured request/response exchange.
///
/// Created once the upstream response has been fully read and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

/// Captured request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Headers in wire order; names are lowercase
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodySnapshot>,
}

/// Captured response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodySnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Utf8,
    Base64,
}

/// Best-effort copy of a message body taken at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodySnapshot {
    pub encoding: BodyEncoding,
    pub data: String,
    /// Size of the original body in bytes, before truncation
    pub size: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl BodySnapshot {
    /// Snapshot `bytes`, keeping at most `max_bytes`. Empty bodies yield `None`.
    pub fn capture(bytes: &[u8], max_bytes: usize) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let truncated = bytes.len() > max_bytes;
        let kept = &bytes[..bytes.len().min(max_bytes)];
        let (encoding, data) = match std::str::from_utf8(kept) {
            Ok(text) => (BodyEncoding::Utf8, text.to_string()),
            Err(e) if truncated && e.error_len().is_none() => {
                // Cut landed inside a multi-byte character
                let valid = &kept[..e.valid_up_to()];
                (
                    BodyEncoding::Utf8,
                    String::from_utf8_lossy(valid).into_owned(),
                )
            }
            Err(_) => (BodyEncoding::Base64, BASE64.encode(kept)),
        };
        Some(Self {
            encoding,
            data,
            size: bytes.len(),
            truncated,
        })
    }

    /// Text view of the body, if it was captured as UTF-8
    pub fn as_text(&self) -> Option<&str> {
        match self.encoding {
            BodyEncoding::Utf8 => Some(&self.data),
            BodyEncoding::Base64 => None,
        }
    }

    /// Raw bytes of the captured snapshot
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self.encoding {
            BodyEncoding::Utf8 => Ok(self.data.as_bytes().to_vec()),
            BodyEncoding::Base64 => BASE64.decode(&self.data),
        }
    }
}

impl Recording {
    /// Time-ordered unique recording ID
    pub fn new_id() -> String {
        uuid::Uuid::now_v7().simple().to_string()
    }

    /// File name used on disk: `rec_<id>.json`
    pub fn file_name(&self) -> String {
        format!("rec_{}.json", self.id)
    }

    /// Host subdirectory this recording is stored under
    pub fn host_dir(&self) -> String {
        host_dir_name(&self.request.host)
    }

    /// Request path plus query string, if any
    pub fn path_and_query(&self) -> String {
        match &self.request.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.request.path, q),
            _ => self.request.path.clone(),
        }
    }
}

impl RecordedRequest {
    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl RecordedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Filesystem-safe directory name for a host (port separator becomes `_`).
pub fn host_dir_name(host: &str) -> String {
    let name: String = host
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "_unknown".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_utf8() {
        let snap = BodySnapshot::capture(b"{\"ok\":true}", 1024).unwrap();
        assert_eq!(snap.encoding, BodyEncoding::Utf8);
        assert_eq!(snap.as_text(), Some("{\"ok\":true}"));
        assert_eq!(snap.size, 11);
        assert!(!snap.truncated);
    }

    #[test]
    fn test_snapshot_binary_uses_base64() {
        let bytes = [0xff, 0x00, 0xfe, 0x10];
        let snap = BodySnapshot::capture(&bytes, 1024).unwrap();
        assert_eq!(snap.encoding, BodyEncoding::Base64);
        assert!(snap.as_text().is_none());
        assert_eq!(snap.decode().unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_snapshot_truncates() {
        let snap = BodySnapshot::capture(b"abcdefghij", 4).unwrap();
        assert!(snap.truncated);
        assert_eq!(snap.data, "abcd");
        assert_eq!(snap.size, 10);
    }

    #[test]
    fn test_snapshot_truncation_inside_multibyte_char() {
        // "é" is two bytes; cutting after the first must stay UTF-8
        let snap = BodySnapshot::capture("aé".as_bytes(), 2).unwrap();
        assert_eq!(snap.encoding, BodyEncoding::Utf8);
        assert_eq!(snap.data, "a");
    }

    #[test]
    fn test_empty_body_is_none() {
        assert!(BodySnapshot::capture(b"", 10).is_none());
    }

    #[test]
    fn test_new_ids_are_unique() {
        let a = Recording::new_id();
        let b = Recording::new_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_host_dir_name() {
        assert_eq!(host_dir_name("api.example.com"), "api.example.com");
        assert_eq!(host_dir_name("localhost:8080"), "localhost_8080");
        assert_eq!(host_dir_name("[::1]:443"), "___1__443");
        assert_eq!(host_dir_name(""), "_unknown");
        assert_eq!(host_dir_name(".."), "_unknown");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = RecordedRequest {
            method: "GET".into(),
            scheme: "http".into(),
            host: "h".into(),
            path: "/".into(),
            query: None,
            headers: vec![("authorization".into(), "Bearer x".into())],
            body: None,
        };
        assert_eq!(req.header("Authorization"), Some("Bearer x"));
        assert_eq!(req.header("cookie"), None);
    }
}
