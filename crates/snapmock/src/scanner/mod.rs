//! Credential-shaped data detection for recordings.
//!
//! The scanner only reports. It never alters a recording and never fails:
//! content it cannot interpret (binary bodies, odd encodings) simply yields
//! no findings.

mod patterns;

use crate::recording::{BodySnapshot, Recording};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Tunable detection thresholds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    /// Minimum value length for `apiKey=...`-style pairs
    #[serde(default = "default_min_api_key_length")]
    pub min_api_key_length: usize,
    /// Minimum length of a bare hex token
    #[serde(default = "default_min_hex_length")]
    pub min_hex_length: usize,
    /// Minimum length of a bare base32 token, padding excluded
    #[serde(default = "default_min_base32_length")]
    pub min_base32_length: usize,
    /// Extra header names (case-insensitive) always treated as credentials
    #[serde(default)]
    pub sensitive_headers: Vec<String>,
}

fn default_min_api_key_length() -> usize {
    16
}

fn default_min_hex_length() -> usize {
    32
}

fn default_min_base32_length() -> usize {
    24
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_api_key_length: default_min_api_key_length(),
            min_hex_length: default_min_hex_length(),
            min_base32_length: default_min_base32_length(),
            sensitive_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveDataType {
    BearerToken,
    BasicAuth,
    Jwt,
    ApiKey,
    Cookie,
    CreditCard,
}

impl SensitiveDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitiveDataType::BearerToken => "bearer_token",
            SensitiveDataType::BasicAuth => "basic_auth",
            SensitiveDataType::Jwt => "jwt",
            SensitiveDataType::ApiKey => "api_key",
            SensitiveDataType::Cookie => "cookie",
            SensitiveDataType::CreditCard => "credit_card",
        }
    }
}

impl fmt::Display for SensitiveDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding. `location` reads like `request.headers.authorization`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitiveDataWarning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_id: Option<String>,
    pub location: String,
    #[serde(rename = "type")]
    pub kind: SensitiveDataType,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct SensitiveDataScanner {
    config: ScannerConfig,
}

struct Findings<'a> {
    recording_id: &'a str,
    seen: HashSet<(String, SensitiveDataType)>,
    warnings: Vec<SensitiveDataWarning>,
}

impl Findings<'_> {
    /// At most one finding per (location, type) per recording
    fn add(&mut self, location: String, kind: SensitiveDataType, message: String) {
        if self.seen.insert((location.clone(), kind)) {
            self.warnings.push(SensitiveDataWarning {
                recording_id: Some(self.recording_id.to_string()),
                location,
                kind,
                message,
            });
        }
    }
}

impl SensitiveDataScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn scan_recording(&self, recording: &Recording) -> Vec<SensitiveDataWarning> {
        let mut findings = Findings {
            recording_id: &recording.id,
            seen: HashSet::new(),
            warnings: Vec::new(),
        };

        let req = &recording.request;
        self.scan_headers("request", &req.headers, &mut findings);
        if let Some(query) = req.query.as_deref() {
            self.scan_text("request.query", query, &mut findings);
        }
        self.scan_body("request.body", req.body.as_ref(), &mut findings);

        let resp = &recording.response;
        self.scan_headers("response", &resp.headers, &mut findings);
        self.scan_body("response.body", resp.body.as_ref(), &mut findings);

        findings.warnings
    }

    /// Scan every recording, concatenating findings in input order.
    pub fn scan_all<'a, I>(&self, recordings: I) -> Vec<SensitiveDataWarning>
    where
        I: IntoIterator<Item = &'a Recording>,
    {
        recordings
            .into_iter()
            .flat_map(|r| self.scan_recording(r))
            .collect()
    }

    fn scan_headers(&self, side: &str, headers: &[(String, String)], findings: &mut Findings<'_>) {
        for (name, value) in headers {
            let lower = name.to_ascii_lowercase();
            let location = format!("{side}.headers.{lower}");

            match lower.as_str() {
                "authorization" | "proxy-authorization" => {
                    classify_authorization(location, value, findings);
                    continue;
                }
                "cookie" | "set-cookie" => {
                    findings.add(
                        location,
                        SensitiveDataType::Cookie,
                        format!("{name} header carries session cookies"),
                    );
                    continue;
                }
                _ => {}
            }

            let configured = self
                .config
                .sensitive_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name));
            if configured || patterns::is_key_header(&lower) {
                let kind = if patterns::looks_like_jwt(value.trim()) {
                    SensitiveDataType::Jwt
                } else {
                    SensitiveDataType::ApiKey
                };
                findings.add(
                    location,
                    kind,
                    format!("{name} header looks like a credential ({})", patterns::redact(value)),
                );
                continue;
            }

            self.scan_text(&location, value, findings);
        }
    }

    fn scan_body(&self, location: &str, body: Option<&BodySnapshot>, findings: &mut Findings<'_>) {
        // Binary bodies are not scanned
        if let Some(text) = body.and_then(|b| b.as_text()) {
            self.scan_text(location, text, findings);
        }
    }

    fn scan_text(&self, location: &str, text: &str, findings: &mut Findings<'_>) {
        if let Some(jwt) = patterns::find_jwt(text) {
            findings.add(
                location.to_string(),
                SensitiveDataType::Jwt,
                format!("JWT found ({})", patterns::redact(jwt)),
            );
        }
        if let Some(key) = patterns::find_credential_pair(text, self.config.min_api_key_length) {
            findings.add(
                location.to_string(),
                SensitiveDataType::ApiKey,
                format!("credential-like value for '{key}'"),
            );
        } else if let Some(hex) = patterns::find_hex_token(text, self.config.min_hex_length) {
            findings.add(
                location.to_string(),
                SensitiveDataType::ApiKey,
                format!("long hex token found ({})", patterns::redact(hex)),
            );
        } else if let Some(b32) = patterns::find_base32_token(text, self.config.min_base32_length) {
            findings.add(
                location.to_string(),
                SensitiveDataType::ApiKey,
                format!("long base32 token found ({})", patterns::redact(b32)),
            );
        }
        if let Some(card) = patterns::find_card_number(text) {
            findings.add(
                location.to_string(),
                SensitiveDataType::CreditCard,
                format!(
                    "credit card number ending in {}",
                    &card[card.len().saturating_sub(4)..]
                ),
            );
        }
    }
}

fn classify_authorization(location: String, value: &str, findings: &mut Findings<'_>) {
    let value = value.trim();
    let (scheme, credentials) = value.split_once(' ').unwrap_or((value, ""));
    let credentials = credentials.trim();

    if scheme.eq_ignore_ascii_case("bearer") {
        let detail = if patterns::looks_like_jwt(credentials) {
            "bearer JWT"
        } else {
            "bearer token"
        };
        findings.add(
            location,
            SensitiveDataType::BearerToken,
            format!("{detail} in authorization header ({})", patterns::redact(credentials)),
        );
    } else if scheme.eq_ignore_ascii_case("basic") {
        findings.add(
            location,
            SensitiveDataType::BasicAuth,
            "basic auth credentials in authorization header".to_string(),
        );
    } else {
        findings.add(
            location,
            SensitiveDataType::ApiKey,
            format!("authorization header with '{scheme}' scheme"),
        );
    }
}
