//! Conversion options and the conversion-time filter vocabulary
//! (path glob, methods, status codes).

use crate::error::{Error, Result};
use crate::filter::Glob;
use crate::recording::Recording;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy for recordings that reduce to the same matcher signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStrategy {
    /// Keep the earliest-captured recording per signature
    #[default]
    First,
    /// Keep the latest-captured recording per signature
    Last,
    /// Emit one mock per recording
    All,
}

impl DuplicateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateStrategy::First => "first",
            DuplicateStrategy::Last => "last",
            DuplicateStrategy::All => "all",
        }
    }
}

impl fmt::Display for DuplicateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(DuplicateStrategy::First),
            "last" => Ok(DuplicateStrategy::Last),
            "all" => Ok(DuplicateStrategy::All),
            other => Err(format!(
                "unknown duplicate strategy '{other}' (expected first, last or all)"
            )),
        }
    }
}

/// Status code set: explicit codes, classes (`2xx`) and ranges (`200-299`),
/// comma separated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct StatusFilter {
    source: String,
    ranges: Vec<(u16, u16)>,
}

impl StatusFilter {
    pub fn matches(&self, status: u16) -> bool {
        self.ranges
            .iter()
            .any(|(lo, hi)| (*lo..=*hi).contains(&status))
    }

    /// Inclusive range filter
    pub fn range(lo: u16, hi: u16) -> Self {
        Self {
            source: format!("{lo}-{hi}"),
            ranges: vec![(lo.min(hi), lo.max(hi))],
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            ranges.push(parse_status_part(part)?);
        }
        if ranges.is_empty() {
            return Err("status filter is empty".to_string());
        }
        Ok(Self {
            source: s.trim().to_string(),
            ranges,
        })
    }
}

fn parse_status_part(part: &str) -> std::result::Result<(u16, u16), String> {
    let lower = part.to_ascii_lowercase();
    if let Some(class) = lower.strip_suffix("xx") {
        let digit: u16 = class
            .parse()
            .ok()
            .filter(|d| (1..=9).contains(d))
            .ok_or_else(|| format!("invalid status class '{part}'"))?;
        return Ok((digit * 100, digit * 100 + 99));
    }
    let code = |s: &str| -> std::result::Result<u16, String> {
        s.trim()
            .parse::<u16>()
            .ok()
            .filter(|c| (100..=999).contains(c))
            .ok_or_else(|| format!("invalid status code '{s}'"))
    };
    match lower.split_once('-') {
        Some((lo, hi)) => {
            let (lo, hi) = (code(lo)?, code(hi)?);
            if lo > hi {
                return Err(format!("invalid status range '{part}'"));
            }
            Ok((lo, hi))
        }
        None => {
            let c = code(&lower)?;
            Ok((c, c))
        }
    }
}

impl TryFrom<String> for StatusFilter {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StatusFilter> for String {
    fn from(value: StatusFilter) -> Self {
        value.source
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Post-hoc recording filter applied before conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    /// Path glob (`*` within a segment, `**` across segments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Allowed methods (case-insensitive); empty allows all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusFilter>,
}

pub(crate) struct CompiledFilterOptions<'a> {
    path: Option<Glob>,
    methods: &'a [String],
    status: Option<&'a StatusFilter>,
}

impl FilterOptions {
    pub(crate) fn compile(&self) -> Result<CompiledFilterOptions<'_>> {
        let path = self
            .path
            .as_deref()
            .map(|p| {
                Glob::new(p).map_err(|e| Error::Config(format!("invalid path pattern '{p}': {e}")))
            })
            .transpose()?;
        Ok(CompiledFilterOptions {
            path,
            methods: &self.methods,
            status: self.status.as_ref(),
        })
    }
}

impl CompiledFilterOptions<'_> {
    pub(crate) fn matches(&self, recording: &Recording) -> bool {
        let method_ok = self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&recording.request.method));
        let path_ok = self
            .path
            .as_ref()
            .map_or(true, |g| g.is_match(&recording.request.path));
        let status_ok = self
            .status
            .map_or(true, |s| s.matches(recording.response.status_code));
        method_ok && path_ok && status_ok
    }
}

/// Options for converting an arbitrary set of recordings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOptions {
    /// Fold captured request headers into matchers as exact-match constraints
    #[serde(default)]
    pub include_headers: bool,
    /// Replace varying dynamic path segments with named parameters
    #[serde(default = "default_smart_match")]
    pub smart_match: bool,
    #[serde(default)]
    pub duplicates: DuplicateStrategy,
    #[serde(default)]
    pub filter: FilterOptions,
    /// Shortest all-hex path segment treated as an identifier. The segment
    /// must also contain a digit, so all-letter values such as `deadbeef`
    /// stay literal.
    #[serde(default = "default_min_hex_segment_length")]
    pub min_hex_segment_length: usize,
}

fn default_smart_match() -> bool {
    true
}

fn default_min_hex_segment_length() -> usize {
    8
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            include_headers: false,
            smart_match: default_smart_match(),
            duplicates: DuplicateStrategy::default(),
            filter: FilterOptions::default(),
            min_hex_segment_length: default_min_hex_segment_length(),
        }
    }
}

impl ConvertOptions {
    /// Deduplication is on for every strategy except `all`
    pub fn deduplicate(&self) -> bool {
        self.duplicates != DuplicateStrategy::All
    }
}

/// Options for converting a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConvertOptions {
    /// Session name, directory name or `latest`
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(flatten)]
    pub options: ConvertOptions,
}

fn default_session() -> String {
    "latest".to_string()
}

impl Default for SessionConvertOptions {
    fn default() -> Self {
        Self {
            session: default_session(),
            options: ConvertOptions::default(),
        }
    }
}
