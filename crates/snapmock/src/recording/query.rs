//! Recording queries with pagination.

use super::types::Recording;
use crate::error::{Error, Result};
use crate::filter::Glob;
use serde::{Deserialize, Serialize};

/// Selects recordings within a session.
///
/// `path` is a glob (`*` within a segment, `**` across segments).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFilter {
    /// Session name, directory name, or `latest` (the default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// One page of results plus the total number of matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingPage {
    pub items: Vec<Recording>,
    pub total: usize,
}

pub(crate) struct RecordingMatcher<'a> {
    method: Option<&'a str>,
    host: Option<&'a str>,
    path: Option<Glob>,
}

impl RecordingFilter {
    pub(crate) fn compile(&self) -> Result<RecordingMatcher<'_>> {
        let path = self
            .path
            .as_deref()
            .map(|p| {
                Glob::new(p).map_err(|e| Error::Config(format!("invalid path pattern '{p}': {e}")))
            })
            .transpose()?;
        Ok(RecordingMatcher {
            method: self.method.as_deref(),
            host: self.host.as_deref(),
            path,
        })
    }
}

impl RecordingMatcher<'_> {
    pub(crate) fn matches(&self, recording: &Recording) -> bool {
        let req = &recording.request;
        self.method.map_or(true, |m| req.method.eq_ignore_ascii_case(m))
            && self.host.map_or(true, |h| req.host.eq_ignore_ascii_case(h))
            && self.path.as_ref().map_or(true, |g| g.is_match(&req.path))
    }
}
