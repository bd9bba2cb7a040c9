//! Capture-time host/path filtering.
//!
//! Decides whether a proxied exchange is persisted. Exclusion always wins;
//! an empty include list for a dimension accepts everything not excluded.

mod glob;

pub use glob::Glob;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Include/exclude glob patterns for hosts and paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_paths: Vec<String>,
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.include_hosts.is_empty()
            && self.exclude_hosts.is_empty()
            && self.include_paths.is_empty()
            && self.exclude_paths.is_empty()
    }

    pub fn compile(&self) -> Result<CompiledFilter> {
        CompiledFilter::compile(self)
    }
}

/// Compiled form of [`FilterConfig`], cheap to evaluate per request.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    include_hosts: Vec<Glob>,
    exclude_hosts: Vec<Glob>,
    include_paths: Vec<Glob>,
    exclude_paths: Vec<Glob>,
}

impl CompiledFilter {
    pub fn compile(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            include_hosts: compile_all(&config.include_hosts)?,
            exclude_hosts: compile_all(&config.exclude_hosts)?,
            include_paths: compile_all(&config.include_paths)?,
            exclude_paths: compile_all(&config.exclude_paths)?,
        })
    }

    /// Returns true when the exchange should be recorded.
    ///
    /// `host` is matched without its port.
    pub fn keep(&self, host: &str, path: &str) -> bool {
        let host = strip_port(host);

        if any_match(&self.exclude_hosts, host) || any_match(&self.exclude_paths, path) {
            return false;
        }

        let host_ok = self.include_hosts.is_empty() || any_match(&self.include_hosts, host);
        let path_ok = self.include_paths.is_empty() || any_match(&self.include_paths, path);
        host_ok && path_ok
    }
}

/// One-shot form of [`CompiledFilter::keep`].
pub fn keep(host: &str, path: &str, filter: &CompiledFilter) -> bool {
    filter.keep(host, path)
}

fn compile_all(patterns: &[String]) -> Result<Vec<Glob>> {
    patterns
        .iter()
        .map(|p| {
            Glob::new(p).map_err(|e| Error::Config(format!("invalid glob pattern '{p}': {e}")))
        })
        .collect()
}

fn any_match(globs: &[Glob], candidate: &str) -> bool {
    globs.iter().any(|g| g.is_match(candidate))
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literal, e.g. [::1]:8443
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) && !name.contains(':') => {
            name
        }
        _ => host,
    }
}
