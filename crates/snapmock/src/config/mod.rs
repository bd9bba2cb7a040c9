//! Configuration types for snapmock.
//!
//! Everything has a default, so an empty YAML document is a valid config.
//! The CLI layers its flags on top of whatever the file provides.

mod capture;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{CaConfig, CaptureConfig};
pub use upstream::UpstreamConfig;

use crate::filter::FilterConfig;
use crate::scanner::ScannerConfig;

/// Upper bound for `capture.gracePeriodSecs`
pub const MAX_GRACE_PERIOD_SECS: u64 = 3600;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub ca: CaConfig,
    /// Capture-time host/path filter
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        // An empty document deserializes as unit, not as an empty mapping
        let config: Config = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.capture.session_name.trim().is_empty() {
            anyhow::bail!("capture.sessionName must not be empty");
        }

        if self.capture.grace_period_secs > MAX_GRACE_PERIOD_SECS {
            anyhow::bail!(
                "capture.gracePeriodSecs is {}s; the maximum is {}s",
                self.capture.grace_period_secs,
                MAX_GRACE_PERIOD_SECS
            );
        }

        if self.capture.max_body_bytes == 0 {
            anyhow::bail!("capture.maxBodyBytes must be greater than zero");
        }

        // Surfaces malformed glob patterns before the listener starts
        self.filter.compile()?;

        if self.scanner.min_api_key_length == 0 || self.scanner.min_hex_length == 0 {
            anyhow::bail!("scanner length thresholds must be greater than zero");
        }

        Ok(())
    }
}
