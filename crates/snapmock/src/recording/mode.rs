//! Capture mode definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether proxied exchanges are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Proxy and persist kept exchanges
    #[default]
    Record,
    /// Proxy only, never persist
    Passthrough,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Record => "record",
            CaptureMode::Passthrough => "passthrough",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            CaptureMode::Record => 0,
            CaptureMode::Passthrough => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureMode::Record,
            _ => CaptureMode::Passthrough,
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "record" => Ok(CaptureMode::Record),
            "passthrough" => Ok(CaptureMode::Passthrough),
            other => Err(format!(
                "unknown capture mode '{other}' (expected 'record' or 'passthrough')"
            )),
        }
    }
}
