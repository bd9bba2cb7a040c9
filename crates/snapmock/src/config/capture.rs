//! Capture listener and CA configuration.

use crate::recording::CaptureMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Listener port (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: CaptureMode,
    #[serde(default = "default_session_name")]
    pub session_name: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// How long in-flight connections may drain after a stop signal
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Body snapshot cap; longer bodies are truncated and marked
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_session_name() -> String {
    "capture".to_string()
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from(".snapmock/sessions")
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            mode: CaptureMode::default(),
            session_name: default_session_name(),
            sessions_dir: default_sessions_dir(),
            grace_period_secs: default_grace_period_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Root CA location
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaConfig {
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    /// When set, leaf certificates are persisted here and reused across runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_cache_dir: Option<PathBuf>,
}

fn default_cert_path() -> PathBuf {
    PathBuf::from(".snapmock/ca/snapmock-ca.pem")
}

fn default_key_path() -> PathBuf {
    PathBuf::from(".snapmock/ca/snapmock-ca.key")
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            cert_path: default_cert_path(),
            key_path: default_key_path(),
            leaf_cache_dir: None,
        }
    }
}

impl CaConfig {
    /// Cert and key side by side in `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cert_path: dir.join("snapmock-ca.pem"),
            key_path: dir.join("snapmock-ca.key"),
            leaf_cache_dir: None,
        }
    }
}
