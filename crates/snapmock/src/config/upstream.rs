//! Upstream client and connection pool configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Skip TLS certificate verification (for self-signed certs in dev/test)
    #[serde(default)]
    pub insecure_skip_verify: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            insecure_skip_verify: false,
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_pool_idle_timeout(),
            max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_connect_timeout() -> u64 {
    10
}
