//! Configuration types for the chain gateway

use serde::Deserialize;
use std::time::Duration;

use crate::domain::confirmation::ConfirmationPolicy;

/// Chain RPC configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// JSON-RPC endpoint of a sharder/miner proxy
    pub endpoint: String,

    /// Per-request deadline in milliseconds
    pub request_timeout_ms: u64,

    /// TCP connect deadline in milliseconds
    pub connect_timeout_ms: u64,

    /// Confirmation polling shared by every on-chain routine
    pub confirmation: ConfirmationPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7171/rpc".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 2_000,
            confirmation: ConfirmationPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
