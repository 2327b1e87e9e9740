//! Common ingress parameter shape.
//!
//! Mirrors `FtpConnectionConfig`'s pattern of per-field `#[serde(default)]`
//! so a missing optional field never fails deserialization; the common
//! `host`/`port`/`timeoutMs` trio from spec §6 is factored out here and
//! flattened into each protocol's own parameter struct.

use serde::Deserialize;
use sorng_wire::error::GatewayError;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u32 = 15_000;

fn default_timeout_ms() -> u32 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    pub host: String,
    pub port: Option<u16>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
}

impl ConnectionParams {
    /// Resolves `port` against `default_port`, rejecting `0` per spec §6's
    /// `1 <= port <= 65535` rule (a `u16` already rules out values above
    /// 65535, so only the zero case needs an explicit check).
    pub fn port_or(&self, default_port: u16) -> Result<u16, GatewayError> {
        let port = self.port.unwrap_or(default_port);
        if port == 0 {
            return Err(GatewayError::invalid_argument("port must be between 1 and 65535"));
        }
        Ok(port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }
}
