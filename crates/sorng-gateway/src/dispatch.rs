//! Handler adapter (spec C9): routes a validated `(protocol, operation,
//! parameters)` tuple to the matching protocol module and wraps whatever
//! it returns in a [`ResultEnvelope`].
//!
//! The ingress layer that produces this tuple (an HTTP front door, field
//! validation, a CDN pre-flight check) is explicitly out of scope (spec
//! §1) — this is the seam the collaborator hands off to.

use serde_json::Value;
use sorng_core::envelope::ResultEnvelope;
use sorng_wire::error::GatewayError;
use std::time::Instant;

use crate::handlers;

pub async fn handle_operation(protocol: &str, operation: &str, params: Value) -> ResultEnvelope {
    let started = Instant::now();
    let result = dispatch(protocol, operation, params).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    ResultEnvelope::from_result(protocol, operation, latency_ms, result)
}

async fn dispatch(protocol: &str, operation: &str, params: Value) -> Result<Value, GatewayError> {
    match protocol {
        "nfs" => handlers::nfs::handle(operation, params).await,
        "sftp" => handlers::sftp::handle(operation, params).await,
        "tds" => handlers::tds::handle(operation, params).await,
        "clickhouse" => handlers::clickhouse::handle(operation, params).await,
        "xmpp" => handlers::xmpp::handle(operation, params).await,
        "sips" => handlers::sips::handle(operation, params).await,
        "sane" => handlers::sane::handle(operation, params).await,
        "zookeeper" => handlers::zookeeper::handle(operation, params).await,
        "multistream" => handlers::multistream::handle(operation, params).await,
        "ipfs" => handlers::ipfs::handle(operation, params).await,
        other => Err(GatewayError::invalid_argument(format!("unknown protocol `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_protocol_is_invalid_argument() {
        let env = handle_operation("carrier-pigeon", "send", json!({})).await;
        assert!(!env.success);
        assert_eq!(env.error.unwrap().kind, sorng_wire::error::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn missing_host_field_fails_before_any_dial() {
        // `host` is a required field, so this never reaches the network.
        let params = json!({ "port": 2049 });
        let env = handle_operation("nfs", "mount", params).await;
        assert!(!env.success);
        assert_eq!(env.error.unwrap().kind, sorng_wire::error::ErrorKind::InvalidArgument);
    }
}
