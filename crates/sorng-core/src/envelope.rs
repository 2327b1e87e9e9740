//! Result Envelope: the one response shape every operation returns.
//!
//! Generalizes `FtpDiagnostics`'s `latency_ms: Option<u64>` field and
//! `FtpError`'s `{kind, message, code}` triple into a single envelope that
//! wraps either a success payload or a [`sorng_wire::GatewayError`], so the
//! handler adapter never has to hand back two different shapes depending on
//! whether the operation succeeded.

use serde::{Deserialize, Serialize};
use sorng_wire::error::{ErrorKind, GatewayError};

/// The error half of a [`ResultEnvelope`], present only when `success` is
/// `false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeError {
    pub kind: ErrorKind,
    pub message: String,
    pub protocol_code: Option<String>,
}

impl From<GatewayError> for EnvelopeError {
    fn from(e: GatewayError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
            protocol_code: e.protocol_code,
        }
    }
}

/// Uniform response record returned by every gateway operation.
///
/// `payload` and `error` are mutually exclusive: exactly one is `Some`,
/// matching `success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub success: bool,
    pub protocol: String,
    pub operation: String,
    pub latency_ms: u64,
    pub payload: Option<serde_json::Value>,
    pub error: Option<EnvelopeError>,
}

impl ResultEnvelope {
    pub fn success(
        protocol: impl Into<String>,
        operation: impl Into<String>,
        latency_ms: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            success: true,
            protocol: protocol.into(),
            operation: operation.into(),
            latency_ms,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(
        protocol: impl Into<String>,
        operation: impl Into<String>,
        latency_ms: u64,
        error: GatewayError,
    ) -> Self {
        Self {
            success: false,
            protocol: protocol.into(),
            operation: operation.into(),
            latency_ms,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Builds the envelope from a `GatewayResult`, measuring neither side —
    /// the caller supplies the already-measured latency.
    pub fn from_result(
        protocol: impl Into<String>,
        operation: impl Into<String>,
        latency_ms: u64,
        result: Result<serde_json::Value, GatewayError>,
    ) -> Self {
        let protocol = protocol.into();
        let operation = operation.into();
        match result {
            Ok(payload) => Self::success(protocol, operation, latency_ms, payload),
            Err(e) => Self::failure(protocol, operation, latency_ms, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_serializes_with_null_error() {
        let env = ResultEnvelope::success("nfs", "mount", 42, json!({"fileHandle": "0a0b"}));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], json!(true));
        assert_eq!(v["error"], serde_json::Value::Null);
        assert_eq!(v["payload"]["fileHandle"], json!("0a0b"));
    }

    #[test]
    fn failure_serializes_with_null_payload() {
        let err = GatewayError::not_found("no such file").with_code("NFS3ERR_NOENT");
        let env = ResultEnvelope::failure("nfs", "lookup", 7, err);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], json!(false));
        assert_eq!(v["payload"], serde_json::Value::Null);
        assert_eq!(v["error"]["kind"], json!("notFound"));
        assert_eq!(v["error"]["protocolCode"], json!("NFS3ERR_NOENT"));
    }

    #[test]
    fn from_result_dispatches_on_ok_err() {
        let ok: Result<serde_json::Value, GatewayError> = Ok(json!(1));
        let env = ResultEnvelope::from_result("zookeeper", "ruok", 1, ok);
        assert!(env.success);

        let bad: Result<serde_json::Value, GatewayError> = Err(GatewayError::timeout("slow"));
        let env = ResultEnvelope::from_result("zookeeper", "ruok", 20000, bad);
        assert!(!env.success);
        assert_eq!(env.error.unwrap().kind, ErrorKind::Timeout);
    }
}
