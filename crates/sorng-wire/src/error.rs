//! Crate-wide error taxonomy shared by every protocol module.
//!
//! Generalizes the per-protocol error type pattern (e.g. `FtpError` /
//! `FtpErrorKind`) to the closed, protocol-agnostic taxonomy every module
//! in this gateway maps its own wire-level faults into.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of error kinds a protocol operation can fail with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Caller supplied a value the core rejects (bad port, oversized handle, malformed base64).
    InvalidArgument,
    /// The deadline fired before the operation completed.
    Timeout,
    /// TCP/TLS connect failure, mid-stream EOF, TLS handshake failure.
    Network,
    /// The peer's bytes violated the wire format.
    ProtocolError,
    /// The peer demanded credentials and none (or none sufficient) were supplied.
    AuthRequired,
    /// Credentials were rejected.
    AuthFailed,
    /// Authorization failed (permission denied on the server).
    Denied,
    /// Resource absent.
    NotFound,
    /// Write failed because the target already exists.
    Conflict,
    /// Write failed because the target is read-only.
    ReadOnly,
    /// Peer returned a typed error code not individually mapped.
    Remote,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A single gateway-level error, attached to the operation's [`ErrorKind`].
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}{}] {message}", protocol_code.map(|c| format!(" code={c}")).unwrap_or_default())]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    /// The protocol's own numeric/string error code, when the peer supplied one.
    pub protocol_code: Option<String>,
    pub session_id: Option<String>,
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            protocol_code: None,
            session_id: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.protocol_code = Some(code.into());
        self
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, msg)
    }

    pub fn auth_required(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRequired, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailed, msg)
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Denied, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn read_only(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReadOnly, msg)
    }

    pub fn remote(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Remote, msg).with_code(code)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {e}"))
        } else {
            Self::network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_when_present() {
        let e = GatewayError::remote("NFS3ERR_NOENT", "no such file");
        let s = e.to_string();
        assert!(s.contains("Remote"));
        assert!(s.contains("NFS3ERR_NOENT"));
    }

    #[test]
    fn display_without_code() {
        let e = GatewayError::timeout("deadline exceeded");
        let s = e.to_string();
        assert!(s.contains("Timeout"));
        assert!(!s.contains("code="));
    }

    #[test]
    fn io_timeout_maps_to_timeout_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "x");
        let e: GatewayError = io.into();
        assert_eq!(e.kind, ErrorKind::Timeout);
    }

    #[test]
    fn io_other_maps_to_network_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "x");
        let e: GatewayError = io.into();
        assert_eq!(e.kind, ErrorKind::Network);
    }

    #[test]
    fn serde_roundtrip_camel_case() {
        let e = GatewayError::new(ErrorKind::AuthFailed, "bad password").with_session("s1");
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"authFailed\""));
        let back: GatewayError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ErrorKind::AuthFailed);
        assert_eq!(back.session_id.as_deref(), Some("s1"));
    }
}
