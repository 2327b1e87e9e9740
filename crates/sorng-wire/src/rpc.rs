//! RPC/Transaction Engine (spec §4.5): request-id generation and
//! request/reply correlation shared by every protocol that pairs a sent
//! frame with an asynchronous reply keyed by an id (ONC-RPC's XID, SFTP's
//! `request_id`, TDS's implicit single-outstanding stream).
//!
//! Grounded in the XID field handling of the ONC-RPC message format
//! (`CallBody`/`ReplyBody` keyed by a 32-bit `xid`) and in `sorng-ftp`'s
//! single-outstanding-command discipline (`FtpCodec::execute` never sends
//! a second command before the first's reply is read).

use crate::error::{GatewayError, GatewayResult};
use rand::RngCore;
use std::sync::atomic::{AtomicU32, Ordering};

/// How request ids are generated for a given protocol.
#[derive(Debug, Clone, Copy)]
pub enum IdPolicy {
    /// A monotonically increasing counter (SFTP `request_id`, ZooKeeper
    /// style xid-per-command).
    Monotonic,
    /// A freshly randomized id per request (ONC-RPC `xid`, where a
    /// predictable counter would weaken the correlation guarantee across
    /// restarted clients sharing a NAT'd source port).
    Cryptographic,
}

/// Generates request ids per [`IdPolicy`] and enforces the single
/// in-flight request discipline most of these protocols assume: no
/// protocol module here pipelines requests, so a second `begin` before the
/// first's matching reply is an internal misuse, not a wire condition.
pub struct RpcEngine {
    policy: IdPolicy,
    counter: AtomicU32,
    outstanding: AtomicU32,
}

const NONE_OUTSTANDING: u32 = u32::MAX;

impl RpcEngine {
    pub fn new(policy: IdPolicy) -> Self {
        Self {
            policy,
            counter: AtomicU32::new(1),
            outstanding: AtomicU32::new(NONE_OUTSTANDING),
        }
    }

    fn generate_id(&self) -> u32 {
        match self.policy {
            IdPolicy::Monotonic => self.counter.fetch_add(1, Ordering::SeqCst),
            IdPolicy::Cryptographic => {
                let mut id = rand::thread_rng().next_u32();
                if id == NONE_OUTSTANDING {
                    id = id.wrapping_sub(1);
                }
                id
            }
        }
    }

    /// Begin a request: allocates an id and records it as the single
    /// outstanding request. Fails if a prior request's id was never
    /// resolved via [`RpcEngine::complete`].
    pub fn begin(&self) -> GatewayResult<u32> {
        let id = self.generate_id();
        match self
            .outstanding
            .compare_exchange(NONE_OUTSTANDING, id, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(id),
            Err(_) => Err(GatewayError::protocol_error(
                "a request is already outstanding on this connection",
            )),
        }
    }

    /// Clears the outstanding marker once a reply has been matched (or the
    /// connection is being torn down).
    pub fn complete(&self, id: u32) {
        self.outstanding
            .compare_exchange(id, NONE_OUTSTANDING, Ordering::SeqCst, Ordering::SeqCst)
            .ok();
    }

    /// Correlates a received reply id against the id a request was begun
    /// with.
    ///
    /// `strict` protocols (ONC-RPC, where the XID is the only correlation
    /// mechanism a conforming server will ever violate by accident) treat
    /// any mismatch as a `ProtocolError`. Non-strict protocols (SFTP,
    /// where some servers echo an unrelated housekeeping frame) simply
    /// report the mismatch so the caller can decide to skip and read
    /// again.
    pub fn correlate(expected: u32, received: u32, strict: bool) -> GatewayResult<Correlation> {
        if expected == received {
            Ok(Correlation::Matched)
        } else if strict {
            Err(GatewayError::protocol_error(format!(
                "reply id {received} does not match outstanding request id {expected}"
            )))
        } else {
            Ok(Correlation::Skip)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    Matched,
    /// The reply's id didn't match; caller should discard it and read the
    /// next frame without failing the whole operation.
    Skip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ids_increase() {
        let engine = RpcEngine::new(IdPolicy::Monotonic);
        let a = engine.begin().unwrap();
        engine.complete(a);
        let b = engine.begin().unwrap();
        assert!(b > a);
    }

    #[test]
    fn second_begin_without_complete_is_protocol_error() {
        let engine = RpcEngine::new(IdPolicy::Monotonic);
        let _a = engine.begin().unwrap();
        let err = engine.begin().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
    }

    #[test]
    fn complete_then_begin_succeeds() {
        let engine = RpcEngine::new(IdPolicy::Cryptographic);
        let a = engine.begin().unwrap();
        engine.complete(a);
        let _b = engine.begin().unwrap();
    }

    #[test]
    fn strict_correlation_rejects_mismatch() {
        let err = RpcEngine::correlate(5, 6, true).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
    }

    #[test]
    fn lenient_correlation_reports_skip() {
        let c = RpcEngine::correlate(5, 6, false).unwrap();
        assert_eq!(c, Correlation::Skip);
    }

    #[test]
    fn matching_id_is_matched_under_either_policy() {
        assert_eq!(RpcEngine::correlate(9, 9, true).unwrap(), Correlation::Matched);
        assert_eq!(RpcEngine::correlate(9, 9, false).unwrap(), Correlation::Matched);
    }
}
