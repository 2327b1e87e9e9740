//! Deadline & Timeout Primitive (spec §4.3).
//!
//! Races an arbitrary future against an absolute deadline and collapses
//! every possible timeout shape (connect timeout, per-operation timeout,
//! idle timeout) into a single [`ErrorKind::Timeout`] failure. Built on
//! `tokio::time::timeout` the same way `sorng-ftp::connect` races its
//! `TcpStream::connect` against `connect_timeout_sec`.

use crate::error::{GatewayError, GatewayResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Runs `fut` to completion unless `deadline` passes first, in which case
/// the future is dropped (and with it, guaranteed cancellation of any
/// timer or I/O registration it held) and a single `Timeout` error is
/// returned.
pub async fn race<F, T>(fut: F, deadline: Instant) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    let now = Instant::now();
    let remaining = deadline.saturating_duration_since(now);
    if remaining.is_zero() {
        return Err(GatewayError::timeout(
            "deadline already elapsed before the operation started",
        ));
    }
    match tokio::time::timeout(remaining, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(GatewayError::timeout(format!(
            "operation did not complete within {remaining:?}"
        ))),
    }
}

/// Convenience form for the common case of a relative timeout measured
/// from "now".
pub async fn race_for<F, T>(fut: F, timeout: Duration) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    race(fut, Instant::now() + timeout).await
}

/// Tracks a single absolute deadline across a multi-step operation (e.g.
/// connect, then handshake, then first request) so each step races against
/// the time remaining rather than being individually re-timed out.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }

    pub async fn race<F, T>(&self, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        race(fut, self.at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_deadline_returns_value() {
        let d = Deadline::after(Duration::from_millis(200));
        let got = d.race(async { Ok::<_, GatewayError>(42) }).await.unwrap();
        assert_eq!(got, 42);
    }

    #[tokio::test]
    async fn exceeding_deadline_yields_single_timeout_kind() {
        let d = Deadline::after(Duration::from_millis(10));
        let err = d
            .race(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, GatewayError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn inner_error_propagates_when_it_wins_the_race() {
        let d = Deadline::after(Duration::from_millis(200));
        let err = d
            .race(async { Err::<(), _>(GatewayError::protocol_error("bad frame")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn already_elapsed_deadline_fails_fast() {
        let d = Deadline::after(Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let err = d.race(async { Ok::<_, GatewayError>(()) }).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn race_for_relative_timeout_behaves_like_deadline() {
        let err = race_for(
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, GatewayError>(())
            },
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Timeout);
    }
}
