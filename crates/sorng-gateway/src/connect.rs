//! Host/port resolution and dialing, the one piece of plumbing every
//! protocol handler needs before it can hand a [`Transport`] to its
//! `sorng-protocols` module.
//!
//! Grounded in `sorng-ftp::ftp::connection` (`TcpStream::connect` raced
//! against `connect_timeout_sec`) generalized to the async-DNS path every
//! protocol in this gateway shares, since none of the wire protocols
//! resolve their own addresses.

use sorng_wire::{Deadline, GatewayError, GatewayResult, Transport};
use std::net::SocketAddr;
use tokio::net::lookup_host;

pub async fn resolve(host: &str, port: u16, deadline: Deadline) -> GatewayResult<SocketAddr> {
    let target = format!("{host}:{port}");
    let mut addrs = deadline
        .race(async {
            lookup_host(&target)
                .await
                .map_err(|e| GatewayError::network(format!("DNS resolution failed for {target}: {e}")))
        })
        .await?;
    addrs
        .next()
        .ok_or_else(|| GatewayError::network(format!("{target} resolved to no addresses")))
}

pub async fn dial_plain(host: &str, port: u16, deadline: Deadline) -> GatewayResult<Transport> {
    let addr = resolve(host, port, deadline).await?;
    Transport::connect_plain(addr, deadline).await
}

pub async fn dial_tls(
    host: &str,
    port: u16,
    accept_invalid_certs: bool,
    deadline: Deadline,
) -> GatewayResult<Transport> {
    let addr = resolve(host, port, deadline).await?;
    Transport::connect_tls(addr, host, accept_invalid_certs, deadline).await
}
