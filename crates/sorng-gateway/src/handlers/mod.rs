//! One module per protocol, each exposing `handle(operation, params) ->
//! GatewayResult<Value>` — the per-protocol half of the handler adapter
//! (spec's C9). [`crate::dispatch`] picks the module by the `protocol`
//! field of the ingress tuple.

pub mod clickhouse;
pub mod ipfs;
pub mod multistream;
pub mod nfs;
pub mod sane;
pub mod sftp;
pub mod sips;
pub mod tds;
pub mod xmpp;
pub mod zookeeper;
