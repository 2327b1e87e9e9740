//! # SortOfRemote NG – Protocols
//!
//! Wire-protocol clients: ONC-RPC/NFSv3/MOUNT, SFTP, TDS 5.0 (Sybase),
//! ClickHouse native, libp2p multistream-select, XMPP c2s/s2s, SIPS, SANE,
//! ZooKeeper 4LW and IPFS HTTP.

pub mod clickhouse;
pub mod ipfs_http;
pub mod multistream;
pub mod rpc_nfs;
pub mod sane;
pub mod sftp;
pub mod sips;
pub mod tds;
pub mod xmpp;
pub mod zookeeper;
