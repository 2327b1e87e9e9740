//! # SortOfRemote NG Probe Gateway
//!
//! A multi-protocol probe and remote-operation core: each protocol is
//! handled by a dedicated module in [`sorng_protocols`], dispatched
//! through the handler adapter in [`sorng_gateway`], and returned as a
//! uniform [`sorng_core::envelope::ResultEnvelope`].
//!
//! ## Modules
//!
//! - **wire** ([`sorng_wire`]): byte codecs, framing, deadlines, the
//!   transport layer, RPC correlation, and the crypto helpers every
//!   protocol module builds on.
//! - **protocols** ([`sorng_protocols`]): ONC-RPC/NFSv3/MOUNT, SFTP, TDS
//!   5.0, ClickHouse native, libp2p multistream-select, XMPP, SIPS, SANE,
//!   ZooKeeper 4LW, and IPFS HTTP.
//! - **gateway** ([`sorng_gateway`]): the handler adapter that turns a
//!   validated `(protocol, operation, parameters)` tuple into a protocol
//!   call and a Result Envelope.

pub use sorng_core as core;
pub use sorng_gateway as gateway;
pub use sorng_protocols as protocols;
pub use sorng_wire as wire;

pub use sorng_gateway::handle_operation;
