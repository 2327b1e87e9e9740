//! Shared wire-level primitives reused by every protocol module in
//! `sorng-protocols`: byte codecs, frame buffering, deadlines, transport
//! (TCP/TLS/STARTTLS), request/reply correlation, and the small set of
//! crypto helpers these protocols actually need.

pub mod codec;
pub mod crypto;
pub mod deadline;
pub mod error;
pub mod framed;
pub mod rpc;
pub mod transport;

pub use deadline::Deadline;
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use framed::{Frame, FramedReader};
pub use rpc::{Correlation, IdPolicy, RpcEngine};
pub use transport::Transport;
