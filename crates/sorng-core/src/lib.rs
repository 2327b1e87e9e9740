//! # Shared types and diagnostics infrastructure
//!
//! Types that are common to every protocol module and to the gateway's
//! dispatch layer live here so that neither the wire codecs
//! (`sorng-wire`) nor the protocol clients (`sorng-protocols`) need to
//! depend on each other just to agree on a response shape.

pub mod diagnostics;
pub mod envelope;
