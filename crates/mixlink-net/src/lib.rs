//! mixlink-net — network plumbing of the mixlink engine.
//!
//! Three building blocks:
//!
//! - [`endpoint`] — pure functions over OS state: canonical host name, local
//!   interface addresses, closest-address matching.
//! - [`connection`] — the peer registry: a prober broadcasting ping on the
//!   handshake port and a listener answering pong, with TTL-based eviction.
//! - [`osc`] — the OSC wire helpers shared by discovery, stream negotiation
//!   and the remote-control endpoint.

pub mod connection;
pub mod endpoint;
pub mod osc;

pub use connection::{ConnectionRegistry, Endpoint};
