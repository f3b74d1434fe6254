//! Well-known ports and limits of the mixlink network surface.
//!
//! | Port | Use |
//! |------|-----|
//! | `HANDSHAKE_PORT`      | Peer discovery ping/pong |
//! | `STREAM_REQUEST_PORT` | Peer-to-peer stream negotiation |
//! | `CONTROL_RECEIVE_PORT`| Inbound remote-control messages |
//! | `CONTROL_SEND_PORT`   | Outbound control replies (on the sender's host) |
//! | `BROADCAST_DEFAULT_PORT` | SRT broadcast listener |

pub const HANDSHAKE_PORT: u16 = 51310;
pub const STREAM_REQUEST_PORT: u16 = 51510;
pub const CONTROL_RECEIVE_PORT: u16 = 51000;
pub const CONTROL_SEND_PORT: u16 = 51001;
pub const BROADCAST_DEFAULT_PORT: u16 = 51700;

/// Maximum number of peers tracked by the connection registry.
pub const MAX_PEERS: usize = 20;

/// Initial time-to-live of a discovered peer, in handshake sweeps.
pub const PEER_TTL: u32 = 3;

/// Interval between two handshake sweeps.
pub const HANDSHAKE_SWEEP_SECS: u64 = 2;
