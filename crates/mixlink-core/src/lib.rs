//! mixlink-core — shared types of the mixlink engine.
//!
//! Everything here is plain data: stream protocols and negotiated
//! configurations, video recording profiles, the well-known ports of the
//! engine, and small helpers shared by every other crate. No sockets, no
//! pipelines, no tasks.

pub mod ports;
pub mod profile;
pub mod protocol;

mod stamp;

pub use profile::{BufferingPreset, FrameratePreset, VideoProfile};
pub use protocol::{StreamConfig, StreamProtocol};
pub use stamp::date_time_string;

use thiserror::Error;

/// Name of the application, used for settings paths and log prefixes.
pub const APP_NAME: &str = "mixlink";

/// Errors produced when decoding values received from a peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown stream protocol id {0}")]
    UnknownProtocol(i32),
    #[error("unknown video profile id {0}")]
    UnknownProfile(i32),
}
