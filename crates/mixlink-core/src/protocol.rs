//! Stream protocols and the configuration negotiated per peer stream.

use serde::{Deserialize, Serialize};

use crate::Error;

// ── StreamProtocol ────────────────────────────────────────────────────────────

/// Transport + encoding used for one peer-to-peer stream.
///
/// The numeric values are part of the negotiation wire format (`/offer`
/// carries the protocol as an int32) and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamProtocol {
    /// Uncompressed RTP over UDP. Bandwidth-hungry, zero decode cost.
    RawUdp = 0,
    /// Motion-JPEG RTP over UDP. The general-purpose default.
    JpegUdp = 1,
    /// H.264 RTP over UDP, for low-bandwidth links.
    H264Udp = 2,
    /// Raw frames over a local shared-memory socket. Localhost only.
    ShmLocal = 3,
}

impl StreamProtocol {
    pub fn label(self) -> &'static str {
        match self {
            Self::RawUdp => "RAW video",
            Self::JpegUdp => "JPEG video",
            Self::H264Udp => "H264 video",
            Self::ShmLocal => "Shared memory",
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for StreamProtocol {
    type Error = Error;

    fn try_from(v: i32) -> Result<Self, Error> {
        match v {
            0 => Ok(Self::RawUdp),
            1 => Ok(Self::JpegUdp),
            2 => Ok(Self::H264Udp),
            3 => Ok(Self::ShmLocal),
            other => Err(Error::UnknownProtocol(other)),
        }
    }
}

// ── StreamConfig ──────────────────────────────────────────────────────────────

/// Configuration of one negotiated peer stream. Immutable after negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub protocol:    StreamProtocol,
    pub client_name: String,
    pub client_ip:   String,
    pub port:        u16,
    pub width:       u32,
    pub height:      u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            protocol:    StreamProtocol::JpegUdp,
            client_name: String::new(),
            client_ip:   "127.0.0.1".to_owned(),
            port:        0,
            width:       0,
            height:      0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_ids_round_trip() {
        for p in [
            StreamProtocol::RawUdp,
            StreamProtocol::JpegUdp,
            StreamProtocol::H264Udp,
            StreamProtocol::ShmLocal,
        ] {
            assert_eq!(StreamProtocol::try_from(p.as_i32()), Ok(p));
        }
        assert_eq!(
            StreamProtocol::try_from(7),
            Err(crate::Error::UnknownProtocol(7))
        );
    }
}
