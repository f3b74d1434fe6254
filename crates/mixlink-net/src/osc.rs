//! OSC wire helpers shared by discovery, stream negotiation and the
//! remote-control endpoint.
//!
//! Everything on the network speaks OSC over UDP. A well-formed engine
//! address starts with [`OSC_PREFIX`]; the constants below are the address
//! fragments of the discovery and negotiation protocols (the control-endpoint
//! grammar lives in `mixlink-control`).

use std::fmt::Write as _;

use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};

// ── Addresses ─────────────────────────────────────────────────────────────────

pub const OSC_SEPARATOR: char = '/';
pub const OSC_PREFIX: &str = "/mixlink";

pub const OSC_PING: &str = "/ping";
pub const OSC_PONG: &str = "/pong";

pub const OSC_STREAM_REQUEST: &str = "/request";
pub const OSC_STREAM_OFFER: &str = "/offer";
pub const OSC_STREAM_REJECT: &str = "/reject";
pub const OSC_STREAM_DISCONNECT: &str = "/disconnect";

/// Largest datagram we emit; everything the engine sends fits an MTU.
pub const MAX_DATAGRAM: usize = 1536;

// ── Construction ──────────────────────────────────────────────────────────────

/// Build a single-message packet for `OSC_PREFIX + suffix`.
pub fn message(suffix: &str, args: Vec<OscType>) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: format!("{OSC_PREFIX}{suffix}"),
        args,
    })
}

/// Wrap messages in an immediately-dispatched bundle (reply protocol).
pub fn bundle(content: Vec<OscPacket>) -> OscPacket {
    OscPacket::Bundle(OscBundle {
        timetag: OscTime {
            seconds: 0,
            fractional: 1,
        },
        content,
    })
}

// ── Encode / decode ───────────────────────────────────────────────────────────

pub fn encode(packet: &OscPacket) -> anyhow::Result<Vec<u8>> {
    rosc::encoder::encode(packet)
        .map_err(|e| anyhow::anyhow!("encoding OSC packet: {e:?}"))
}

pub fn decode(buf: &[u8]) -> anyhow::Result<OscPacket> {
    let (_rest, packet) = rosc::decoder::decode_udp(buf)
        .map_err(|e| anyhow::anyhow!("decoding OSC datagram: {e:?}"))?;
    Ok(packet)
}

// ── Argument coercion ─────────────────────────────────────────────────────────

/// Read an argument as a float. `f`, `i`, `d`, `T` and `F` coerce; any other
/// tag is a type mismatch.
pub fn float(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(f) => Some(*f),
        OscType::Double(d) => Some(*d as f32),
        OscType::Int(i) => Some(*i as f32),
        OscType::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn int(arg: &OscType) -> Option<i32> {
    match arg {
        OscType::Int(i) => Some(*i),
        OscType::Long(l) => i32::try_from(*l).ok(),
        _ => None,
    }
}

pub fn string(arg: &OscType) -> Option<&str> {
    match arg {
        OscType::String(s) => Some(s.as_str()),
        _ => None,
    }
}

pub fn boolean(arg: &OscType) -> Option<bool> {
    match arg {
        OscType::Bool(b) => Some(*b),
        OscType::Int(i) => Some(*i != 0),
        _ => None,
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Render a message as `<address> <tags> <values…>` for the log, in the
/// shape remote-control users recognise from their OSC tools.
pub fn pretty(msg: &OscMessage) -> String {
    let mut tags = String::new();
    let mut values = String::new();
    for arg in &msg.args {
        match arg {
            OscType::Bool(b) => tags.push(if *b { 'T' } else { 'F' }),
            OscType::Int(i) => {
                tags.push('i');
                let _ = write!(values, " {i}");
            }
            OscType::Float(f) => {
                tags.push('f');
                let _ = write!(values, " {f:.2}");
            }
            OscType::String(s) => {
                tags.push('s');
                let _ = write!(values, " {s}");
            }
            other => {
                tags.push('?');
                let _ = write!(values, " {other:?}");
            }
        }
    }
    format!("{} {}{}", msg.addr, tags, values)
}
