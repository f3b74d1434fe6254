//! mixlink-stream — peer-to-peer streaming of the rendered output.
//!
//! The [`Streaming`] manager answers stream requests on the well-known
//! request port and keeps the registry of live streams; each negotiated
//! stream is a [`VideoStreamer`] grabber registered with the grab fabric.
//!
//! Test a running engine from another host:
//!
//! ```text
//! oscsend <host> 51510 /mixlink/request is 9000 "probe"
//! oscdump -L 9000   # prints /mixlink/offer <port> <protocol> <w> <h>
//! gst-launch-1.0 udpsrc port=<port> \
//!     caps="application/x-rtp,media=(string)video,encoding-name=(string)JPEG" \
//!     ! rtpjpegdepay ! queue ! decodebin ! videoconvert ! autovideosink
//! ```

mod manager;
mod streamer;

pub use manager::{StreamHandle, Streaming};
pub use streamer::VideoStreamer;
