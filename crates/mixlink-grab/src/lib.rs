//! mixlink-grab — distribution of the rendered output to its consumers.
//!
//! One frame is produced per render tick; this crate stages it once and
//! fans it out to any number of *grabbers*, each feeding an independent
//! GStreamer sink pipeline:
//!
//! ```text
//! render tick ──► GrabFabric (staging ring, 2 pinned buffers)
//!                     │ add_frame(buffer, caps)
//!        ┌────────────┼──────────────┬─────────────┬──────────┐
//!        ▼            ▼              ▼             ▼          ▼
//!   PngRecorder  VideoRecorder  SrtBroadcast  ShmBroadcast  Loopback
//!   (+ the peer streamers registered by mixlink-stream)
//! ```
//!
//! Every grabber follows the same lifecycle contract ([`grabber`]): lazy
//! asynchronous init on the first frame, per-grabber advisory back-pressure,
//! idempotent asynchronous stop and collection by the fabric once finished.
//!
//! The audio capture [`DeviceMonitor`](audio::DeviceMonitor) also lives here:
//! the video recorder consumes its device launch lines for mixed-in audio.

pub mod audio;
pub mod broadcast;
pub mod fabric;
pub mod grabber;
pub mod loopback;
pub mod outputs;
pub mod record;
pub mod shm;

pub use fabric::{GrabFabric, OutputFrame};
pub use grabber::{FrameGrabber, GrabberId, GrabberKind, GrabberSink, SinkStatus};
pub use outputs::Outputs;
