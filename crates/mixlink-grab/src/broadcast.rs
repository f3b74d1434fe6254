//! SRT broadcast: low-latency secure publication of the output on a local
//! port, for any number of remote SRT callers.
//!
//! Test receive with:
//! `gst-launch-1.0 srtsrc uri="srt://<host>:51700" ! tsdemux ! decodebin ! videoconvert ! autovideosink`

use std::sync::OnceLock;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::info;

use mixlink_core::ports::BROADCAST_DEFAULT_PORT;

use crate::grabber::{GrabberKind, GrabberSink, SinkStatus};

// ── Availability probing ──────────────────────────────────────────────────────

const SRT_SINKS: &[&str] = &["srtsink", "srtserversink"];

/// H.264 encoders in preference order; hardware first, x264 fallback.
const SRT_ENCODERS: &[(&str, &str)] = &[
    ("nvh264enc", "nvh264enc zerolatency=true rc-mode=cbr-ld-hq bitrate=4000 ! "),
    ("vaapih264enc", "vaapih264enc rate-control=cqp init-qp=26 ! "),
    ("vtenc_h264_hw", "vtenc_h264_hw realtime=1 allow-frame-reordering=0 ! "),
    ("x264enc", "x264enc tune=zerolatency ! "),
];

struct SrtBackend {
    sink: Option<&'static str>,
    encoder: Option<&'static str>,
}

/// Probe the registry once for an SRT sink and an H.264 encoder.
fn backend() -> &'static SrtBackend {
    static PROBED: OnceLock<SrtBackend> = OnceLock::new();
    PROBED.get_or_init(|| {
        let sink = SRT_SINKS
            .iter()
            .copied()
            .find(|name| gst::ElementFactory::find(name).is_some());
        let mut encoder = None;
        if sink.is_some() {
            for (name, fragment) in SRT_ENCODERS {
                if gst::ElementFactory::find(name).is_some() {
                    if *name != "x264enc" {
                        info!("SRT broadcast uses hardware-accelerated encoder ({name})");
                    }
                    encoder = Some(*fragment);
                    break;
                }
            }
        }
        if sink.is_none() {
            info!("SRT broadcast not available.");
        }
        SrtBackend { sink, encoder }
    })
}

// ── SrtBroadcast ──────────────────────────────────────────────────────────────

/// Publishes the output as an MPEG-TS/H.264 SRT listener on `port`.
pub struct SrtBroadcast {
    port: u16,
}

impl SrtBroadcast {
    pub fn new(port: u16) -> Self {
        Self {
            port: if port < 1000 { BROADCAST_DEFAULT_PORT } else { port },
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Broadcast is installed iff both an SRT sink and an H.264 encoder are.
    pub fn available() -> bool {
        let b = backend();
        b.sink.is_some() && b.encoder.is_some()
    }
}

impl Default for SrtBroadcast {
    fn default() -> Self {
        Self::new(BROADCAST_DEFAULT_PORT)
    }
}

impl GrabberSink for SrtBroadcast {
    fn kind(&self) -> GrabberKind {
        GrabberKind::Broadcast
    }

    fn build(&self, _caps: &gst::Caps) -> Result<String, String> {
        let b = backend();
        let (Some(sink), Some(encoder)) = (b.sink, b.encoder) else {
            return Err("SRT broadcast: not available (missing SRT or H264)".to_owned());
        };
        Ok(format!(
            "appsrc name=src ! videoconvert ! {encoder}\
             video/x-h264, profile=high ! queue ! h264parse config-interval=-1 \
             ! mpegtsmux alignment=7 ! {sink} name=sink"
        ))
    }

    fn configure(&self, pipeline: &gst::Pipeline) -> Result<(), String> {
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| "SRT broadcast: no sink in pipeline".to_owned())?;
        sink.set_property("localport", i32::from(self.port));
        sink.set_property("latency", 200i32);
        sink.set_property_from_str("mode", "listener");
        sink.set_property("wait-for-connection", false);
        Ok(())
    }

    fn start_message(&self) -> String {
        format!("SRT broadcast started on port {}", self.port)
    }

    fn describe(&self, status: SinkStatus, extended: bool) -> String {
        if extended {
            return format!("srt://0.0.0.0:{}", self.port);
        }
        if !status.initialized {
            "SRT starting..".to_owned()
        } else if status.active {
            format!("SRT broadcast on port {}", self.port)
        } else {
            "SRT terminated".to_owned()
        }
    }

    fn on_terminate(&self, elapsed: Duration) {
        info!("SRT broadcast terminated after {} s", elapsed.as_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ports_fall_back_to_default() {
        assert_eq!(SrtBroadcast::new(80).port(), BROADCAST_DEFAULT_PORT);
        assert_eq!(SrtBroadcast::new(52000).port(), 52000);
    }
}
