//! The peer-to-peer streamer grabber: one instance per negotiated stream.

use std::path::PathBuf;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::info;

use mixlink_core::{StreamConfig, StreamProtocol};
use mixlink_grab::{GrabberKind, GrabberSink, SinkStatus};

pub const STREAMING_FPS: u32 = 30;

/// Shared-memory socket path for a stream negotiated on `port`.
pub fn shm_socket_path(port: u16) -> PathBuf {
    std::env::temp_dir().join(format!("mixlink_shm{port}"))
}

/// H.264 senders in preference order; hardware first, x264 fallback.
const H264_STREAM_ENCODERS: &[(&str, &str)] = &[
    ("nvh264enc", "nvh264enc zerolatency=true rc-mode=cbr-ld-hq bitrate=4000"),
    ("vaapih264enc", "vaapih264enc rate-control=cqp init-qp=26"),
    ("x264enc", "x264enc tune=zerolatency"),
];

fn h264_encoder() -> &'static str {
    for (name, fragment) in H264_STREAM_ENCODERS {
        if gst::ElementFactory::find(name).is_some() {
            if *name != "x264enc" {
                info!("Peer stream uses hardware-accelerated encoder ({name})");
            }
            return fragment;
        }
    }
    "x264enc tune=zerolatency"
}

/// Pipeline fragment between `videoconvert` and the sink, per protocol.
fn protocol_fragment(protocol: StreamProtocol) -> String {
    match protocol {
        StreamProtocol::RawUdp => "rtpvrawpay".to_owned(),
        StreamProtocol::JpegUdp => "jpegenc ! rtpjpegpay".to_owned(),
        StreamProtocol::H264Udp => format!("{} ! rtph264pay", h264_encoder()),
        StreamProtocol::ShmLocal => "queue".to_owned(),
    }
}

/// Encodes the output and sends it to a single peer, either as RTP over UDP
/// or through a local shared-memory socket.
pub struct VideoStreamer {
    config: StreamConfig,
}

impl VideoStreamer {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl GrabberSink for VideoStreamer {
    fn kind(&self) -> GrabberKind {
        GrabberKind::P2P
    }

    fn frame_rate(&self) -> u32 {
        STREAMING_FPS
    }

    fn build(&self, caps: &gst::Caps) -> Result<String, String> {
        // the negotiated geometry must match what the fabric stages now
        if let Some(s) = caps.structure(0) {
            let w = s.get::<i32>("width").unwrap_or_default() as u32;
            let h = s.get::<i32>("height").unwrap_or_default() as u32;
            if w != self.config.width || h != self.config.height {
                return Err(format!(
                    "Peer stream cannot start: given frames ({w} x {h}) are \
                     incompatible with stream ({} x {})",
                    self.config.width, self.config.height
                ));
            }
        }
        let sink = match self.config.protocol {
            StreamProtocol::ShmLocal => "shmsink",
            _ => "udpsink",
        };
        Ok(format!(
            "appsrc name=src ! videoconvert ! {} ! {sink} name=sink",
            protocol_fragment(self.config.protocol)
        ))
    }

    fn configure(&self, pipeline: &gst::Pipeline) -> Result<(), String> {
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| "Peer stream: no sink in pipeline".to_owned())?;
        sink.set_property("sync", false);
        match self.config.protocol {
            StreamProtocol::ShmLocal => {
                let path = shm_socket_path(self.config.port);
                sink.set_property("socket-path", path.to_string_lossy().as_ref());
                sink.set_property("wait-for-connection", false);
            }
            _ => {
                sink.set_property("host", self.config.client_ip.as_str());
                sink.set_property("port", i32::from(self.config.port));
            }
        }
        Ok(())
    }

    fn start_message(&self) -> String {
        format!("Streaming to {} started", self.config.client_name)
    }

    fn describe(&self, status: SinkStatus, extended: bool) -> String {
        if extended {
            return protocol_fragment(self.config.protocol);
        }
        if !status.initialized {
            "Connecting".to_owned()
        } else if status.active {
            format!(
                "{} to {}",
                self.config.protocol.label(),
                self.config.client_name
            )
        } else {
            "Streaming terminated.".to_owned()
        }
    }

    fn on_terminate(&self, elapsed: Duration) {
        if self.config.protocol == StreamProtocol::ShmLocal {
            // the socket file must not outlive the stream
            let _ = std::fs::remove_file(shm_socket_path(self.config.port));
        }
        info!(
            "Streaming to {} finished after {} s",
            self.config.client_name,
            elapsed.as_secs()
        );
    }
}
