//! Virtual camera: push raw frames to a v4l2 loopback device.
//!
//! The device must exist before starting (e.g. `modprobe v4l2loopback
//! video_nr=10`); the engine only opens it.

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::info;

use crate::grabber::{GrabberKind, GrabberSink, SinkStatus};

pub const LOOPBACK_DEFAULT_DEVICE: u32 = 10;

/// Feeds `/dev/video<N>` so the output shows up as a camera in other
/// applications.
pub struct Loopback {
    device_id: u32,
}

impl Loopback {
    pub fn new(device_id: u32) -> Self {
        Self { device_id }
    }

    pub fn available() -> bool {
        gst::ElementFactory::find("v4l2sink").is_some()
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn device_name(&self) -> String {
        format!("/dev/video{}", self.device_id)
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new(LOOPBACK_DEFAULT_DEVICE)
    }
}

impl GrabberSink for Loopback {
    fn kind(&self) -> GrabberKind {
        GrabberKind::Loopback
    }

    fn build(&self, _caps: &gst::Caps) -> Result<String, String> {
        if !Self::available() {
            return Err("Loopback camera: v4l2sink not available".to_owned());
        }
        if !std::path::Path::new(&self.device_name()).exists() {
            return Err(format!(
                "Loopback camera: device {} not found (is v4l2loopback loaded?)",
                self.device_name()
            ));
        }
        Ok("appsrc name=src ! videoconvert ! videoscale \
            ! v4l2sink name=sink sync=false"
            .to_owned())
    }

    fn configure(&self, pipeline: &gst::Pipeline) -> Result<(), String> {
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| "Loopback camera: no sink in pipeline".to_owned())?;
        sink.set_property("device", self.device_name());
        Ok(())
    }

    fn start_message(&self) -> String {
        format!("Loopback camera started on {}", self.device_name())
    }

    fn describe(&self, status: SinkStatus, _extended: bool) -> String {
        if !status.initialized {
            "Loopback starting..".to_owned()
        } else if status.active {
            format!("Loopback to {}", self.device_name())
        } else {
            "Loopback terminated".to_owned()
        }
    }

    fn on_terminate(&self, elapsed: Duration) {
        info!(
            "Loopback camera {} released after {} s",
            self.device_name(),
            elapsed.as_secs()
        );
    }
}
