//! Shared-memory publication of raw frames on a local socket path.
//!
//! Receive with:
//! `gst-launch-1.0 shmsrc socket-path=<path> is-live=true ! video/x-raw, format=RGB, framerate=30/1, width=<W>, height=<H> ! videoconvert ! autovideosink`

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::info;

use crate::grabber::{GrabberKind, GrabberSink, SinkStatus};

/// Sink element used for publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMethod {
    /// Plain gst-plugins-bad `shmsink`; always preferred.
    ShmSink,
    /// `shmdatasink` for shmdata-aware consumers, when installed.
    ShmDataSink,
}

impl ShmMethod {
    fn element(self) -> &'static str {
        match self {
            Self::ShmSink => "shmsink",
            Self::ShmDataSink => "shmdatasink",
        }
    }
}

/// Default socket path: `<tmp>/mixlink_shm0`.
pub fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join("mixlink_shm0")
}

/// Publishes raw frames to a local shared-memory socket.
pub struct ShmBroadcast {
    socket_path: PathBuf,
    method: ShmMethod,
    /// Geometry captured at build time, for the receiver launch-line hint.
    geometry: OnceLock<(u32, u32, String)>,
}

impl ShmBroadcast {
    pub fn new(socket_path: Option<PathBuf>, method: ShmMethod) -> Self {
        // shmdatasink is opt-in and only honoured when installed
        let method = if method == ShmMethod::ShmDataSink
            && gst::ElementFactory::find("shmdatasink").is_some()
        {
            ShmMethod::ShmDataSink
        } else {
            ShmMethod::ShmSink
        };
        Self {
            socket_path: socket_path.unwrap_or_else(default_socket_path),
            method,
            geometry: OnceLock::new(),
        }
    }

    pub fn available() -> bool {
        gst::ElementFactory::find("shmsink").is_some()
            || gst::ElementFactory::find("shmdatasink").is_some()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// gst-launch line a consumer can use to read this publication.
    pub fn receiver_pipeline(&self) -> String {
        let mut line = format!(
            "{} socket-path={}",
            match self.method {
                ShmMethod::ShmSink => "shmsrc",
                ShmMethod::ShmDataSink => "shmdatasrc",
            },
            self.socket_path.display()
        );
        if self.method == ShmMethod::ShmSink {
            line.push_str(" is-live=true");
            if let Some((w, h, format)) = self.geometry.get() {
                line.push_str(&format!(
                    " ! video/x-raw, format={format}, framerate=30/1, width={w}, height={h}"
                ));
            }
        }
        line
    }
}

impl Default for ShmBroadcast {
    fn default() -> Self {
        Self::new(None, ShmMethod::ShmSink)
    }
}

impl GrabberSink for ShmBroadcast {
    fn kind(&self) -> GrabberKind {
        GrabberKind::Shm
    }

    fn build(&self, caps: &gst::Caps) -> Result<String, String> {
        if !Self::available() {
            return Err(
                "Shared memory: not available (missing shmsink or shmdatasink plugin)"
                    .to_owned(),
            );
        }
        if let Some(s) = caps.structure(0) {
            let _ = self.geometry.set((
                s.get::<i32>("width").unwrap_or_default() as u32,
                s.get::<i32>("height").unwrap_or_default() as u32,
                s.get::<&str>("format").unwrap_or("RGB").to_owned(),
            ));
        }
        Ok(format!(
            "appsrc name=src ! queue ! {} name=sink",
            self.method.element()
        ))
    }

    fn configure(&self, pipeline: &gst::Pipeline) -> Result<(), String> {
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| "Shared memory: no sink in pipeline".to_owned())?;
        sink.set_property("socket-path", self.socket_path.to_string_lossy().as_ref());
        sink.set_property("wait-for-connection", false);
        Ok(())
    }

    fn start_message(&self) -> String {
        format!(
            "Shared memory '{}' started on {}",
            self.method.element(),
            self.socket_path.display()
        )
    }

    fn describe(&self, status: SinkStatus, extended: bool) -> String {
        if extended {
            return self.receiver_pipeline();
        }
        if !status.initialized {
            "Shared memory starting..".to_owned()
        } else if status.active {
            format!("Shared memory {}", self.socket_path.display())
        } else {
            "Shared memory terminated".to_owned()
        }
    }

    fn on_terminate(&self, elapsed: Duration) {
        // the socket file must not outlive the publisher
        let _ = std::fs::remove_file(&self.socket_path);
        info!("Shared memory terminated after {} s", elapsed.as_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_hint_names_the_socket() {
        let shm = ShmBroadcast {
            socket_path: PathBuf::from("/tmp/mixlink_shm0"),
            method: ShmMethod::ShmSink,
            geometry: OnceLock::new(),
        };
        shm.geometry.set((640, 360, "RGB".to_owned())).unwrap();
        let hint = shm.receiver_pipeline();
        assert!(hint.starts_with("shmsrc socket-path=/tmp/mixlink_shm0"));
        assert!(hint.contains("width=640"));
        assert!(hint.contains("format=RGB"));
    }
}
