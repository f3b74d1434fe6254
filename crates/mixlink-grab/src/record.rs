//! File recorders: single-shot PNG capture and the video recorder.
//!
//! Both write time-stamped files under a configured directory:
//! `<base>_<YYYYMMDDhhmmssmmm>.png` / `.<ext>` where the extension follows
//! the selected profile's container.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::info;

use mixlink_core::{date_time_string, BufferingPreset, VideoProfile};

use crate::grabber::{GrabberKind, GrabberSink, SinkStatus};

// ── Encoder selection ─────────────────────────────────────────────────────────

/// Pick the first available element of `candidates`, returning its pipeline
/// fragment. The last entry is the software fallback and is returned even
/// when probing finds nothing (parse will then report the real error).
fn select_encoder(candidates: &[(&str, &'static str)]) -> &'static str {
    for (name, fragment) in candidates {
        if gst::ElementFactory::find(name).is_some() {
            info!("Encoder selected: {}", name);
            return fragment;
        }
    }
    candidates.last().map(|(_, f)| *f).unwrap_or_default()
}

/// H.264 realtime encoders, best first.
const H264_ENCODERS: &[(&str, &str)] = &[
    (
        "nvh264enc",
        "nvh264enc zerolatency=true rc-mode=cbr bitrate=8000 ! video/x-h264, profile=high",
    ),
    (
        "vaapih264enc",
        "vaapih264enc rate-control=cqp init-qp=26 ! video/x-h264, profile=high",
    ),
    (
        "x264enc",
        "x264enc tune=zerolatency speed-preset=superfast key-int-max=60 ! video/x-h264, profile=high",
    ),
];

/// H.265 realtime encoders, best first.
const H265_ENCODERS: &[(&str, &str)] = &[
    ("nvh265enc", "nvh265enc zerolatency=true rc-mode=cbr bitrate=8000"),
    ("vaapih265enc", "vaapih265enc rate-control=cqp init-qp=26"),
    ("x265enc", "x265enc tune=zerolatency speed-preset=superfast"),
];

/// Encoder + muxer fragment for a profile. The muxer is always `name=mux`
/// so an audio branch can attach to it.
fn profile_fragment(profile: VideoProfile) -> String {
    match profile {
        VideoProfile::H264Standard => format!(
            "{} ! h264parse ! queue ! qtmux name=mux",
            select_encoder(H264_ENCODERS)
        ),
        VideoProfile::H264Hq => {
            "x264enc pass=qual quantizer=18 speed-preset=faster key-int-max=60 \
             ! video/x-h264, profile=high ! h264parse ! queue ! qtmux name=mux"
                .to_owned()
        }
        VideoProfile::H265Realtime => format!(
            "{} ! h265parse ! queue ! qtmux name=mux",
            select_encoder(H265_ENCODERS)
        ),
        VideoProfile::H265Animation => {
            "x265enc tune=animation speed-preset=faster \
             ! h265parse ! queue ! qtmux name=mux"
                .to_owned()
        }
        VideoProfile::ProresStandard => {
            "avenc_prores ! queue ! qtmux name=mux".to_owned()
        }
        VideoProfile::ProresHq => {
            "avenc_prores_ks ! queue ! qtmux name=mux".to_owned()
        }
        VideoProfile::Vp8 => {
            "vp8enc deadline=1 cpu-used=8 threads=4 ! queue ! webmmux name=mux".to_owned()
        }
        VideoProfile::JpegMulti => {
            "jpegenc quality=85 ! queue ! avimux name=mux".to_owned()
        }
    }
}

/// Audio encoder matching the profile's container.
fn audio_encoder(profile: VideoProfile) -> &'static str {
    match profile {
        VideoProfile::Vp8 => "vorbisenc",
        _ => "avenc_aac",
    }
}

fn stamped_file(dir: &Path, basename: &str, extension: &str) -> PathBuf {
    dir.join(format!("{basename}_{}.{extension}", date_time_string()))
}

fn human_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

// ── PngRecorder ───────────────────────────────────────────────────────────────

/// Single-shot capture of the next staged frame into a PNG file.
///
/// The file is written vertically flipped and with the alpha channel
/// stripped, matching what the user sees on screen.
pub struct PngRecorder {
    directory: PathBuf,
    basename: String,
    filename: OnceLock<PathBuf>,
}

impl PngRecorder {
    pub fn new(directory: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            basename: basename.into(),
            filename: OnceLock::new(),
        }
    }

    /// Path of the produced file, available once the capture started.
    pub fn filename(&self) -> Option<&Path> {
        self.filename.get().map(PathBuf::as_path)
    }
}

impl GrabberSink for PngRecorder {
    fn kind(&self) -> GrabberKind {
        GrabberKind::Png
    }

    fn single_shot(&self) -> bool {
        true
    }

    fn build(&self, _caps: &gst::Caps) -> Result<String, String> {
        let file = stamped_file(&self.directory, &self.basename, "png");
        let _ = self.filename.set(file);
        // snapshot=true makes pngenc emit EOS after the first frame
        Ok("appsrc name=src ! videoconvert ! video/x-raw, format=RGB \
            ! videoflip method=vertical-flip ! pngenc snapshot=true \
            ! filesink name=sink"
            .to_owned())
    }

    fn configure(&self, pipeline: &gst::Pipeline) -> Result<(), String> {
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| "PNG capture: no sink in pipeline".to_owned())?;
        let file = self.filename.get().ok_or_else(|| "PNG capture: no file".to_owned())?;
        sink.set_property("location", file.to_string_lossy().as_ref());
        Ok(())
    }

    fn start_message(&self) -> String {
        match self.filename.get() {
            Some(f) => format!("Capturing image {}", f.display()),
            None => "Capturing image".to_owned(),
        }
    }

    fn describe(&self, status: SinkStatus, _extended: bool) -> String {
        if status.finished {
            match self.filename.get() {
                Some(f) => format!("Image saved to {}", f.display()),
                None => "Image capture failed".to_owned(),
            }
        } else {
            "Saving image...".to_owned()
        }
    }

    fn on_terminate(&self, _elapsed: Duration) {
        if let Some(f) = self.filename.get() {
            info!("Image saved to {}", f.display());
        }
    }
}

// ── VideoRecorder ─────────────────────────────────────────────────────────────

/// Configuration of one recording session.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub directory: PathBuf,
    pub basename: String,
    pub profile: VideoProfile,
    /// Recording framerate (30 or 60, plus the lower presets).
    pub framerate: u32,
    pub buffering: BufferingPreset,
    /// gst-launch line of an audio capture device to mix in, as published
    /// by the device monitor.
    pub audio_pipeline: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            basename: "mixlink".to_owned(),
            profile: VideoProfile::default(),
            framerate: 30,
            buffering: BufferingPreset::default(),
            audio_pipeline: None,
        }
    }
}

/// Records the output to a muxed container file.
///
/// Supports pausing, a maximum duration (enforced by the fabric) and
/// *save-and-continue*: a new recorder chained through the fabric takes
/// over without a gap while this one finalizes its file.
pub struct VideoRecorder {
    config: RecorderConfig,
    filename: OnceLock<PathBuf>,
}

impl VideoRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            filename: OnceLock::new(),
        }
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.get().map(PathBuf::as_path)
    }
}

impl GrabberSink for VideoRecorder {
    fn kind(&self) -> GrabberKind {
        GrabberKind::Video
    }

    fn frame_rate(&self) -> u32 {
        self.config.framerate
    }

    fn buffering_bytes(&self) -> u64 {
        self.config.buffering.bytes()
    }

    fn build(&self, _caps: &gst::Caps) -> Result<String, String> {
        let file = stamped_file(
            &self.config.directory,
            &self.config.basename,
            self.config.profile.extension(),
        );
        let _ = self.filename.set(file);

        let mut description = format!(
            "appsrc name=src ! videoconvert ! {} ! filesink name=sink",
            profile_fragment(self.config.profile)
        );
        if let Some(audio) = &self.config.audio_pipeline {
            description.push_str(&format!(
                " {audio} ! audioconvert ! audioresample ! {} ! queue ! mux.",
                audio_encoder(self.config.profile)
            ));
        }
        Ok(description)
    }

    fn configure(&self, pipeline: &gst::Pipeline) -> Result<(), String> {
        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| "Video recording: no sink in pipeline".to_owned())?;
        let file = self
            .filename
            .get()
            .ok_or_else(|| "Video recording: no file".to_owned())?;
        sink.set_property("location", file.to_string_lossy().as_ref());
        Ok(())
    }

    fn start_message(&self) -> String {
        match self.filename.get() {
            Some(f) => format!(
                "Recording {} to {}",
                self.config.profile.name(),
                f.display()
            ),
            None => "Recording started".to_owned(),
        }
    }

    fn describe(&self, status: SinkStatus, extended: bool) -> String {
        if extended {
            return format!(
                "{} {} fps, {}",
                self.config.profile.name(),
                self.config.framerate,
                self.config.buffering.name()
            );
        }
        if !status.initialized {
            "Starting recording...".to_owned()
        } else if status.active {
            format!("REC {}", human_duration(status.elapsed))
        } else {
            "Recording terminated.".to_owned()
        }
    }

    fn on_terminate(&self, elapsed: Duration) {
        if let Some(f) = self.filename.get() {
            info!(
                "Video saved to {} ({})",
                f.display(),
                human_duration(elapsed)
            );
        }
    }
}
