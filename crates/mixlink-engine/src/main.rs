//! mixlink — real-time video live-mixing engine core.
//!
//! Composes every service explicitly (no hidden globals) and drives the
//! ~60 Hz render loop feeding the grab fabric:
//!
//! ```text
//! render tick ─► Session.tick ─► PatternFrame ─► GrabFabric ─► grabbers
//!                      ▲
//!  Control (UDP) ──────┘        Streaming (UDP)  ConnectionRegistry (UDP)
//!                               DeviceMonitor (GStreamer)
//! ```
//!
//! Shutdown order: streaming → grabbers → control → discovery → devices.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use gstreamer as gst;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mixlink_control::{Control, ControlConfig, SessionControl};
use mixlink_core::ports::{BROADCAST_DEFAULT_PORT, CONTROL_RECEIVE_PORT, STREAM_REQUEST_PORT};
use mixlink_grab::audio::DeviceMonitor;
use mixlink_grab::broadcast::SrtBroadcast;
use mixlink_grab::loopback::Loopback;
use mixlink_grab::record::{PngRecorder, RecorderConfig, VideoRecorder};
use mixlink_grab::shm::{ShmBroadcast, ShmMethod};
use mixlink_grab::{FrameGrabber, GrabFabric, Outputs};
use mixlink_net::ConnectionRegistry;
use mixlink_stream::Streaming;

use mixlink_engine::settings::{settings_dir, SETTINGS_BASENAME, TRANSLATOR_BASENAME};
use mixlink_engine::{OutputDistributor, PatternFrame, Session, Settings};

/// ~60 Hz render tick.
const TICK: Duration = Duration::from_micros(16_667);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    gst::init().context("initializing GStreamer")?;

    let config_dir = settings_dir();
    let settings_path = config_dir.join(SETTINGS_BASENAME);
    let settings = Arc::new(Mutex::new(Settings::load(&settings_path)));

    // session model; sources normally come from a loaded session file
    let session = Session::new();
    session.add_source("gradient");
    session.add_source("checker");
    session.take_snapshot();

    // ── Services ──────────────────────────────────────────────────────────────

    let fabric = Arc::new(GrabFabric::new());
    let outputs = Outputs::new(Arc::clone(&fabric));

    let mut monitor = DeviceMonitor::start();
    monitor.wait_initialized();
    info!("{} audio capture device(s) found", monitor.count());
    {
        // a recording selection that just got unplugged must not linger
        let settings = Arc::clone(&settings);
        monitor.set_removed_hook(move |name| {
            let mut settings = settings.lock().unwrap();
            if settings.record.audio_device == name {
                warn!("Audio device for recording was unplugged.");
                settings.record.audio_device.clear();
            }
        });
    }

    let mut connection = ConnectionRegistry::new(STREAM_REQUEST_PORT, CONTROL_RECEIVE_PORT);
    if let Err(e) = connection.init().await {
        warn!("Peer discovery disabled: {e:#}");
    }

    let streaming = Streaming::new(Arc::clone(&fabric));
    match streaming.init(STREAM_REQUEST_PORT).await {
        Ok(()) => streaming.enable(true),
        Err(e) => warn!("Streaming disabled: {e:#}"),
    }

    let control = Control::new(
        Arc::clone(&session) as Arc<dyn SessionControl>,
        ControlConfig {
            translator_file: config_dir.join(TRANSLATOR_BASENAME),
            ..ControlConfig::default()
        },
    );
    if let Err(e) = control.init().await {
        warn!("Remote control disabled: {e:#}");
    }

    let distributor = OutputDistributor::new();
    if let Some(saved) = settings.lock().unwrap().windows.list.first() {
        distributor.set_rect(
            0,
            mixlink_engine::output::WindowRect {
                x: saved.x,
                y: saved.y,
                w: saved.w,
                h: saved.h,
            },
        );
    }

    start_requested_outputs(&outputs, &monitor, &settings);

    // ── Render loop ───────────────────────────────────────────────────────────

    let window = distributor.window(0).unwrap_or_default();
    info!(
        "Engine running (output {}x{})",
        window.rect.w, window.rect.h
    );

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut tick: u64 = 0;
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                session.tick(now - last);
                last = now;
                tick += 1;

                if session.render_disabled() {
                    continue;
                }
                let window = distributor.window(0).unwrap_or_default();
                let frame = PatternFrame {
                    width: window.rect.w.max(1) as u32,
                    height: window.rect.h.max(1) as u32,
                    alpha: false,
                    tick,
                    fading: session.fading(),
                    test_pattern: window.show_test_pattern,
                };
                fabric.grab_frame(&frame);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    // ── Ordered shutdown ──────────────────────────────────────────────────────

    streaming.enable(false);
    streaming.terminate().await;
    fabric.clear_all();
    control.terminate().await;
    connection.terminate().await;
    monitor.terminate();

    let saved = settings.lock().unwrap().clone();
    if let Err(e) = saved.save(&settings_path) {
        warn!("Could not save settings: {e:#}");
    }
    Ok(())
}

/// Environment-requested outputs, mostly useful for smoke-testing a
/// headless engine: `MIXLINK_SNAPSHOT=1` grabs one PNG,
/// `MIXLINK_RECORD_SECONDS=n` records the first n seconds,
/// `MIXLINK_BROADCAST=1` publishes SRT, `MIXLINK_SHM=1` publishes to
/// shared memory, `MIXLINK_LOOPBACK=n` feeds `/dev/video<n>`.
fn start_requested_outputs(
    outputs: &Arc<Outputs>,
    monitor: &DeviceMonitor,
    settings: &Arc<Mutex<Settings>>,
) {
    let record = settings.lock().unwrap().record.clone();
    let directory = if record.path.is_empty() {
        std::env::temp_dir()
    } else {
        record.path.clone().into()
    };

    if std::env::var_os("MIXLINK_SNAPSHOT").is_some() {
        outputs.start(
            FrameGrabber::new(PngRecorder::new(directory.clone(), "mixlink")),
            Duration::ZERO,
            Duration::ZERO,
        );
    }

    if let Some(seconds) = std::env::var("MIXLINK_RECORD_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
    {
        let audio_pipeline = monitor
            .index_of(&record.audio_device)
            .and_then(|i| monitor.pipeline(i));
        outputs.start(
            FrameGrabber::new(VideoRecorder::new(RecorderConfig {
                directory,
                audio_pipeline,
                ..RecorderConfig::default()
            })),
            Duration::ZERO,
            Duration::from_secs(seconds),
        );
    }

    if std::env::var_os("MIXLINK_BROADCAST").is_some() {
        if SrtBroadcast::available() {
            outputs.start(
                FrameGrabber::new(SrtBroadcast::new(BROADCAST_DEFAULT_PORT)),
                Duration::ZERO,
                Duration::ZERO,
            );
        } else {
            warn!("SRT broadcast requested but not available");
        }
    }

    if std::env::var_os("MIXLINK_SHM").is_some() {
        outputs.start(
            FrameGrabber::new(ShmBroadcast::new(None, ShmMethod::ShmSink)),
            Duration::ZERO,
            Duration::ZERO,
        );
    }

    if let Some(device) = std::env::var("MIXLINK_LOOPBACK")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
    {
        outputs.start(
            FrameGrabber::new(Loopback::new(device)),
            Duration::ZERO,
            Duration::ZERO,
        );
    }
}
