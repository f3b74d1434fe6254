//! The grabber lifecycle contract shared by every output sink.
//!
//! ```text
//!            add_frame (first)
//!    Idle ────────────────────────► Initializing
//!                                        │  (worker thread builds pipeline)
//!                                        ▼
//!                                   Running ◄──────► Paused
//!                                        │ stop()
//!                                        ▼
//!                                   Draining ── EOS ──► Finished (collected)
//! ```
//!
//! A [`FrameGrabber`] owns the state machine, the timing counters and the
//! GStreamer pipeline; the variant behavior (which pipeline to build, how to
//! describe itself, what to clean up) lives behind the [`GrabberSink`] trait.
//!
//! The render thread never blocks here: initialization runs on a worker
//! thread and frames are dropped while it is pending, back-pressure is the
//! advisory `buffer_full` flag driven by the appsrc callbacks, and `stop` only
//! enqueues end-of-stream — the pipeline's own streaming thread flips
//! `finished` when it drains.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{info, warn};

use mixlink_core::BufferingPreset;

pub type GrabberId = u64;

/// Default framerate stamped into sink caps when a variant does not choose.
pub const DEFAULT_GRABBER_FPS: u32 = 30;

static NEXT_GRABBER_ID: AtomicU64 = AtomicU64::new(1);

// ── Kind ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabberKind {
    Generic,
    Png,
    Video,
    P2P,
    Broadcast,
    Shm,
    Loopback,
}

impl GrabberKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Generic => "Frame grabber",
            Self::Png => "PNG capture",
            Self::Video => "Video recording",
            Self::P2P => "Peer stream",
            Self::Broadcast => "SRT broadcast",
            Self::Shm => "Shared memory",
            Self::Loopback => "Loopback camera",
        }
    }
}

// ── Shared state flags ────────────────────────────────────────────────────────

/// Flags shared between the render thread, the init worker and the
/// pipeline's streaming threads. All transitions are monotonic except
/// `paused`, which toggles.
#[derive(Debug, Default)]
pub struct GrabberShared {
    initialized: AtomicBool,
    active: AtomicBool,
    accept_buffer: AtomicBool,
    buffer_full: AtomicBool,
    end_of_stream: AtomicBool,
    paused: AtomicBool,
    finished: AtomicBool,
}

impl GrabberShared {
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
    pub fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
    pub fn accept_buffer(&self) -> bool {
        self.accept_buffer.load(Ordering::SeqCst)
    }
    pub fn buffer_full(&self) -> bool {
        self.buffer_full.load(Ordering::SeqCst)
    }
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::SeqCst)
    }
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Mark the grabber finished; also revokes `active` and `accept_buffer`
    /// so that `finished ⇒ !active ∧ !accept_buffer` holds at all times.
    fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.accept_buffer.store(false, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
    }
}

// ── Timing ────────────────────────────────────────────────────────────────────

/// Frame timing of one grabber. Pure bookkeeping over instants passed in,
/// so the timestamp laws are testable without a pipeline.
#[derive(Debug)]
pub struct GrabTimer {
    first_frame: Option<Instant>,
    pause_started: Option<Instant>,
    pause_accumulated: Duration,
    last_pts: Option<Duration>,
    frame_duration: Duration,
}

impl GrabTimer {
    pub fn new(fps: u32) -> Self {
        Self {
            first_frame: None,
            pause_started: None,
            pause_accumulated: Duration::ZERO,
            last_pts: None,
            frame_duration: Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1))),
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    fn pause_total(&self, now: Instant) -> Duration {
        match self.pause_started {
            Some(since) => self.pause_accumulated + now.duration_since(since),
            None => self.pause_accumulated,
        }
    }

    /// Elapsed recording time: wall time since the first frame minus the
    /// accumulated pauses. Zero before the first frame; constant while
    /// paused.
    pub fn duration(&self, now: Instant) -> Duration {
        match self.first_frame {
            Some(first) => now.duration_since(first).saturating_sub(self.pause_total(now)),
            None => Duration::ZERO,
        }
    }

    pub fn set_paused(&mut self, paused: bool, now: Instant) {
        match (paused, self.pause_started) {
            (true, None) => self.pause_started = Some(now),
            (false, Some(since)) => {
                self.pause_accumulated += now.duration_since(since);
                self.pause_started = None;
            }
            _ => {}
        }
    }

    /// Timestamp for the next pushed frame. Strictly greater than the
    /// previous one on this grabber.
    pub fn next_pts(&mut self, now: Instant) -> Duration {
        if self.first_frame.is_none() {
            self.first_frame = Some(now);
        }
        let mut pts = self.duration(now);
        if let Some(last) = self.last_pts {
            if pts <= last {
                pts = last + Duration::from_nanos(1);
            }
        }
        self.last_pts = Some(pts);
        pts
    }
}

// ── Variant trait ─────────────────────────────────────────────────────────────

/// Snapshot of the grabber state handed to [`GrabberSink::describe`].
#[derive(Debug, Clone, Copy)]
pub struct SinkStatus {
    pub initialized: bool,
    pub active: bool,
    pub finished: bool,
    pub elapsed: Duration,
    pub frames: u64,
}

/// Variant behavior of a grabber: which pipeline to build and how to present
/// and clean up after it. Implementations are shared with the init worker,
/// hence `Send + Sync`.
pub trait GrabberSink: Send + Sync + 'static {
    fn kind(&self) -> GrabberKind;

    /// Framerate stamped into the appsrc caps.
    fn frame_rate(&self) -> u32 {
        DEFAULT_GRABBER_FPS
    }

    /// gst-launch description of the sink pipeline. Must contain an element
    /// `appsrc name=src`; elements needing post-parse property setup should
    /// be named and configured in [`GrabberSink::configure`].
    fn build(&self, caps: &gst::Caps) -> Result<String, String>;

    /// Property setup on the parsed pipeline (sink addresses, file paths).
    fn configure(&self, _pipeline: &gst::Pipeline) -> Result<(), String> {
        Ok(())
    }

    /// Status line logged when the pipeline starts.
    fn start_message(&self) -> String {
        format!("{} started", self.kind().label())
    }

    /// One-frame sink: stop right after the first accepted frame.
    fn single_shot(&self) -> bool {
        false
    }

    /// Ring-buffer bytes allowed in the appsrc queue before back-pressure.
    fn buffering_bytes(&self) -> u64 {
        BufferingPreset::Minimum.bytes()
    }

    /// Human-readable status for the UI.
    fn describe(&self, status: SinkStatus, extended: bool) -> String;

    /// Cleanup once the pipeline drained (remove sockets, log the outcome).
    fn on_terminate(&self, _elapsed: Duration) {}
}

// ── Init worker ───────────────────────────────────────────────────────────────

struct BuiltPipeline {
    pipeline: gst::Pipeline,
    src: gst_app::AppSrc,
    caps: gst::Caps,
}

struct InitResult {
    status: String,
    built: Option<BuiltPipeline>,
}

/// Build the sink pipeline off the render thread. Runs once per grabber.
fn initialize(
    sink: Arc<dyn GrabberSink>,
    shared: Arc<GrabberShared>,
    caps: gst::Caps,
) -> InitResult {
    let fail = |status: String| InitResult { status, built: None };
    let label = sink.kind().label();

    let description = match sink.build(&caps) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };

    let pipeline = match gst::parse::launch(&description) {
        Ok(element) => match element.downcast::<gst::Pipeline>() {
            Ok(p) => p,
            Err(_) => return fail(format!("{label}: description is not a pipeline")),
        },
        Err(e) => {
            return fail(format!(
                "{label}: could not construct pipeline {description}: {e}"
            ))
        }
    };

    if let Err(e) = sink.configure(&pipeline) {
        return fail(e);
    }

    let Some(src) = pipeline
        .by_name("src")
        .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
    else {
        return fail(format!("{label}: failed to configure frame grabber"));
    };

    src.set_is_live(true);
    src.set_format(gst::Format::Time);
    src.set_stream_type(gst_app::AppStreamType::Stream);
    src.set_latency(gst::ClockTime::NONE, Some(gst::ClockTime::ZERO));
    src.set_max_bytes(sink.buffering_bytes());

    // stamp the variant framerate into the caps
    let mut src_caps = caps.clone();
    {
        let caps_ref = src_caps.make_mut();
        if let Some(s) = caps_ref.structure_mut(0) {
            s.set("framerate", gst::Fraction::new(sink.frame_rate() as i32, 1));
        }
    }
    src.set_caps(Some(&src_caps));

    // appsrc queue level drives the advisory back-pressure flags
    let need = Arc::clone(&shared);
    let enough = Arc::clone(&shared);
    src.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |_, _| {
                need.accept_buffer.store(true, Ordering::SeqCst);
                need.buffer_full.store(false, Ordering::SeqCst);
            })
            .enough_data(move |_| {
                enough.buffer_full.store(true, Ordering::SeqCst);
            })
            .build(),
    );

    // the pipeline's streaming thread reports EOS / errors through the bus
    if let Some(bus) = pipeline.bus() {
        let bus_shared = Arc::clone(&shared);
        let bus_label = label;
        bus.set_sync_handler(move |_, msg| {
            match msg.view() {
                gst::MessageView::Eos(_) => bus_shared.finish(),
                gst::MessageView::Error(e) => {
                    warn!("{bus_label}: pipeline error: {}", e.error());
                    bus_shared.finish();
                }
                _ => {}
            }
            gst::BusSyncReply::Drop
        });
    }

    InitResult {
        status: sink.start_message(),
        built: Some(BuiltPipeline {
            pipeline,
            src,
            caps: src_caps,
        }),
    }
}

// ── FrameGrabber ──────────────────────────────────────────────────────────────

/// One consumer of rendered frames; owned exclusively by the grab fabric.
pub struct FrameGrabber {
    id: GrabberId,
    shared: Arc<GrabberShared>,
    sink: Arc<dyn GrabberSink>,
    timer: GrabTimer,
    frame_count: u64,
    keyframe_count: u64,
    pipeline: Option<gst::Pipeline>,
    src: Option<gst_app::AppSrc>,
    caps: Option<gst::Caps>,
    init_rx: Option<mpsc::Receiver<InitResult>>,
}

impl FrameGrabber {
    pub fn new(sink: impl GrabberSink) -> Self {
        Self::from_sink(Arc::new(sink))
    }

    pub fn from_sink(sink: Arc<dyn GrabberSink>) -> Self {
        let fps = sink.frame_rate();
        Self {
            id: NEXT_GRABBER_ID.fetch_add(1, Ordering::Relaxed),
            shared: Arc::new(GrabberShared::default()),
            sink,
            timer: GrabTimer::new(fps),
            frame_count: 0,
            keyframe_count: 0,
            pipeline: None,
            src: None,
            caps: None,
            init_rx: None,
        }
    }

    pub fn id(&self) -> GrabberId {
        self.id
    }

    pub fn kind(&self) -> GrabberKind {
        self.sink.kind()
    }

    pub fn shared(&self) -> &Arc<GrabberShared> {
        &self.shared
    }

    pub fn active(&self) -> bool {
        self.shared.active()
    }

    pub fn accept_buffer(&self) -> bool {
        self.shared.accept_buffer()
    }

    pub fn finished(&self) -> bool {
        self.shared.finished()
    }

    pub fn paused(&self) -> bool {
        self.shared.paused()
    }

    pub fn frames(&self) -> u64 {
        self.frame_count
    }

    pub fn key_frames(&self) -> u64 {
        self.keyframe_count
    }

    pub fn frame_duration(&self) -> Duration {
        self.timer.frame_duration()
    }

    /// Elapsed recording time, constant while paused.
    pub fn duration(&self) -> Duration {
        self.timer.duration(Instant::now())
    }

    /// Currently producing output.
    pub fn busy(&self) -> bool {
        self.shared.active() && self.frame_count > 0
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
        self.timer.set_paused(paused, Instant::now());
    }

    /// Request the end of this grabber. Idempotent and asynchronous: the
    /// pipeline flips `finished` once the enqueued EOS drains through.
    pub fn stop(&self) {
        if self.shared.end_of_stream.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.accept_buffer.store(false, Ordering::SeqCst);
        match &self.src {
            Some(src) => {
                let _ = src.end_of_stream();
            }
            // nothing to drain when the pipeline never came up
            None => self.shared.finish(),
        }
    }

    pub fn info(&self, extended: bool) -> String {
        self.sink.describe(
            SinkStatus {
                initialized: self.shared.initialized(),
                active: self.shared.active(),
                finished: self.shared.finished(),
                elapsed: self.duration(),
                frames: self.frame_count,
            },
            extended,
        )
    }

    // ── Producer side (called by the fabric on the render thread) ─────────────

    /// Offer one staged frame. Never blocks: drops the frame while the
    /// grabber initializes, is paused, or reports a full buffer.
    pub(crate) fn add_frame(&mut self, buffer: &gst::Buffer, caps: &gst::Caps) {
        if self.shared.finished() {
            return;
        }

        if !self.shared.initialized() {
            self.poll_init(caps);
            if !self.shared.initialized() {
                // still initializing (or failed): drop the frame
                return;
            }
            // init completed on this very tick: this frame is the first in
        }

        // the output was resized since this pipeline was built
        if let Some(own) = &self.caps {
            if !caps_compatible(own, caps) {
                self.stop();
            }
        }

        if !self.shared.active() || self.shared.paused() || self.shared.buffer_full() {
            return;
        }

        let now = Instant::now();
        let previous_second = self
            .timer
            .duration(now)
            .as_secs();
        let pts = self.timer.next_pts(now);

        // copy-on-write: the fabric shares one buffer across all grabbers
        let mut frame = buffer.clone();
        {
            let f = frame.make_mut();
            f.set_pts(gst::ClockTime::from_nseconds(pts.as_nanos() as u64));
            f.set_duration(gst::ClockTime::from_nseconds(
                self.timer.frame_duration().as_nanos() as u64,
            ));
        }

        let Some(src) = &self.src else { return };
        match src.push_buffer(frame) {
            Ok(_) => {
                self.frame_count += 1;
                // nominal one key frame per second of stream
                if self.frame_count == 1 || pts.as_secs() > previous_second {
                    self.keyframe_count += 1;
                }
            }
            Err(flow) => {
                warn!("{}: push failed ({flow:?})", self.kind().label());
                self.shared.finish();
            }
        }

        if self.sink.single_shot() && self.frame_count >= 1 {
            self.stop();
        }
    }

    fn poll_init(&mut self, caps: &gst::Caps) {
        let Some(rx) = &self.init_rx else {
            self.spawn_init(caps);
            return;
        };
        match rx.try_recv() {
            Ok(result) => {
                self.init_rx = None;
                match result.built {
                    Some(built) => {
                        if built
                            .pipeline
                            .set_state(gst::State::Playing)
                            .is_err()
                        {
                            warn!("{}: failed to start pipeline", self.kind().label());
                            self.shared.finish();
                            return;
                        }
                        info!("{}", result.status);
                        self.caps = Some(built.caps);
                        self.src = Some(built.src);
                        self.pipeline = Some(built.pipeline);
                        self.shared.initialized.store(true, Ordering::SeqCst);
                        self.shared.active.store(true, Ordering::SeqCst);
                        self.shared.accept_buffer.store(true, Ordering::SeqCst);
                    }
                    None => {
                        warn!("{}", result.status);
                        self.shared.finish();
                    }
                }
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {
                self.init_rx = None;
                self.shared.finish();
            }
        }
    }

    fn spawn_init(&mut self, caps: &gst::Caps) {
        let (tx, rx) = mpsc::channel();
        self.init_rx = Some(rx);
        let sink = Arc::clone(&self.sink);
        let shared = Arc::clone(&self.shared);
        let caps = caps.clone();
        let spawned = std::thread::Builder::new()
            .name("grabber-init".into())
            .spawn(move || {
                let _ = tx.send(initialize(sink, shared, caps));
            });
        if spawned.is_err() {
            warn!("{}: failed to spawn init worker", self.kind().label());
            self.shared.finish();
        }
    }

    /// Release OS resources. Called by the fabric after `finished` was
    /// observed, or at shutdown.
    pub(crate) fn terminate(&mut self) {
        // an init worker may still be building the pipeline; collect it
        if let Some(rx) = self.init_rx.take() {
            if let Ok(result) = rx.recv_timeout(Duration::from_secs(2)) {
                if let Some(built) = result.built {
                    self.pipeline = Some(built.pipeline);
                }
            }
        }
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
        self.src = None;
        self.sink.on_terminate(self.duration());
    }
}

fn caps_compatible(a: &gst::Caps, b: &gst::Caps) -> bool {
    let (Some(sa), Some(sb)) = (a.structure(0), b.structure(0)) else {
        return false;
    };
    sa.get::<i32>("width").ok() == sb.get::<i32>("width").ok()
        && sa.get::<i32>("height").ok() == sb.get::<i32>("height").ok()
        && sa.get::<&str>("format").ok() == sb.get::<&str>("format").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_is_strictly_monotonic() {
        let mut timer = GrabTimer::new(30);
        let t0 = Instant::now();
        let mut last = timer.next_pts(t0);
        // same instant repeatedly: still strictly increasing
        for _ in 0..5 {
            let pts = timer.next_pts(t0);
            assert!(pts > last);
            last = pts;
        }
        let pts = timer.next_pts(t0 + Duration::from_millis(100));
        assert!(pts > last);
    }

    #[test]
    fn duration_is_constant_while_paused() {
        let mut timer = GrabTimer::new(30);
        let t0 = Instant::now();
        timer.next_pts(t0);
        timer.set_paused(true, t0 + Duration::from_millis(50));
        let a = timer.duration(t0 + Duration::from_millis(60));
        let b = timer.duration(t0 + Duration::from_millis(500));
        assert_eq!(a, b);
        assert_eq!(a, Duration::from_millis(50));
    }

    #[test]
    fn pause_time_is_excluded_from_duration() {
        let mut timer = GrabTimer::new(30);
        let t0 = Instant::now();
        timer.next_pts(t0);
        timer.set_paused(true, t0 + Duration::from_millis(100));
        timer.set_paused(false, t0 + Duration::from_millis(300));
        assert_eq!(
            timer.duration(t0 + Duration::from_millis(400)),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn duration_is_zero_before_first_frame() {
        let timer = GrabTimer::new(30);
        assert_eq!(timer.duration(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn finish_revokes_active_and_accept() {
        let shared = GrabberShared::default();
        shared.active.store(true, Ordering::SeqCst);
        shared.accept_buffer.store(true, Ordering::SeqCst);
        shared.finish();
        assert!(shared.finished());
        assert!(!shared.active());
        assert!(!shared.accept_buffer());
    }

    #[test]
    fn frame_duration_follows_fps() {
        assert_eq!(
            GrabTimer::new(30).frame_duration(),
            Duration::from_nanos(33_333_333)
        );
        assert_eq!(
            GrabTimer::new(60).frame_duration(),
            Duration::from_nanos(16_666_666)
        );
    }
}
