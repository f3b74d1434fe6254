//! The grab fabric: staging of the rendered frame and fan-out to grabbers.
//!
//! The render loop calls [`GrabFabric::grab_frame`] exactly once per tick.
//! Readback of the output is asynchronous: the bytes requested into a
//! staging buffer only become valid one tick later, so the fabric keeps two
//! buffers and alternates between them —
//!
//! ```text
//! tick n:   read_pixels ──► staging[write]          (full[write] = true)
//!           staging[read] ──copy──► gst::Buffer ──► every grabber
//!           read ← write, write ← 1 - write
//! ```
//!
//! A single buffer would stall the render thread waiting on the transfer.
//!
//! The fabric owns every grabber exclusively. It also keeps the *chain map*
//! (successor ↦ predecessor) used for gapless save-and-continue handover,
//! and the per-grabber maximum durations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use gstreamer as gst;
use gstreamer_video as gst_video;
use tracing::debug;

use crate::grabber::{FrameGrabber, GrabberId, GrabberKind};

// ── OutputFrame ───────────────────────────────────────────────────────────────

/// The rendered output of one tick, as seen by the fabric. Implemented by
/// the rendering collaborator.
pub trait OutputFrame {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn has_alpha(&self) -> bool;

    /// Begin an asynchronous readback of the current output into `dst`.
    /// The bytes are only guaranteed valid at the next render tick.
    fn read_pixels(&self, dst: &mut [u8]);
}

// ── StagingRing ───────────────────────────────────────────────────────────────

/// Two pinned staging buffers between the renderer and the consumers.
#[derive(Debug, Default)]
pub(crate) struct StagingRing {
    buffers: [Vec<u8>; 2],
    full: [bool; 2],
    write_index: usize,
    read_index: usize,
    width: u32,
    height: u32,
    alpha: bool,
}

impl StagingRing {
    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * if self.alpha { 4 } else { 3 }
    }

    /// Adopt the tick's geometry. Returns true when it changed and the
    /// buffers were reallocated (indices reset: nothing staged any more).
    pub(crate) fn prepare(&mut self, width: u32, height: u32, alpha: bool) -> bool {
        if width == self.width && height == self.height && alpha == self.alpha {
            return false;
        }
        self.width = width;
        self.height = height;
        self.alpha = alpha;
        let size = self.frame_size();
        self.buffers[0] = vec![0; size];
        self.buffers[1] = vec![0; size];
        self.full = [false; 2];
        self.write_index = 0;
        self.read_index = 0;
        true
    }

    /// Stage the current frame; hand back the previously staged one, if any.
    pub(crate) fn stage(&mut self, fb: &dyn OutputFrame) -> Option<&[u8]> {
        fb.read_pixels(&mut self.buffers[self.write_index]);
        self.full[self.write_index] = true;

        let ready = if self.read_index != self.write_index && self.full[self.read_index] {
            self.full[self.read_index] = false;
            Some(self.read_index)
        } else {
            None
        };

        self.read_index = self.write_index;
        self.write_index = 1 - self.write_index;

        ready.map(|i| self.buffers[i].as_slice())
    }
}

// ── GrabFabric ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Fabric {
    ring: StagingRing,
    caps: Option<gst::Caps>,
    grabbers: Vec<FrameGrabber>,
    /// successor id ↦ predecessor id (gapless handover)
    chain: HashMap<GrabberId, GrabberId>,
    /// maximum recording duration per grabber; zero means unbounded
    max_duration: HashMap<GrabberId, Duration>,
}

/// Owner of all grabbers; one lock covers lookup and mutation.
#[derive(Default)]
pub struct GrabFabric {
    inner: Mutex<Fabric>,
}

impl GrabFabric {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    /// Register a grabber without duration bound.
    pub fn add(&self, grabber: FrameGrabber) -> GrabberId {
        self.add_limited(grabber, Duration::ZERO)
    }

    /// Register a grabber stopped automatically once its duration reaches
    /// `max` (zero: unbounded).
    pub fn add_limited(&self, grabber: FrameGrabber, max: Duration) -> GrabberId {
        let mut f = self.inner.lock().unwrap();
        let id = grabber.id();
        if !max.is_zero() {
            f.max_duration.insert(id, max);
        }
        f.grabbers.push(grabber);
        id
    }

    /// Register `successor` as the gapless replacement of the running
    /// grabber of the same kind, if any. The predecessor keeps producing
    /// until the successor is active and accepting buffers.
    pub fn chain(&self, successor: FrameGrabber) -> GrabberId {
        let mut f = self.inner.lock().unwrap();
        let kind = successor.kind();
        let id = successor.id();
        let predecessor = f
            .grabbers
            .iter()
            .find(|g| g.kind() == kind && !g.finished())
            .map(|g| g.id());
        f.grabbers.push(successor);
        if let Some(pred) = predecessor {
            f.chain.insert(id, pred);
        }
        id
    }

    pub fn contains(&self, id: GrabberId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .any(|g| g.id() == id)
    }

    pub fn id_of_kind(&self, kind: GrabberKind) -> Option<GrabberId> {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .find(|g| g.kind() == kind)
            .map(|g| g.id())
    }

    pub fn stop(&self, id: GrabberId) {
        let f = self.inner.lock().unwrap();
        if let Some(g) = f.grabbers.iter().find(|g| g.id() == id) {
            g.stop();
        }
    }

    pub fn stop_kind(&self, kind: GrabberKind) {
        let f = self.inner.lock().unwrap();
        for g in f.grabbers.iter().filter(|g| g.kind() == kind) {
            g.stop();
        }
    }

    pub fn stop_all(&self) {
        let mut f = self.inner.lock().unwrap();
        for g in &f.grabbers {
            g.stop();
        }
        f.max_duration.clear();
    }

    /// Stop everything and release whatever already finished. Called at
    /// shutdown, repeatedly if needed.
    pub fn clear_all(&self) {
        let mut f = self.inner.lock().unwrap();
        for g in &f.grabbers {
            g.stop();
        }
        let mut kept = Vec::new();
        for mut g in f.grabbers.drain(..) {
            if g.finished() {
                g.terminate();
            } else {
                kept.push(g);
            }
        }
        f.grabbers = kept;
        f.chain.clear();
        f.max_duration.clear();
    }

    // ── Observation ───────────────────────────────────────────────────────────

    pub fn busy(&self) -> bool {
        !self.inner.lock().unwrap().grabbers.is_empty()
    }

    pub fn busy_id(&self, id: GrabberId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .find(|g| g.id() == id)
            .is_some_and(|g| g.busy())
    }

    /// Frames pushed so far by grabber `id`.
    pub fn frames(&self, id: GrabberId) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .find(|g| g.id() == id)
            .map(|g| g.frames())
    }

    /// Live state flags of grabber `id`: `(active, accept_buffer)`.
    pub fn state(&self, id: GrabberId) -> Option<(bool, bool)> {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .find(|g| g.id() == id)
            .map(|g| (g.active(), g.accept_buffer()))
    }

    pub fn info(&self, id: GrabberId, extended: bool) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .find(|g| g.id() == id)
            .map(|g| g.info(extended))
    }

    pub fn info_kind(&self, kind: GrabberKind, extended: bool) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .find(|g| g.kind() == kind)
            .map(|g| g.info(extended))
    }

    pub fn paused(&self, kind: GrabberKind) -> bool {
        self.inner
            .lock()
            .unwrap()
            .grabbers
            .iter()
            .find(|g| g.kind() == kind)
            .is_some_and(|g| g.paused())
    }

    pub fn set_paused(&self, kind: GrabberKind, paused: bool) {
        let mut f = self.inner.lock().unwrap();
        for g in f.grabbers.iter_mut().filter(|g| g.kind() == kind) {
            g.set_paused(paused);
        }
    }

    /// Dimensions of the staged output (zero before the first tick).
    pub fn width(&self) -> u32 {
        self.inner.lock().unwrap().ring.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.lock().unwrap().ring.height()
    }

    // ── Per-tick entry point ──────────────────────────────────────────────────

    /// Stage the tick's output and fan it out. Called exactly once per
    /// render tick, on the render thread.
    pub fn grab_frame(&self, fb: &dyn OutputFrame) {
        let mut f = self.inner.lock().unwrap();
        let (width, height, alpha) = (fb.width(), fb.height(), fb.has_alpha());
        if width == 0 || height == 0 {
            return;
        }

        if f.ring.prepare(width, height, alpha) {
            let format = if alpha {
                gst_video::VideoFormat::Rgba
            } else {
                gst_video::VideoFormat::Rgb
            };
            f.caps = gst_video::VideoInfo::builder(format, width, height)
                .build()
                .ok()
                .and_then(|info| info.to_caps().ok());
            debug!("Staging buffers resized to {width}x{height} (alpha: {alpha})");
        }

        if f.grabbers.is_empty() {
            return;
        }

        let Fabric {
            ring,
            caps,
            grabbers,
            chain,
            max_duration,
        } = &mut *f;

        // 1-3. readback into the write buffer, collect the previously
        //      staged frame, swap indices
        let staged = ring.stage(fb);

        // 4. fan-out
        if let (Some(bytes), Some(caps)) = (staged, caps.as_ref()) {
            let buffer = gst::Buffer::from_mut_slice(bytes.to_vec());
            for g in grabbers.iter_mut() {
                if let Some(max) = max_duration.get(&g.id()) {
                    let margin = 2 * g.frame_duration();
                    if g.duration() >= max.saturating_sub(margin) {
                        g.stop();
                    }
                }
                g.add_frame(&buffer, caps);
            }
        }

        // 5. chain handover: stop predecessors whose successor is live
        chain.retain(|&succ_id, &mut pred_id| {
            let succ_live = grabbers
                .iter()
                .find(|g| g.id() == succ_id)
                .map(|g| g.active() && g.accept_buffer());
            match succ_live {
                // successor vanished: the chain is moot
                None => false,
                Some(false) => true,
                Some(true) => {
                    if let Some(pred) = grabbers.iter().find(|g| g.id() == pred_id) {
                        pred.stop();
                        // switch the remaining recording time to the successor
                        if let Some(max) = max_duration.remove(&pred_id) {
                            let remaining = max.saturating_sub(pred.duration())
                                + 2 * pred.frame_duration();
                            max_duration.insert(succ_id, remaining);
                        }
                    }
                    false
                }
            }
        });

        // 6. collect grabbers stopped by their own workers
        grabbers.retain_mut(|g| {
            if g.finished() {
                g.terminate();
                max_duration.remove(&g.id());
                false
            } else {
                true
            }
        });
        let live: Vec<GrabberId> = grabbers.iter().map(|g| g.id()).collect();
        chain.retain(|succ, pred| live.contains(succ) && live.contains(pred));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestFrame {
        width: u32,
        height: u32,
        alpha: bool,
        fill: u8,
    }

    impl OutputFrame for TestFrame {
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
        fn has_alpha(&self) -> bool {
            self.alpha
        }
        fn read_pixels(&self, dst: &mut [u8]) {
            dst.fill(self.fill);
        }
    }

    fn frame(fill: u8) -> TestFrame {
        TestFrame {
            width: 4,
            height: 2,
            alpha: false,
            fill,
        }
    }

    #[test]
    fn nothing_staged_on_first_tick() {
        let mut ring = StagingRing::default();
        assert!(ring.prepare(4, 2, false));
        assert!(ring.stage(&frame(1)).is_none());
    }

    #[test]
    fn second_tick_yields_previous_frame() {
        let mut ring = StagingRing::default();
        ring.prepare(4, 2, false);
        assert!(ring.stage(&frame(1)).is_none());
        let staged = ring.stage(&frame(2)).expect("frame staged on tick 1");
        assert!(staged.iter().all(|&b| b == 1));
        let staged = ring.stage(&frame(3)).expect("frame staged on tick 2");
        assert!(staged.iter().all(|&b| b == 2));
    }

    #[test]
    fn resize_drops_the_staged_frame() {
        let mut ring = StagingRing::default();
        ring.prepare(4, 2, false);
        ring.stage(&frame(1));
        // geometry change between ticks: buffers reallocated, indices reset
        assert!(ring.prepare(8, 4, false));
        let bigger = TestFrame {
            width: 8,
            height: 4,
            alpha: false,
            fill: 9,
        };
        assert!(ring.stage(&bigger).is_none());
        assert_eq!(ring.stage(&bigger).unwrap().len(), 8 * 4 * 3);
    }

    #[test]
    fn alpha_changes_frame_size() {
        let mut ring = StagingRing::default();
        ring.prepare(4, 2, false);
        assert_eq!(ring.frame_size(), 4 * 2 * 3);
        assert!(ring.prepare(4, 2, true));
        assert_eq!(ring.frame_size(), 4 * 2 * 4);
        assert!(!ring.prepare(4, 2, true));
    }
}
