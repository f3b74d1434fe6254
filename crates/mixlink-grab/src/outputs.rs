//! Facade over the fabric for launching and observing outputs by kind.
//!
//! Grabbers self-finish and are then dropped by the fabric, so holding on to
//! one is unsafe by construction; UIs and the control endpoint go through
//! this facade instead and address outputs by [`GrabberKind`] only. One
//! active instance per kind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::fabric::GrabFabric;
use crate::grabber::{FrameGrabber, GrabberKind};

pub struct Outputs {
    fabric: Arc<GrabFabric>,
    /// Kinds with a delayed start still pending.
    delayed: Mutex<HashMap<GrabberKind, bool>>,
}

impl Outputs {
    pub fn new(fabric: Arc<GrabFabric>) -> Arc<Self> {
        Arc::new(Self {
            fabric,
            delayed: Mutex::new(HashMap::new()),
        })
    }

    /// Start an output, replacing any active instance of the same kind.
    /// With a non-zero `delay` the start happens in the background and can
    /// be interrupted by [`Outputs::stop`]. `max` bounds the duration
    /// (zero: unbounded).
    pub fn start(self: &Arc<Self>, grabber: FrameGrabber, delay: Duration, max: Duration) {
        let kind = grabber.kind();
        if delay.is_zero() {
            self.stop(kind);
            self.fabric.add_limited(grabber, max);
            return;
        }

        self.delayed.lock().unwrap().insert(kind, true);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_pending = this
                .delayed
                .lock()
                .unwrap()
                .insert(kind, false)
                .unwrap_or(false);
            if still_pending {
                this.fabric.stop_kind(kind);
                this.fabric.add_limited(grabber, max);
            } else {
                debug!("Delayed {} start was interrupted", kind.label());
            }
        });
    }

    /// Schedule `successor` as the gapless replacement of the running
    /// grabber of the same kind (save-and-continue).
    pub fn chain(&self, successor: FrameGrabber) {
        self.fabric.chain(successor);
    }

    /// A delayed start is still counting down.
    pub fn pending(&self, kind: GrabberKind) -> bool {
        self.delayed
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or(false)
    }

    pub fn enabled(&self, kind: GrabberKind) -> bool {
        self.fabric.id_of_kind(kind).is_some()
    }

    pub fn busy(&self, kind: GrabberKind) -> bool {
        self.fabric
            .id_of_kind(kind)
            .is_some_and(|id| self.fabric.busy_id(id))
    }

    pub fn info(&self, kind: GrabberKind, extended: bool) -> String {
        if self.pending(kind) {
            return "Starting shortly...".to_owned();
        }
        self.fabric
            .info_kind(kind, extended)
            .unwrap_or_else(|| "Disabled".to_owned())
    }

    pub fn stop(&self, kind: GrabberKind) {
        // interrupt any pending delayed start for this kind
        self.delayed.lock().unwrap().insert(kind, false);
        self.fabric.stop_kind(kind);
    }

    pub fn paused(&self, kind: GrabberKind) -> bool {
        self.fabric.paused(kind)
    }

    pub fn pause(&self, kind: GrabberKind) {
        self.fabric.set_paused(kind, true);
    }

    pub fn unpause(&self, kind: GrabberKind) {
        self.fabric.set_paused(kind, false);
    }
}
