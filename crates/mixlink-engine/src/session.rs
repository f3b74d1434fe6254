//! The in-process session model: sources, cursors, fading and snapshots.
//!
//! This is the collaborator behind the control endpoint's
//! [`SessionControl`]/[`SourceHandle`] traits. Real decoding pipelines live
//! outside the core; a source here is the mutable state remote control
//! operates on (playback flag, alpha, depth, geometry).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use mixlink_control::{SessionControl, SourceHandle};

/// Snapshots kept before the oldest is dropped.
const MAX_SNAPSHOTS: usize = 100;

// ── Source ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct Geometry {
    x: f32,
    y: f32,
    scale_x: f32,
    scale_y: f32,
    angle: f32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            angle: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct SourceData {
    alpha: f32,
    depth: f32,
    geometry: Geometry,
}

/// One source of the session.
pub struct SourceState {
    name: String,
    playing: AtomicBool,
    replays: AtomicU64,
    data: Mutex<SourceData>,
}

impl SourceState {
    fn new(name: &str, depth: f32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            playing: AtomicBool::new(true),
            replays: AtomicU64::new(0),
            data: Mutex::new(SourceData {
                alpha: 1.0,
                depth,
                geometry: Geometry::default(),
            }),
        })
    }

    /// Number of rewinds requested so far.
    pub fn replays(&self) -> u64 {
        self.replays.load(Ordering::SeqCst)
    }

    pub fn position(&self) -> (f32, f32) {
        let d = self.data.lock().unwrap();
        (d.geometry.x, d.geometry.y)
    }

    pub fn scale(&self) -> (f32, f32) {
        let d = self.data.lock().unwrap();
        (d.geometry.scale_x, d.geometry.scale_y)
    }

    pub fn angle(&self) -> f32 {
        self.data.lock().unwrap().geometry.angle
    }
}

impl SourceHandle for SourceState {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn alpha(&self) -> f32 {
        self.data.lock().unwrap().alpha
    }

    fn depth(&self) -> f32 {
        self.data.lock().unwrap().depth
    }

    fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    fn replay(&self) {
        self.replays.fetch_add(1, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
    }

    fn set_alpha(&self, alpha: f32) {
        self.data.lock().unwrap().alpha = alpha.clamp(0.0, 1.0);
    }

    fn set_depth(&self, depth: f32) {
        self.data.lock().unwrap().depth = depth;
    }

    fn grab(&self, dx: f32, dy: f32) {
        let mut d = self.data.lock().unwrap();
        d.geometry.x += dx;
        d.geometry.y += dy;
    }

    fn resize(&self, sx: f32, sy: f32) {
        let mut d = self.data.lock().unwrap();
        d.geometry.scale_x *= sx;
        d.geometry.scale_y *= sy;
    }

    fn turn(&self, angle: f32) {
        self.data.lock().unwrap().geometry.angle += angle;
    }

    fn reset_geometry(&self) {
        self.data.lock().unwrap().geometry = Geometry::default();
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct SourceSnapshot {
    name: String,
    playing: bool,
    alpha: f32,
    depth: f32,
    geometry: Geometry,
}

#[derive(Clone)]
struct Snapshot {
    fading_target: f32,
    current: Option<usize>,
    sources: Vec<SourceSnapshot>,
}

// ── Session ───────────────────────────────────────────────────────────────────

struct SessionState {
    sources: Vec<Arc<SourceState>>,
    current: Option<usize>,
    selection: Vec<usize>,
    render_disabled: bool,
    fading: f32,
    fading_target: f32,
    /// Remaining fade time; zero means the next tick snaps to the target.
    fading_remaining: Duration,
    snapshots: Vec<Snapshot>,
}

/// The mixing session. Internally synchronised; shared as `Arc<Session>`.
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionState {
                sources: Vec::new(),
                current: None,
                selection: Vec::new(),
                render_disabled: false,
                fading: 0.0,
                fading_target: 0.0,
                fading_remaining: Duration::ZERO,
                snapshots: Vec::new(),
            }),
        })
    }

    /// Append a source; becomes current when it is the first.
    pub fn add_source(&self, name: &str) -> Arc<SourceState> {
        let mut state = self.state.lock().unwrap();
        let depth = state.sources.len() as f32;
        let source = SourceState::new(name, depth);
        state.sources.push(Arc::clone(&source));
        if state.current.is_none() {
            state.current = Some(0);
        }
        source
    }

    pub fn select(&self, indices: &[usize]) {
        let mut state = self.state.lock().unwrap();
        let count = state.sources.len();
        state.selection = indices.iter().copied().filter(|i| *i < count).collect();
    }

    /// Persist the current state as a new snapshot.
    pub fn take_snapshot(&self) {
        let mut state = self.state.lock().unwrap();
        let snapshot = Snapshot {
            fading_target: state.fading_target,
            current: state.current,
            sources: state
                .sources
                .iter()
                .map(|s| {
                    let d = s.data.lock().unwrap();
                    SourceSnapshot {
                        name: s.name.clone(),
                        playing: s.playing.load(Ordering::SeqCst),
                        alpha: d.alpha,
                        depth: d.depth,
                        geometry: d.geometry.clone(),
                    }
                })
                .collect(),
        };
        state.snapshots.push(snapshot);
        if state.snapshots.len() > MAX_SNAPSHOTS {
            state.snapshots.remove(0);
        }
    }

    /// Advance the output fade towards its target.
    pub fn tick(&self, dt: Duration) {
        let mut state = self.state.lock().unwrap();
        if (state.fading - state.fading_target).abs() < f32::EPSILON {
            state.fading_remaining = Duration::ZERO;
            return;
        }
        if state.fading_remaining.is_zero() || dt >= state.fading_remaining {
            state.fading = state.fading_target;
            state.fading_remaining = Duration::ZERO;
        } else {
            let step = (state.fading_target - state.fading)
                * (dt.as_secs_f32() / state.fading_remaining.as_secs_f32());
            state.fading += step;
            state.fading_remaining -= dt;
        }
    }
}

impl SessionControl for Session {
    fn render_disabled(&self) -> bool {
        self.state.lock().unwrap().render_disabled
    }

    fn set_render_disabled(&self, disabled: bool) {
        self.state.lock().unwrap().render_disabled = disabled;
    }

    fn fading(&self) -> f32 {
        self.state.lock().unwrap().fading
    }

    fn set_fading_target(&self, target: f32, duration_ms: Option<f32>) {
        let mut state = self.state.lock().unwrap();
        state.fading_target = target.clamp(0.0, 1.0);
        state.fading_remaining = duration_ms
            .filter(|ms| *ms > 0.0)
            .map(|ms| Duration::from_secs_f32(ms / 1000.0))
            .unwrap_or(Duration::ZERO);
    }

    fn snapshot_count(&self) -> usize {
        self.state.lock().unwrap().snapshots.len()
    }

    fn restore_snapshot(&self, distance: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        if distance >= state.snapshots.len() {
            return false;
        }
        let index = state.snapshots.len() - 1 - distance;
        let snapshot = state.snapshots[index].clone();
        for saved in &snapshot.sources {
            if let Some(source) = state.sources.iter().find(|s| s.name == saved.name) {
                source.playing.store(saved.playing, Ordering::SeqCst);
                let mut d = source.data.lock().unwrap();
                d.alpha = saved.alpha;
                d.depth = saved.depth;
                d.geometry = saved.geometry.clone();
            }
        }
        let source_count = state.sources.len();
        state.current = snapshot.current.filter(|i| *i < source_count);
        state.fading_target = snapshot.fading_target;
        state.fading_remaining = Duration::ZERO;
        info!(
            "Restored snapshot {distance} back (of {})",
            state.snapshots.len()
        );
        true
    }

    fn source_count(&self) -> usize {
        self.state.lock().unwrap().sources.len()
    }

    fn source_at(&self, index: usize) -> Option<Arc<dyn SourceHandle>> {
        self.state
            .lock()
            .unwrap()
            .sources
            .get(index)
            .map(|s| Arc::clone(s) as Arc<dyn SourceHandle>)
    }

    fn find_source(&self, name: &str) -> Option<Arc<dyn SourceHandle>> {
        self.state
            .lock()
            .unwrap()
            .sources
            .iter()
            .find(|s| s.name == name)
            .map(|s| Arc::clone(s) as Arc<dyn SourceHandle>)
    }

    fn all_sources(&self) -> Vec<Arc<dyn SourceHandle>> {
        self.state
            .lock()
            .unwrap()
            .sources
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn SourceHandle>)
            .collect()
    }

    fn selection(&self) -> Vec<Arc<dyn SourceHandle>> {
        let state = self.state.lock().unwrap();
        state
            .selection
            .iter()
            .filter_map(|i| state.sources.get(*i))
            .map(|s| Arc::clone(s) as Arc<dyn SourceHandle>)
            .collect()
    }

    fn current_index(&self) -> Option<usize> {
        self.state.lock().unwrap().current
    }

    fn current_source(&self) -> Option<Arc<dyn SourceHandle>> {
        let state = self.state.lock().unwrap();
        state
            .current
            .and_then(|i| state.sources.get(i))
            .map(|s| Arc::clone(s) as Arc<dyn SourceHandle>)
    }

    fn set_current_index(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        if index < state.sources.len() {
            state.current = Some(index);
        }
    }

    fn set_current_next(&self) {
        let mut state = self.state.lock().unwrap();
        let count = state.sources.len();
        if count == 0 {
            return;
        }
        state.current = Some(match state.current {
            Some(i) => (i + 1).min(count - 1),
            None => 0,
        });
    }

    fn set_current_previous(&self) {
        let mut state = self.state.lock().unwrap();
        if state.sources.is_empty() {
            return;
        }
        state.current = Some(match state.current {
            Some(i) => i.saturating_sub(1),
            None => 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_cursor_saturates_at_both_ends() {
        let session = Session::new();
        session.add_source("a");
        session.add_source("b");
        session.add_source("c");
        assert_eq!(session.current_index(), Some(0));
        session.set_current_previous();
        assert_eq!(session.current_index(), Some(0));
        session.set_current_next();
        session.set_current_next();
        session.set_current_next();
        assert_eq!(session.current_index(), Some(2));
    }

    #[test]
    fn snapshot_restores_alpha_and_cursor() {
        let session = Session::new();
        let a = session.add_source("a");
        session.add_source("b");
        session.take_snapshot(); // distance 1 once the next one is taken
        a.set_alpha(0.25);
        session.set_current_index(1);
        session.take_snapshot(); // distance 0: the most recent
        a.set_alpha(0.9);

        // distance 0 recalls the most recent snapshot
        assert!(session.restore_snapshot(0));
        assert!((a.alpha() - 0.25).abs() < 1e-6);
        assert_eq!(session.current_index(), Some(1));

        // distance 1 recalls the oldest
        assert!(session.restore_snapshot(1));
        assert!((a.alpha() - 1.0).abs() < 1e-6);
        assert_eq!(session.current_index(), Some(0));

        // a distance past the end of the list is a no-op
        assert!(!session.restore_snapshot(2));
    }

    #[test]
    fn fading_reaches_target_over_duration() {
        let session = Session::new();
        session.set_fading_target(1.0, Some(100.0));
        session.tick(Duration::from_millis(50));
        let halfway = session.fading();
        assert!(halfway > 0.4 && halfway < 0.6, "halfway was {halfway}");
        session.tick(Duration::from_millis(60));
        assert_eq!(session.fading(), 1.0);
    }

    #[test]
    fn fading_without_duration_snaps_next_tick() {
        let session = Session::new();
        session.set_fading_target(0.7, None);
        session.tick(Duration::from_millis(16));
        assert_eq!(session.fading(), 0.7);
    }

    #[test]
    fn geometry_mutations_accumulate_and_reset() {
        let session = Session::new();
        let s = session.add_source("a");
        s.grab(2.0, 3.0);
        s.grab(1.0, -1.0);
        assert_eq!(s.position(), (3.0, 2.0));
        s.resize(2.0, 2.0);
        assert_eq!(s.scale(), (2.0, 2.0));
        s.turn(0.5);
        assert_eq!(s.angle(), 0.5);
        s.reset_geometry();
        assert_eq!(s.position(), (0.0, 0.0));
        assert_eq!(s.scale(), (1.0, 1.0));
    }
}
