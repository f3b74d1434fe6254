//! Collaborator traits the control endpoint dispatches to.
//!
//! The engine implements these over its session model; implementations are
//! internally synchronised, so the endpoint can call them straight from its
//! receive task.

use std::sync::Arc;

/// One source of the session, as mutated by remote control.
pub trait SourceHandle: Send + Sync {
    fn name(&self) -> String;
    fn playing(&self) -> bool;
    fn alpha(&self) -> f32;
    fn depth(&self) -> f32;

    fn set_playing(&self, playing: bool);
    /// Rewind to the beginning.
    fn replay(&self);
    fn set_alpha(&self, alpha: f32);
    fn set_depth(&self, depth: f32);
    /// Translate by `(dx, dy)` in output units.
    fn grab(&self, dx: f32, dy: f32);
    /// Scale by `(sx, sy)`.
    fn resize(&self, sx: f32, sy: f32);
    /// Rotate by `angle`.
    fn turn(&self, angle: f32);
    fn reset_geometry(&self);
}

/// Session-level state: output rendering, fading, snapshots, the source set
/// and its cursors.
pub trait SessionControl: Send + Sync {
    // output
    fn render_disabled(&self) -> bool;
    fn set_render_disabled(&self, disabled: bool);
    fn fading(&self) -> f32;
    fn set_fading_target(&self, target: f32, duration_ms: Option<f32>);

    // snapshots
    fn snapshot_count(&self) -> usize;
    /// Restore the snapshot `distance` steps back from the most recent
    /// (0 is the most recent). False when `distance` is out of range.
    fn restore_snapshot(&self, distance: usize) -> bool;

    // sources
    fn source_count(&self) -> usize;
    fn source_at(&self, index: usize) -> Option<Arc<dyn SourceHandle>>;
    fn find_source(&self, name: &str) -> Option<Arc<dyn SourceHandle>>;
    fn all_sources(&self) -> Vec<Arc<dyn SourceHandle>>;
    fn selection(&self) -> Vec<Arc<dyn SourceHandle>>;

    // current-source cursor
    fn current_index(&self) -> Option<usize>;
    fn current_source(&self) -> Option<Arc<dyn SourceHandle>>;
    fn set_current_index(&self, index: usize);
    fn set_current_next(&self);
    fn set_current_previous(&self);
}
