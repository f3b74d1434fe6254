//! Output surface distributor: per-window state the renderer samples, and
//! the synthetic frame source feeding the grab fabric.
//!
//! Window parameters (geometry, colour correction, custom-fit distortion)
//! apply immediately and idempotently; the renderer reads a snapshot each
//! tick.

use std::sync::Mutex;

use mixlink_grab::OutputFrame;

pub const MAX_WINDOWS: usize = 4;

// ── Window state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    Windowed,
    Fullscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputWindow {
    pub enabled: bool,
    pub mode: WindowMode,
    /// Monitor the window goes fullscreen on.
    pub monitor: String,
    pub rect: WindowRect,
    pub decorated: bool,
    /// (r, g, b, temperature) correction.
    pub white_balance: [f32; 4],
    pub brightness: f32,
    pub contrast: f32,
    /// Custom-fit distortion nodes, one per corner.
    pub distortion: [[f32; 2]; 4],
    pub show_test_pattern: bool,
}

impl Default for OutputWindow {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: WindowMode::Windowed,
            monitor: String::new(),
            rect: WindowRect {
                x: 0,
                y: 0,
                w: 1280,
                h: 720,
            },
            decorated: true,
            white_balance: [1.0, 1.0, 1.0, 0.5],
            brightness: 0.0,
            contrast: 0.0,
            distortion: [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            show_test_pattern: false,
        }
    }
}

// ── Distributor ───────────────────────────────────────────────────────────────

/// Tracks up to [`MAX_WINDOWS`] output windows.
pub struct OutputDistributor {
    windows: Mutex<Vec<OutputWindow>>,
}

impl Default for OutputDistributor {
    fn default() -> Self {
        let mut windows = vec![OutputWindow::default(); MAX_WINDOWS];
        windows[0].enabled = true;
        Self {
            windows: Mutex::new(windows),
        }
    }
}

impl OutputDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self, index: usize) -> Option<OutputWindow> {
        self.windows.lock().unwrap().get(index).cloned()
    }

    /// All windows, for the renderer to sample once per tick.
    pub fn snapshot(&self) -> Vec<OutputWindow> {
        self.windows.lock().unwrap().clone()
    }

    fn with_window(&self, index: usize, apply: impl FnOnce(&mut OutputWindow)) {
        if let Some(window) = self.windows.lock().unwrap().get_mut(index) {
            apply(window);
        }
    }

    pub fn set_enabled(&self, index: usize, enabled: bool) {
        self.with_window(index, |w| w.enabled = enabled);
    }

    pub fn set_rect(&self, index: usize, rect: WindowRect) {
        self.with_window(index, |w| {
            w.rect = rect;
            w.mode = WindowMode::Windowed;
        });
    }

    pub fn set_fullscreen(&self, index: usize, monitor: &str, on: bool) {
        self.with_window(index, |w| {
            w.mode = if on {
                WindowMode::Fullscreen
            } else {
                WindowMode::Windowed
            };
            w.monitor = monitor.to_owned();
        });
    }

    pub fn set_decorated(&self, index: usize, decorated: bool) {
        self.with_window(index, |w| w.decorated = decorated);
    }

    pub fn set_white_balance(&self, index: usize, balance: [f32; 4]) {
        self.with_window(index, |w| w.white_balance = balance);
    }

    pub fn set_brightness(&self, index: usize, brightness: f32) {
        self.with_window(index, |w| w.brightness = brightness.clamp(-1.0, 1.0));
    }

    pub fn set_contrast(&self, index: usize, contrast: f32) {
        self.with_window(index, |w| w.contrast = contrast.clamp(-1.0, 1.0));
    }

    pub fn set_distortion_node(&self, index: usize, node: usize, value: [f32; 2]) {
        self.with_window(index, |w| {
            if let Some(n) = w.distortion.get_mut(node) {
                *n = value;
            }
        });
    }

    pub fn set_test_pattern(&self, index: usize, on: bool) {
        self.with_window(index, |w| w.show_test_pattern = on);
    }
}

// ── PatternFrame ──────────────────────────────────────────────────────────────

/// Synthetic output frame: a moving gradient attenuated by the session
/// fade, or a checkerboard when the test pattern is requested. Stands in
/// for the GPU renderer, which is an external collaborator.
pub struct PatternFrame {
    pub width: u32,
    pub height: u32,
    pub alpha: bool,
    pub tick: u64,
    /// Output fade in `[0, 1]`; 1 is black.
    pub fading: f32,
    pub test_pattern: bool,
}

impl OutputFrame for PatternFrame {
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
        let channels = if self.alpha { 4 } else { 3 };
        let level = (1.0 - self.fading.clamp(0.0, 1.0)) * 255.0;
        let shift = (self.tick % 256) as u32;
        for y in 0..self.height {
            for x in 0..self.width {
                let i = ((y * self.width + x) as usize) * channels;
                if i + channels > dst.len() {
                    return;
                }
                let (r, g, b) = if self.test_pattern {
                    let on = ((x / 32) + (y / 32)) % 2 == 0;
                    let v = if on { level as u8 } else { 0 };
                    (v, v, v)
                } else {
                    (
                        (((x + shift) % 256) as f32 * level / 255.0) as u8,
                        ((y % 256) as f32 * level / 255.0) as u8,
                        ((shift % 256) as f32 * level / 255.0) as u8,
                    )
                };
                dst[i] = r;
                dst[i + 1] = g;
                dst[i + 2] = b;
                if channels == 4 {
                    dst[i + 3] = 255;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_are_idempotent() {
        let outputs = OutputDistributor::new();
        let rect = WindowRect {
            x: 10,
            y: 20,
            w: 640,
            h: 360,
        };
        outputs.set_rect(0, rect);
        outputs.set_rect(0, rect);
        assert_eq!(outputs.window(0).unwrap().rect, rect);

        outputs.set_fullscreen(1, "HDMI-1", true);
        let w = outputs.window(1).unwrap();
        assert_eq!(w.mode, WindowMode::Fullscreen);
        assert_eq!(w.monitor, "HDMI-1");
        // leaving fullscreen keeps the monitor binding
        outputs.set_fullscreen(1, "HDMI-1", false);
        assert_eq!(outputs.window(1).unwrap().mode, WindowMode::Windowed);
    }

    #[test]
    fn out_of_range_windows_are_ignored() {
        let outputs = OutputDistributor::new();
        outputs.set_brightness(MAX_WINDOWS + 1, 0.5);
        assert!(outputs.window(MAX_WINDOWS + 1).is_none());
        assert_eq!(outputs.snapshot().len(), MAX_WINDOWS);
    }

    #[test]
    fn distortion_nodes_update_individually() {
        let outputs = OutputDistributor::new();
        outputs.set_distortion_node(0, 2, [0.9, 0.8]);
        let w = outputs.window(0).unwrap();
        assert_eq!(w.distortion[2], [0.9, 0.8]);
        assert_eq!(w.distortion[0], [0.0, 0.0]);
    }

    #[test]
    fn fully_faded_pattern_is_black() {
        let frame = PatternFrame {
            width: 8,
            height: 8,
            alpha: false,
            tick: 42,
            fading: 1.0,
            test_pattern: false,
        };
        let mut dst = vec![7u8; 8 * 8 * 3];
        frame.read_pixels(&mut dst);
        assert!(dst.iter().all(|&b| b == 0));
    }
}
