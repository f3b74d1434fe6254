//! mixlink-engine — the composition root of the engine.
//!
//! Everything the core crates treat as a collaborator lives here: the
//! session model the control endpoint mutates, the output-window
//! distributor the renderer samples, and the persisted settings. The
//! `mixlink` binary wires these to the fabric, the streaming manager, the
//! connection registry and the device monitor, then drives the render loop.

pub mod output;
pub mod session;
pub mod settings;

pub use output::{OutputDistributor, OutputWindow, PatternFrame, WindowMode, MAX_WINDOWS};
pub use session::Session;
pub use settings::Settings;
