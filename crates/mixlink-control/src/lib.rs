//! mixlink-control — the remote-control endpoint.
//!
//! A UDP listener parses inbound OSC messages of the shape
//! `/mixlink/<target>/<attribute> {args}` into typed [`Command`]s and
//! dispatches them to the session collaborators; replies go back to the
//! sender's host on the configured send port.
//!
//! ```text
//! datagram ──► translator ──► parser ──► Command ──► dispatch ──► reply bundle
//!              (user table)   (typed,     (no partial application)
//!                              no panics)
//! ```
//!
//! The address translator is the sole extensibility point: a user-editable
//! table mapping inbound addresses verbatim onto canonical ones, applied
//! before parsing and rebuilt atomically on reload.

pub mod command;
pub mod endpoint;
pub mod session;
pub mod translator;

pub use command::{
    Command, CurrentCommand, InfoLevel, OutputCommand, ParseError, SessionCommand,
    SourceCommand, SourceRef,
};
pub use endpoint::{Control, ControlConfig};
pub use session::{SessionControl, SourceHandle};
pub use translator::Translator;
