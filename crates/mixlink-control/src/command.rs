//! Typed parsing of control messages.
//!
//! Parsing yields a [`Command`] or a [`ParseError`]; nothing is mutated
//! until the whole message validated, so a command can never partially
//! apply. Numeric arguments accept the OSC tags `f`, `i`, `T`/`F` and
//! coerce to float; any other tag is a type mismatch.

use rosc::OscType;
use thiserror::Error;

use mixlink_net::osc;

// ── Address fragments ─────────────────────────────────────────────────────────

pub const OSC_SYNC: &str = "sync";

pub const OSC_INFO: &str = "info";
pub const OSC_INFO_LOG: &str = "log";
pub const OSC_INFO_NOTIFY: &str = "notify";

pub const OSC_OUTPUT: &str = "output";
pub const OSC_OUTPUT_ENABLE: &str = "enable";
pub const OSC_OUTPUT_DISABLE: &str = "disable";
pub const OSC_OUTPUT_FADING: &str = "fading";
pub const OSC_OUTPUT_FADE_IN: &str = "fade-in";
pub const OSC_OUTPUT_FADE_OUT: &str = "fade-out";

pub const OSC_SESSION: &str = "session";
pub const OSC_SESSION_VERSION: &str = "version";

pub const OSC_ALL: &str = "all";
pub const OSC_SELECTED: &str = "selected";
pub const OSC_CURRENT: &str = "current";
pub const OSC_NEXT: &str = "next";
pub const OSC_PREVIOUS: &str = "previous";

pub const OSC_SOURCE_NAME: &str = "name";
pub const OSC_SOURCE_PLAY: &str = "play";
pub const OSC_SOURCE_PAUSE: &str = "pause";
pub const OSC_SOURCE_REPLAY: &str = "replay";
pub const OSC_SOURCE_ALPHA: &str = "alpha";
pub const OSC_SOURCE_LOOM: &str = "loom";
pub const OSC_SOURCE_TRANSPARENCY: &str = "transparency";
pub const OSC_SOURCE_DEPTH: &str = "depth";
pub const OSC_SOURCE_GRAB: &str = "grab";
pub const OSC_SOURCE_RESIZE: &str = "resize";
pub const OSC_SOURCE_TURN: &str = "turn";
pub const OSC_SOURCE_RESET: &str = "reset";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("malformed address '{0}'")]
    Malformed(String),
    #[error("unknown target '{0}'")]
    UnknownTarget(String),
    #[error("unknown attribute '{attribute}' for target '{target}'")]
    UnknownAttribute { target: String, attribute: String },
    #[error("missing argument for attribute '{0}'")]
    MissingArgument(String),
    #[error("invalid argument for attribute '{0}'")]
    WrongArgumentType(String),
    #[error("too many arguments for attribute '{0}'")]
    ExcessArguments(String),
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoLevel {
    Log,
    Notify,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputCommand {
    Enable(f32),
    Disable(f32),
    Fading { target: f32, duration_ms: Option<f32> },
    FadeIn(f32),
    FadeOut(f32),
    Sync,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Version(f32),
    Sync,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceCommand {
    Play(f32),
    Pause(f32),
    Replay,
    Alpha(f32),
    Transparency(f32),
    Loom(f32),
    Depth(f32),
    Grab { x: f32, y: f32 },
    Resize { x: f32, y: f32 },
    Turn(f32),
    Reset,
    Sync,
}

/// Commands on the `current` target. The optional `pad` is the number of
/// per-source status entries the reply should be padded to.
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentCommand {
    Next { pad: Option<f32> },
    Previous { pad: Option<f32> },
    Select { index: i32, pad: Option<f32> },
    Sync { pad: Option<f32> },
    Apply(SourceCommand),
}

/// A single source addressed by exact name, falling back to index.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRef {
    Name(String),
    Index(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Info(InfoLevel),
    Output(OutputCommand),
    Session(SessionCommand),
    Current(CurrentCommand),
    All(SourceCommand),
    Selected(SourceCommand),
    Source(SourceRef, SourceCommand),
}

// ── Argument helpers ──────────────────────────────────────────────────────────

fn float_at(args: &[OscType], index: usize, attr: &str) -> Result<f32, ParseError> {
    let arg = args
        .get(index)
        .ok_or_else(|| ParseError::MissingArgument(attr.to_owned()))?;
    osc::float(arg).ok_or_else(|| ParseError::WrongArgumentType(attr.to_owned()))
}

fn float_opt(args: &[OscType], index: usize, attr: &str) -> Result<Option<f32>, ParseError> {
    match args.get(index) {
        None => Ok(None),
        Some(arg) => osc::float(arg)
            .map(Some)
            .ok_or_else(|| ParseError::WrongArgumentType(attr.to_owned())),
    }
}

fn at_most(args: &[OscType], count: usize, attr: &str) -> Result<(), ParseError> {
    if args.len() > count {
        Err(ParseError::ExcessArguments(attr.to_owned()))
    } else {
        Ok(())
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse one (already translated) address + argument list into a command.
pub fn parse(address: &str, args: &[OscType]) -> Result<Command, ParseError> {
    let mut parts = address.split(osc::OSC_SEPARATOR);
    let malformed = || ParseError::Malformed(address.to_owned());

    // "/mixlink/target/attribute" splits to ["", "mixlink", target, attribute]
    if !parts.next().is_some_and(str::is_empty) {
        return Err(malformed());
    }
    let prefix = parts.next().ok_or_else(malformed)?;
    if osc::OSC_PREFIX.trim_start_matches(osc::OSC_SEPARATOR) != prefix {
        return Err(malformed());
    }
    let target = parts.next().filter(|t| !t.is_empty()).ok_or_else(malformed)?;
    let attribute = parts.next().filter(|a| !a.is_empty()).ok_or_else(malformed)?;

    match target {
        OSC_INFO => match attribute {
            OSC_INFO_LOG => Ok(Command::Info(InfoLevel::Log)),
            OSC_INFO_NOTIFY => Ok(Command::Info(InfoLevel::Notify)),
            other => Err(ParseError::UnknownAttribute {
                target: target.to_owned(),
                attribute: other.to_owned(),
            }),
        },
        OSC_OUTPUT => parse_output(attribute, args).map(Command::Output),
        OSC_SESSION => parse_session(attribute, args).map(Command::Session),
        OSC_CURRENT => parse_current(attribute, args).map(Command::Current),
        OSC_ALL => parse_source(attribute, args).map(Command::All),
        OSC_SELECTED => parse_source(attribute, args).map(Command::Selected),
        name_or_index => {
            let source = match name_or_index.parse::<i32>() {
                Ok(index) => SourceRef::Index(index),
                Err(_) => SourceRef::Name(name_or_index.to_owned()),
            };
            parse_source(attribute, args).map(|cmd| Command::Source(source, cmd))
        }
    }
}

fn parse_output(attribute: &str, args: &[OscType]) -> Result<OutputCommand, ParseError> {
    match attribute {
        OSC_SYNC => {
            at_most(args, 0, attribute)?;
            Ok(OutputCommand::Sync)
        }
        OSC_OUTPUT_ENABLE => {
            at_most(args, 1, attribute)?;
            Ok(OutputCommand::Enable(float_opt(args, 0, attribute)?.unwrap_or(1.0)))
        }
        OSC_OUTPUT_DISABLE => {
            at_most(args, 1, attribute)?;
            Ok(OutputCommand::Disable(float_opt(args, 0, attribute)?.unwrap_or(1.0)))
        }
        OSC_OUTPUT_FADING => {
            at_most(args, 2, attribute)?;
            Ok(OutputCommand::Fading {
                target: float_at(args, 0, attribute)?,
                duration_ms: float_opt(args, 1, attribute)?,
            })
        }
        OSC_OUTPUT_FADE_IN => {
            at_most(args, 1, attribute)?;
            Ok(OutputCommand::FadeIn(float_opt(args, 0, attribute)?.unwrap_or(0.0)))
        }
        OSC_OUTPUT_FADE_OUT => {
            at_most(args, 1, attribute)?;
            Ok(OutputCommand::FadeOut(float_opt(args, 0, attribute)?.unwrap_or(0.0)))
        }
        other => Err(ParseError::UnknownAttribute {
            target: OSC_OUTPUT.to_owned(),
            attribute: other.to_owned(),
        }),
    }
}

fn parse_session(attribute: &str, args: &[OscType]) -> Result<SessionCommand, ParseError> {
    match attribute {
        OSC_SYNC => {
            at_most(args, 1, attribute)?;
            Ok(SessionCommand::Sync)
        }
        OSC_SESSION_VERSION => {
            at_most(args, 1, attribute)?;
            Ok(SessionCommand::Version(float_at(args, 0, attribute)?))
        }
        other => Err(ParseError::UnknownAttribute {
            target: OSC_SESSION.to_owned(),
            attribute: other.to_owned(),
        }),
    }
}

fn parse_current(attribute: &str, args: &[OscType]) -> Result<CurrentCommand, ParseError> {
    match attribute {
        OSC_NEXT => {
            at_most(args, 1, attribute)?;
            Ok(CurrentCommand::Next { pad: float_opt(args, 0, attribute)? })
        }
        OSC_PREVIOUS => {
            at_most(args, 1, attribute)?;
            Ok(CurrentCommand::Previous { pad: float_opt(args, 0, attribute)? })
        }
        OSC_SYNC => {
            at_most(args, 1, attribute)?;
            Ok(CurrentCommand::Sync { pad: float_opt(args, 0, attribute)? })
        }
        other => {
            if let Ok(index) = other.parse::<i32>() {
                at_most(args, 1, attribute)?;
                return Ok(CurrentCommand::Select {
                    index,
                    pad: float_opt(args, 0, attribute)?,
                });
            }
            parse_source(attribute, args).map(CurrentCommand::Apply)
        }
    }
}

fn parse_source(attribute: &str, args: &[OscType]) -> Result<SourceCommand, ParseError> {
    match attribute {
        OSC_SYNC => {
            at_most(args, 0, attribute)?;
            Ok(SourceCommand::Sync)
        }
        OSC_SOURCE_PLAY => {
            at_most(args, 1, attribute)?;
            Ok(SourceCommand::Play(float_opt(args, 0, attribute)?.unwrap_or(1.0)))
        }
        OSC_SOURCE_PAUSE => {
            at_most(args, 1, attribute)?;
            Ok(SourceCommand::Pause(float_opt(args, 0, attribute)?.unwrap_or(1.0)))
        }
        OSC_SOURCE_REPLAY => {
            at_most(args, 0, attribute)?;
            Ok(SourceCommand::Replay)
        }
        OSC_SOURCE_ALPHA => {
            at_most(args, 1, attribute)?;
            Ok(SourceCommand::Alpha(float_at(args, 0, attribute)?))
        }
        OSC_SOURCE_TRANSPARENCY => {
            at_most(args, 1, attribute)?;
            Ok(SourceCommand::Transparency(float_at(args, 0, attribute)?))
        }
        OSC_SOURCE_LOOM => {
            at_most(args, 1, attribute)?;
            Ok(SourceCommand::Loom(float_at(args, 0, attribute)?))
        }
        OSC_SOURCE_DEPTH => {
            at_most(args, 1, attribute)?;
            Ok(SourceCommand::Depth(float_at(args, 0, attribute)?))
        }
        OSC_SOURCE_GRAB => {
            at_most(args, 2, attribute)?;
            Ok(SourceCommand::Grab {
                x: float_at(args, 0, attribute)?,
                y: float_at(args, 1, attribute)?,
            })
        }
        OSC_SOURCE_RESIZE => {
            at_most(args, 2, attribute)?;
            Ok(SourceCommand::Resize {
                x: float_at(args, 0, attribute)?,
                y: float_at(args, 1, attribute)?,
            })
        }
        OSC_SOURCE_TURN => {
            // a second argument is tolerated and ignored
            at_most(args, 2, attribute)?;
            let angle = float_at(args, 0, attribute)?;
            float_opt(args, 1, attribute)?;
            Ok(SourceCommand::Turn(angle))
        }
        OSC_SOURCE_RESET => {
            at_most(args, 0, attribute)?;
            Ok(SourceCommand::Reset)
        }
        other => Err(ParseError::UnknownAttribute {
            target: "source".to_owned(),
            attribute: other.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(v: f32) -> OscType {
        OscType::Float(v)
    }

    #[test]
    fn rejects_foreign_prefixes_and_short_addresses() {
        assert!(matches!(
            parse("/other/output/enable", &[]),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse("/mixlink/output", &[]),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse("mixlink/output/enable", &[]),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn output_enable_defaults_to_one() {
        assert_eq!(
            parse("/mixlink/output/enable", &[]),
            Ok(Command::Output(OutputCommand::Enable(1.0)))
        );
        assert_eq!(
            parse("/mixlink/output/enable", &[f(0.0)]),
            Ok(Command::Output(OutputCommand::Enable(0.0)))
        );
    }

    #[test]
    fn fading_takes_optional_duration() {
        assert_eq!(
            parse("/mixlink/output/fading", &[f(0.2)]),
            Ok(Command::Output(OutputCommand::Fading {
                target: 0.2,
                duration_ms: None
            }))
        );
        assert_eq!(
            parse("/mixlink/output/fading", &[f(1.0), f(300.0)]),
            Ok(Command::Output(OutputCommand::Fading {
                target: 1.0,
                duration_ms: Some(300.0)
            }))
        );
        assert_eq!(
            parse("/mixlink/output/fading", &[]),
            Err(ParseError::MissingArgument("fading".to_owned()))
        );
    }

    #[test]
    fn session_version_requires_a_number() {
        assert_eq!(
            parse("/mixlink/session/version", &[f(2.0)]),
            Ok(Command::Session(SessionCommand::Version(2.0)))
        );
        assert_eq!(
            parse(
                "/mixlink/session/version",
                &[OscType::String("two".to_owned())]
            ),
            Err(ParseError::WrongArgumentType("version".to_owned()))
        );
    }

    #[test]
    fn current_next_and_index_selection() {
        assert_eq!(
            parse("/mixlink/current/next", &[]),
            Ok(Command::Current(CurrentCommand::Next { pad: None }))
        );
        assert_eq!(
            parse("/mixlink/current/2", &[]),
            Ok(Command::Current(CurrentCommand::Select { index: 2, pad: None }))
        );
        assert_eq!(
            parse("/mixlink/current/alpha", &[f(0.3)]),
            Ok(Command::Current(CurrentCommand::Apply(SourceCommand::Alpha(0.3))))
        );
    }

    #[test]
    fn source_by_name_and_by_index() {
        assert_eq!(
            parse("/mixlink/lava/play", &[]),
            Ok(Command::Source(
                SourceRef::Name("lava".to_owned()),
                SourceCommand::Play(1.0)
            ))
        );
        assert_eq!(
            parse("/mixlink/3/turn", &[f(1.0), f(9.0)]),
            Ok(Command::Source(SourceRef::Index(3), SourceCommand::Turn(1.0)))
        );
    }

    #[test]
    fn grab_needs_two_floats() {
        assert_eq!(
            parse("/mixlink/current/grab", &[f(10.0), f(2.2)]),
            Ok(Command::Current(CurrentCommand::Apply(SourceCommand::Grab {
                x: 10.0,
                y: 2.2
            })))
        );
        assert_eq!(
            parse("/mixlink/current/grab", &[f(10.0)]),
            Err(ParseError::MissingArgument("grab".to_owned()))
        );
    }

    #[test]
    fn excess_arguments_are_an_error() {
        assert_eq!(
            parse("/mixlink/current/alpha", &[f(0.1), f(0.2)]),
            Err(ParseError::ExcessArguments("alpha".to_owned()))
        );
    }

    #[test]
    fn bool_and_int_tags_coerce_to_float() {
        assert_eq!(
            parse("/mixlink/current/play", &[OscType::Bool(true)]),
            Ok(Command::Current(CurrentCommand::Apply(SourceCommand::Play(1.0))))
        );
        assert_eq!(
            parse("/mixlink/current/depth", &[OscType::Int(5)]),
            Ok(Command::Current(CurrentCommand::Apply(SourceCommand::Depth(5.0))))
        );
    }

    #[test]
    fn unknown_target_attribute_pairs() {
        assert_eq!(
            parse("/mixlink/output/warp", &[]),
            Err(ParseError::UnknownAttribute {
                target: "output".to_owned(),
                attribute: "warp".to_owned()
            })
        );
        assert_eq!(
            parse("/mixlink/info/whisper", &[]),
            Err(ParseError::UnknownAttribute {
                target: "info".to_owned(),
                attribute: "whisper".to_owned()
            })
        );
    }
}
