//! Engine Errors and Control Flow
//!
//! `EngineError` covers failures that abort one command (parse errors,
//! unknown commands, substitution failures); inside a sequence they are
//! logged and convert to a false status so sibling commands still run.
//!
//! `Flow` is the separate channel for command outcomes and control-flow
//! signals (`ret`, `break`, `continue`). Signals are not errors: they
//! propagate to the nearest collector and convert to their carried status
//! at the engine's top frame.

use thiserror::Error;

use crate::parser::types::{ParseException, SourcePosition};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse error at {position}: {message}")]
    Parse {
        message: String,
        position: SourcePosition,
    },

    #[error("unknown command '{name}' at {position}")]
    UnknownCommand {
        name: String,
        position: SourcePosition,
    },

    #[error("substitution failed at {position}: {message}")]
    Substitution {
        message: String,
        position: SourcePosition,
    },

    #[error("macro recursion depth {0} exceeded")]
    MacroDepthExceeded(usize),

    #[error("macros are disabled by configuration")]
    MacrosDisabled,

    #[error("loop iteration limit {0} exceeded")]
    IterationLimitExceeded(usize),

    #[error("unknown token '{0}'")]
    TokenNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The source position the error points at, when it carries one.
    pub fn position(&self) -> Option<&SourcePosition> {
        match self {
            EngineError::Parse { position, .. }
            | EngineError::UnknownCommand { position, .. }
            | EngineError::Substitution { position, .. } => Some(position),
            _ => None,
        }
    }

    pub fn parse(err: ParseException, base: &SourcePosition) -> Self {
        let position = err.position().offset_by(base.line.saturating_sub(1), {
            // Errors on the first line of an embedded string shift by the
            // base column; deeper lines already carry absolute columns.
            if err.line == 1 {
                base.column.saturating_sub(1)
            } else {
                0
            }
        });
        EngineError::Parse {
            message: err.message,
            position: position.with_filename(base.filename.clone()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// The outcome of executing a command, sequence, or script.
#[derive(Debug)]
pub enum Flow {
    /// Completed with a status.
    Status(bool),
    /// Suspended on a token; the id stands in for the in-flight command.
    Token(String),
    /// `ret` was reached: terminate the enclosing macro body.
    Return { status: bool },
    /// `break` was reached: exit the enclosing loop.
    Break { status: bool },
    /// `continue` was reached: skip to the next loop iteration.
    Continue { status: bool },
}

impl Flow {
    /// The boolean status carried by a non-token flow; tokens have no
    /// status yet and report `false` here.
    pub fn carried_status(&self) -> bool {
        match self {
            Flow::Status(b)
            | Flow::Return { status: b }
            | Flow::Break { status: b }
            | Flow::Continue { status: b } => *b,
            Flow::Token(_) => false,
        }
    }

    pub fn is_token(&self) -> bool {
        matches!(self, Flow::Token(_))
    }

    /// Negate the status of a completed flow; tokens are inverted at
    /// resolution time through an inverter token instead.
    pub fn invert(self) -> Flow {
        match self {
            Flow::Status(b) => Flow::Status(!b),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_offsets_into_base_position() {
        let err = ParseException::new("unclosed quote", 1, 5);
        let base = SourcePosition::new(3, 10);
        let engine_err = EngineError::parse(err, &base);
        match engine_err {
            EngineError::Parse { position, .. } => {
                assert_eq!((position.line, position.column), (3, 14));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_carried_status() {
        assert!(Flow::Status(true).carried_status());
        assert!(!Flow::Status(false).carried_status());
        assert!(Flow::Return { status: true }.carried_status());
        assert!(!Flow::Token("token_1".into()).carried_status());
    }

    #[test]
    fn test_invert_only_touches_status() {
        assert!(matches!(Flow::Status(false).invert(), Flow::Status(true)));
        assert!(matches!(
            Flow::Token("token_1".into()).invert(),
            Flow::Token(_)
        ));
    }
}
