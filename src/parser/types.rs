//! Parser Types
//!
//! Shared types used across parser modules: source positions, parsed
//! commands, separators, and the parse error type.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// Parser limits to prevent hangs and resource exhaustion
pub const MAX_INPUT_SIZE: usize = 1_000_000; // 1MB max input

/// How a command relates to the command before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// First command of a sequence.
    None,
    /// `;` or newline: always run.
    Seq,
    /// `&`: run only when the previous command succeeded.
    And,
    /// `|`: run only when the previous command failed.
    Or,
}

impl Separator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Separator::None => "",
            Separator::Seq => ";",
            Separator::And => "&",
            Separator::Or => "|",
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b';' | b'\n' => Some(Separator::Seq),
            b'&' => Some(Separator::And),
            b'|' => Some(Separator::Or),
            _ => None,
        }
    }
}

/// A position in the original source text. Lines and columns are 1-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
    /// Length in bytes of the region the position points at.
    pub length: usize,
    /// The source line or command the position belongs to, kept for error
    /// context rendering.
    pub original_text: Option<String>,
    pub filename: Option<String>,
    pub macro_context: Option<Arc<MacroContext>>,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            length: 0,
            original_text: None,
            filename: None,
            macro_context: None,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.original_text = Some(text.into());
        self
    }

    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename;
        self
    }

    /// Shift a position that was computed relative to an embedded piece of
    /// source (a brace body, a macro body, a block) into the coordinates of
    /// the enclosing source. Only the first line of the embedded text sits
    /// on the same line as the enclosing offset, so the column offset
    /// applies there alone.
    pub fn offset_by(mut self, line_offset: usize, column_offset: usize) -> Self {
        if self.line == 1 {
            self.column += column_offset;
        }
        self.line += line_offset;
        self
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filename {
            Some(name) => write!(f, "{}:{}:{}", name, self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// One link of the macro invocation chain a position was reached through.
/// Used only for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroContext {
    pub macro_name: String,
    pub definition_site: SourcePosition,
    pub invocation_site: SourcePosition,
    pub parent: Option<Arc<MacroContext>>,
}

impl MacroContext {
    /// Render the invocation chain innermost-first for error output.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "in macro '{}' (defined at {}, invoked at {})",
            self.macro_name, self.definition_site, self.invocation_site
        );
        let mut cursor = self.parent.clone();
        while let Some(ctx) = cursor {
            out.push_str(&format!(
                "\n  from macro '{}' invoked at {}",
                ctx.macro_name, ctx.invocation_site
            ));
            cursor = ctx.parent.clone();
        }
        out
    }
}

/// A single command produced by the splitter, still in textual form.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub text: String,
    pub position: SourcePosition,
    /// The separator that terminated the *previous* command.
    pub separator: Separator,
}

#[derive(Debug, Clone, Error)]
pub struct ParseException {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}:{}: {}", self.line, self.column, self.message)
    }
}

impl ParseException {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn position(&self) -> SourcePosition {
        SourcePosition::new(self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_from_byte() {
        assert_eq!(Separator::from_byte(b';'), Some(Separator::Seq));
        assert_eq!(Separator::from_byte(b'\n'), Some(Separator::Seq));
        assert_eq!(Separator::from_byte(b'&'), Some(Separator::And));
        assert_eq!(Separator::from_byte(b'|'), Some(Separator::Or));
        assert_eq!(Separator::from_byte(b'x'), None);
    }

    #[test]
    fn test_offset_applies_column_only_on_first_line() {
        let p = SourcePosition::new(1, 4).offset_by(2, 10);
        assert_eq!((p.line, p.column), (3, 14));

        let p = SourcePosition::new(2, 4).offset_by(2, 10);
        assert_eq!((p.line, p.column), (4, 4));
    }

    #[test]
    fn test_display_with_filename() {
        let p = SourcePosition::new(3, 7).with_filename(Some("boot.paw".into()));
        assert_eq!(p.to_string(), "boot.paw:3:7");
    }
}
