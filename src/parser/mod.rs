//! PawScript Parser
//!
//! Two-pass parsing: a comment stripper that preserves source positions,
//! then a command splitter that respects quotes, nesting, escapes, and
//! separators. Individual commands are tokenized into typed arguments on
//! dispatch, after substitution.

pub mod arguments;
pub mod comments;
pub mod splitter;
pub mod sugar;
pub mod types;

pub use arguments::{parse_literal, resolve_escapes, split_arguments, tokenize_command, TokenizedCommand};
pub use comments::{strip_comments, CleanedSource};
pub use splitter::split_commands;
pub use sugar::apply_sugar;
pub use types::{MacroContext, ParseException, ParsedCommand, Separator, SourcePosition};

/// Parse source into position-tagged commands in one call.
pub fn parse(
    source: &str,
    filename: Option<&str>,
    line_offset: usize,
    column_offset: usize,
) -> Result<Vec<ParsedCommand>, ParseException> {
    let cleaned = strip_comments(source)?;
    split_commands(&cleaned, filename, line_offset, column_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_comments_and_splits() {
        let cmds = parse("echo a # note\necho b", None, 0, 0).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].text, "echo a");
        assert_eq!(cmds[1].text, "echo b");
    }
}
