//! Command Splitter
//!
//! Second parser pass: splits cleaned source into position-tagged
//! commands. Separators (`;`, `&`, `|`, newline) only count at nesting
//! depth zero and outside quotes; the separator that terminated a command
//! is attached to the command that follows it.

use crate::parser::comments::CleanedSource;
use crate::parser::types::{ParseException, ParsedCommand, Separator, SourcePosition};

/// Split cleaned source into commands. `line_offset`/`column_offset`
/// shift reported positions into the coordinates of an enclosing source
/// (macro bodies, brace contents, blocks).
pub fn split_commands(
    cleaned: &CleanedSource,
    filename: Option<&str>,
    line_offset: usize,
    column_offset: usize,
) -> Result<Vec<ParsedCommand>, ParseException> {
    let text = cleaned.text.as_str();
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    let position_of = |byte: usize| -> SourcePosition {
        let (line, col) = cleaned.position_at(byte);
        SourcePosition::new(line, col)
            .offset_by(line_offset, column_offset)
            .with_filename(filename.map(|f| f.to_string()))
    };

    let mut commands: Vec<ParsedCommand> = Vec::new();
    let mut pending = Separator::None;
    let mut seg_start = 0usize;
    let mut depth: Vec<(char, usize)> = Vec::new();
    let mut quote: Option<(char, usize)> = None;

    let mut push_segment = |start: usize, end: usize, separator: Separator, commands: &mut Vec<ParsedCommand>| {
        let segment = &text[start..end];
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            return;
        }
        let lead = segment.len() - segment.trim_start().len();
        let position = position_of(start + lead)
            .with_length(trimmed.len())
            .with_text(trimmed);
        commands.push(ParsedCommand {
            text: trimmed.to_string(),
            position,
            separator,
        });
    };

    let mut i = 0usize;
    while i < chars.len() {
        let (byte, c) = chars[i];

        if c == '\\' {
            i += 2;
            continue;
        }

        if let Some((q, _)) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some((c, byte));
                i += 1;
            }
            '(' | '[' | '{' => {
                depth.push((c, byte));
                i += 1;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match depth.last() {
                    Some(&(open, _)) if open == expected => {
                        depth.pop();
                    }
                    _ => {
                        let pos = position_of(byte);
                        return Err(ParseException::new(
                            format!("unmatched '{}'", c),
                            pos.line,
                            pos.column,
                        ));
                    }
                }
                i += 1;
            }
            ';' | '&' | '|' | '\n' if depth.is_empty() => {
                push_segment(seg_start, byte, pending, &mut commands);
                pending = Separator::from_byte(c as u8).unwrap_or(Separator::Seq);
                seg_start = byte + 1;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    if let Some((q, open_byte)) = quote {
        let pos = position_of(open_byte);
        return Err(ParseException::new(
            format!("unclosed {} quote", if q == '\'' { "single" } else { "double" }),
            pos.line,
            pos.column,
        ));
    }
    if let Some(&(open, open_byte)) = depth.last() {
        let pos = position_of(open_byte);
        return Err(ParseException::new(
            format!("unclosed '{}'", open),
            pos.line,
            pos.column,
        ));
    }

    push_segment(seg_start, text.len(), pending, &mut commands);
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::comments::strip_comments;

    fn split(src: &str) -> Vec<ParsedCommand> {
        let cleaned = strip_comments(src).unwrap();
        split_commands(&cleaned, None, 0, 0).unwrap()
    }

    #[test]
    fn test_split_on_semicolon() {
        let cmds = split("echo a; echo b");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].text, "echo a");
        assert_eq!(cmds[0].separator, Separator::None);
        assert_eq!(cmds[1].text, "echo b");
        assert_eq!(cmds[1].separator, Separator::Seq);
    }

    #[test]
    fn test_newline_is_semicolon() {
        let cmds = split("echo a\necho b");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].separator, Separator::Seq);
    }

    #[test]
    fn test_and_or_separators() {
        let cmds = split("false & echo x | echo y");
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0].separator, Separator::None);
        assert_eq!(cmds[1].separator, Separator::And);
        assert_eq!(cmds[2].separator, Separator::Or);
    }

    #[test]
    fn test_separators_inside_quotes_do_not_split() {
        let cmds = split("echo \"a; b & c\"");
        assert_eq!(cmds.len(), 1);
    }

    #[test]
    fn test_separators_inside_nesting_do_not_split() {
        let cmds = split("when (a; b), {c | d}");
        assert_eq!(cmds.len(), 1);
        let cmds = split("echo [a; b]");
        assert_eq!(cmds.len(), 1);
    }

    #[test]
    fn test_escaped_separator_is_literal() {
        let cmds = split("echo a\\; echo b");
        assert_eq!(cmds.len(), 1);
    }

    #[test]
    fn test_blank_segments_are_dropped() {
        let cmds = split("echo a;;  ;echo b");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].separator, Separator::Seq);
    }

    #[test]
    fn test_unclosed_quote_reports_opening_position() {
        let cleaned = strip_comments("echo \"abc").unwrap();
        let err = split_commands(&cleaned, None, 0, 0).unwrap_err();
        assert_eq!((err.line, err.column), (1, 6));
    }

    #[test]
    fn test_unclosed_paren_is_an_error() {
        let cleaned = strip_comments("echo (a b").unwrap();
        assert!(split_commands(&cleaned, None, 0, 0).is_err());
    }

    #[test]
    fn test_positions_track_lines() {
        let cmds = split("echo a\n  echo b");
        assert_eq!(cmds[1].position.line, 2);
        assert_eq!(cmds[1].position.column, 3);
    }

    #[test]
    fn test_positions_honor_offsets() {
        let cleaned = strip_comments("echo a; echo b").unwrap();
        let cmds = split_commands(&cleaned, None, 4, 10).unwrap();
        assert_eq!(cmds[0].position.line, 5);
        assert_eq!(cmds[0].position.column, 11);
        assert_eq!(cmds[1].position.column, 19);
    }
}
