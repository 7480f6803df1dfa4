//! Comment Stripper
//!
//! First parser pass: removes line comments and nestable block comments
//! while building a map from every byte of the cleaned text back to its
//! line and column in the original source. All later passes work on the
//! cleaned text and report positions through the map.
//!
//! Rules:
//! - `#` starts a line comment only at the start of a line or after
//!   whitespace, and only when followed by whitespace or end of input.
//!   `#!` (shebang) and forms like `#5` stay literal.
//! - `#(...)#` and `#{...}#` are block comments, nestable with the same
//!   opener. Quoted strings inside them are skipped.
//! - `#` inside single or double quotes is literal.
//! - A backslash consumes the following character verbatim.

use crate::parser::types::{ParseException, MAX_INPUT_SIZE};

/// The cleaned source text plus the position map.
#[derive(Debug, Clone)]
pub struct CleanedSource {
    pub text: String,
    /// (line, column) of each byte of `text` in the original source,
    /// 1-based. Multi-byte characters repeat their position per byte.
    map: Vec<(usize, usize)>,
}

impl CleanedSource {
    /// Original (line, column) of a byte offset into the cleaned text.
    /// Offsets at or past the end clamp to one column past the last byte.
    pub fn position_at(&self, byte: usize) -> (usize, usize) {
        if let Some(&(line, col)) = self.map.get(byte) {
            return (line, col);
        }
        match self.map.last() {
            Some(&(line, col)) => (line, col + 1),
            None => (1, 1),
        }
    }
}

/// Strip comments from `source`, preserving positions.
pub fn strip_comments(source: &str) -> Result<CleanedSource, ParseException> {
    if source.len() > MAX_INPUT_SIZE {
        return Err(ParseException::new(
            format!("input exceeds maximum size of {} bytes", MAX_INPUT_SIZE),
            1,
            1,
        ));
    }

    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut map: Vec<(usize, usize)> = Vec::with_capacity(source.len());

    let mut line = 1usize;
    let mut col = 1usize;
    let mut i = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    // True at line start and after a whitespace character was emitted.
    let mut after_ws = true;

    let mut emit = |c: char, line: usize, col: usize, out: &mut String, map: &mut Vec<(usize, usize)>| {
        out.push(c);
        for _ in 0..c.len_utf8() {
            map.push((line, col));
        }
    };

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' {
            emit(c, line, col, &mut out, &mut map);
            advance(&mut line, &mut col, c);
            i += 1;
            if i < chars.len() {
                let next = chars[i];
                emit(next, line, col, &mut out, &mut map);
                advance(&mut line, &mut col, next);
                i += 1;
            }
            after_ws = false;
            continue;
        }

        if in_single {
            if c == '\'' {
                in_single = false;
            }
            emit(c, line, col, &mut out, &mut map);
            advance(&mut line, &mut col, c);
            after_ws = c.is_whitespace();
            i += 1;
            continue;
        }

        if in_double {
            if c == '"' {
                in_double = false;
            }
            emit(c, line, col, &mut out, &mut map);
            advance(&mut line, &mut col, c);
            after_ws = c.is_whitespace();
            i += 1;
            continue;
        }

        match c {
            '\'' => {
                in_single = true;
                emit(c, line, col, &mut out, &mut map);
                advance(&mut line, &mut col, c);
                after_ws = false;
                i += 1;
            }
            '"' => {
                in_double = true;
                emit(c, line, col, &mut out, &mut map);
                advance(&mut line, &mut col, c);
                after_ws = false;
                i += 1;
            }
            '#' => {
                let next = chars.get(i + 1).copied();
                match next {
                    Some(opener @ ('(' | '{')) => {
                        // Block comment: consume through the matching )# or }#
                        advance(&mut line, &mut col, c);
                        advance(&mut line, &mut col, opener);
                        i += 2;
                        skip_block_comment(&chars, &mut i, &mut line, &mut col, opener);
                    }
                    Some(w) if after_ws && w.is_whitespace() => {
                        // Line comment: consume up to (not including) the newline
                        while i < chars.len() && chars[i] != '\n' {
                            advance(&mut line, &mut col, chars[i]);
                            i += 1;
                        }
                    }
                    None if after_ws => {
                        i += 1;
                    }
                    _ => {
                        emit(c, line, col, &mut out, &mut map);
                        advance(&mut line, &mut col, c);
                        after_ws = false;
                        i += 1;
                    }
                }
            }
            _ => {
                emit(c, line, col, &mut out, &mut map);
                advance(&mut line, &mut col, c);
                after_ws = c.is_whitespace();
                i += 1;
            }
        }
    }

    Ok(CleanedSource { text: out, map })
}

fn advance(line: &mut usize, col: &mut usize, c: char) {
    if c == '\n' {
        *line += 1;
        *col = 1;
    } else {
        *col += 1;
    }
}

/// Consume a block comment body. `opener` is `(` or `{`; the comment ends
/// at the matching `)#` or `}#`, with `#(`/`#{` of the same opener
/// nesting. Quoted strings inside the comment are skipped so their
/// content cannot terminate it.
fn skip_block_comment(chars: &[char], i: &mut usize, line: &mut usize, col: &mut usize, opener: char) {
    let closer = if opener == '(' { ')' } else { '}' };
    let mut depth = 1usize;

    while *i < chars.len() && depth > 0 {
        let c = chars[*i];
        if c == '\\' {
            advance(line, col, c);
            *i += 1;
            if *i < chars.len() {
                advance(line, col, chars[*i]);
                *i += 1;
            }
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            advance(line, col, c);
            *i += 1;
            while *i < chars.len() {
                let q = chars[*i];
                if q == '\\' {
                    advance(line, col, q);
                    *i += 1;
                    if *i < chars.len() {
                        advance(line, col, chars[*i]);
                        *i += 1;
                    }
                    continue;
                }
                advance(line, col, q);
                *i += 1;
                if q == quote {
                    break;
                }
            }
            continue;
        }
        if c == '#' && chars.get(*i + 1) == Some(&opener) {
            depth += 1;
            advance(line, col, c);
            advance(line, col, opener);
            *i += 2;
            continue;
        }
        if c == closer && chars.get(*i + 1) == Some(&'#') {
            depth -= 1;
            advance(line, col, c);
            advance(line, col, '#');
            *i += 2;
            continue;
        }
        advance(line, col, c);
        *i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(src: &str) -> String {
        strip_comments(src).unwrap().text
    }

    #[test]
    fn test_line_comment_after_whitespace() {
        assert_eq!(clean("echo hi # trailing"), "echo hi ");
        assert_eq!(clean("# full line\necho hi"), "\necho hi");
    }

    #[test]
    fn test_hash_without_following_whitespace_is_literal() {
        assert_eq!(clean("echo #5"), "echo #5");
        assert_eq!(clean("#!/usr/bin/paw\necho hi"), "#!/usr/bin/paw\necho hi");
    }

    #[test]
    fn test_hash_not_preceded_by_whitespace_is_literal() {
        assert_eq!(clean("echo a# b"), "echo a# b");
    }

    #[test]
    fn test_hash_inside_quotes_is_literal() {
        assert_eq!(clean("echo \"# not a comment\""), "echo \"# not a comment\"");
        assert_eq!(clean("echo '# not a comment'"), "echo '# not a comment'");
    }

    #[test]
    fn test_block_comment() {
        assert_eq!(clean("echo #( ignored )# hi"), "echo  hi");
        assert_eq!(clean("echo #{ ignored }# hi"), "echo  hi");
    }

    #[test]
    fn test_block_comment_nesting() {
        assert_eq!(clean("echo #( a #( b )# c )# hi"), "echo  hi");
    }

    #[test]
    fn test_block_comment_skips_strings() {
        assert_eq!(clean("echo #( ') #' still comment )# hi"), "echo  hi");
    }

    #[test]
    fn test_block_comment_spanning_lines() {
        assert_eq!(clean("echo a #( x\ny )# b"), "echo a  b");
    }

    #[test]
    fn test_escaped_hash_is_literal() {
        assert_eq!(clean("echo \\# hi"), "echo \\# hi");
    }

    #[test]
    fn test_position_map_survives_comment_removal() {
        let cleaned = strip_comments("#( c )# echo hi").unwrap();
        assert_eq!(cleaned.text, " echo hi");
        // The 'e' of echo is at original column 9
        assert_eq!(cleaned.position_at(1), (1, 9));
    }

    #[test]
    fn test_position_map_across_lines() {
        let cleaned = strip_comments("echo a # c\necho b").unwrap();
        let idx = cleaned.text.find("echo b").unwrap();
        assert_eq!(cleaned.position_at(idx), (2, 1));
    }
}
