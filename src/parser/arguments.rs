//! Argument Tokenizer
//!
//! Splits a single command string into the command name and its typed
//! argument values. The first whitespace-separated run is the name; the
//! remainder splits on top-level commas, respecting parens, braces,
//! brackets, quotes, and backslash escapes.

use crate::parser::types::ParseException;
use crate::value::Value;

/// A tokenized command ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedCommand {
    pub name: String,
    pub args: Vec<Value>,
}

/// Tokenize a substituted command string.
pub fn tokenize_command(text: &str) -> Result<TokenizedCommand, ParseException> {
    let trimmed = text.trim();
    let (name, rest) = match trimmed.find(|c: char| c.is_whitespace()) {
        Some(idx) => (&trimmed[..idx], trimmed[idx..].trim_start()),
        None => (trimmed, ""),
    };

    let mut args = Vec::new();
    if !rest.is_empty() {
        for segment in split_arguments(rest)? {
            args.push(parse_literal(&segment)?);
        }
    }

    Ok(TokenizedCommand {
        name: name.to_string(),
        args,
    })
}

/// Split an argument list on top-level commas.
pub fn split_arguments(rest: &str) -> Result<Vec<String>, ParseException> {
    let chars: Vec<char> = rest.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' {
            current.push(c);
            i += 1;
            if i < chars.len() {
                current.push(chars[i]);
                i += 1;
            }
            continue;
        }

        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            current.push(c);
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
                i += 1;
            }
            '(' | '[' | '{' => {
                depth.push(c);
                current.push(c);
                i += 1;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if depth.last() == Some(&expected) {
                    depth.pop();
                } else {
                    return Err(ParseException::new(format!("unmatched '{}'", c), 1, i + 1));
                }
                current.push(c);
                i += 1;
            }
            ',' if depth.is_empty() => {
                segments.push(current.trim().to_string());
                current = String::new();
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    if quote.is_some() {
        return Err(ParseException::new("unclosed quote in arguments", 1, 1));
    }
    if let Some(&open) = depth.last() {
        return Err(ParseException::new(format!("unclosed '{}'", open), 1, 1));
    }

    segments.push(current.trim().to_string());
    Ok(segments)
}

/// Type a single raw argument.
pub fn parse_literal(raw: &str) -> Result<Value, ParseException> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(Value::Undefined);
    }

    if let Some(inner) = whole_group(text, '(', ')') {
        return Ok(Value::ParenGroup(inner.to_string()));
    }
    if let Some(inner) = whole_quoted(text) {
        return Ok(Value::QuotedString(resolve_escapes(inner)?));
    }
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "undefined" => return Ok(Value::Symbol("undefined".to_string())),
        _ => {}
    }
    if is_int_literal(text) {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Int(n));
        }
    }
    if is_float_literal(text) {
        if let Ok(f) = text.parse::<f64>() {
            return Ok(Value::Float(f));
        }
    }

    Ok(Value::Symbol(unescape_bare(text)))
}

/// If the text is a single `(...)` group spanning the whole string,
/// return the inner content. Used both for typing arguments and for
/// recognizing whole-command blocks.
pub fn whole_paren_group(text: &str) -> Option<&str> {
    whole_group(text, '(', ')')
}

/// If `text` is one parenthesized group spanning the whole argument,
/// return the inner content.
fn whole_group(text: &str, open: char, close: char) -> Option<&str> {
    let chars: Vec<char> = text.chars().collect();
    if chars.first() != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            i += 2;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            c2 if c2 == open => depth += 1,
            c2 if c2 == close => {
                depth -= 1;
                if depth == 0 {
                    return if i == chars.len() - 1 {
                        let start = open.len_utf8();
                        let end = text.len() - close.len_utf8();
                        Some(&text[start..end])
                    } else {
                        None
                    };
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// If `text` is one quoted string spanning the whole argument, return the
/// inner content (escapes unresolved).
fn whole_quoted(text: &str) -> Option<&str> {
    let chars: Vec<char> = text.chars().collect();
    let quote = match chars.first() {
        Some(&q @ ('\'' | '"')) => q,
        _ => return None,
    };
    let mut i = 1usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            i += 2;
            continue;
        }
        if c == quote {
            return if i == chars.len() - 1 {
                Some(&text[1..text.len() - 1])
            } else {
                None
            };
        }
        i += 1;
    }
    None
}

fn is_int_literal(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit())
}

/// A float literal requires a digit on both sides of the dot.
fn is_float_literal(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    match body.split_once('.') {
        Some((int_part, frac_part)) => {
            !int_part.is_empty()
                && !frac_part.is_empty()
                && int_part.bytes().all(|b| b.is_ascii_digit())
                && frac_part.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Resolve escape sequences inside a quoted string.
pub fn resolve_escapes(s: &str) -> Result<String, ParseException> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }
        let Some(&next) = chars.get(i + 1) else {
            out.push('\\');
            break;
        };
        match next {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '?' => out.push('?'),
            '~' => out.push('~'),
            'x' => {
                let hex: String = chars.iter().skip(i + 2).take(2).collect();
                if hex.len() < 2 {
                    return Err(ParseException::new("truncated \\x escape", 1, i + 1));
                }
                let code = u8::from_str_radix(&hex, 16)
                    .map_err(|_| ParseException::new(format!("invalid \\x escape '\\x{}'", hex), 1, i + 1))?;
                out.push(code as char);
                i += 4;
                continue;
            }
            'u' => {
                let hex: String = chars.iter().skip(i + 2).take(4).collect();
                if hex.len() < 4 {
                    return Err(ParseException::new("truncated \\u escape", 1, i + 1));
                }
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| ParseException::new(format!("invalid \\u escape '\\u{}'", hex), 1, i + 1))?;
                match char::from_u32(code) {
                    Some(ch) => out.push(ch),
                    None => {
                        return Err(ParseException::new(
                            format!("invalid unicode escape '\\u{}'", hex),
                            1,
                            i + 1,
                        ))
                    }
                }
                i += 6;
                continue;
            }
            other => {
                // Unknown escapes stay verbatim
                out.push('\\');
                out.push(other);
            }
        }
        i += 2;
    }

    Ok(out)
}

/// Strip the backslashes a `{...}` substitution inserted to keep its
/// value a single bare token.
fn unescape_bare(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_args() {
        let cmd = tokenize_command("add 2, 3").unwrap();
        assert_eq!(cmd.name, "add");
        assert_eq!(cmd.args, vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_name_only() {
        let cmd = tokenize_command("get_result").unwrap();
        assert_eq!(cmd.name, "get_result");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_quoted_argument() {
        let cmd = tokenize_command("echo \"a, b\"").unwrap();
        assert_eq!(cmd.args, vec![Value::QuotedString("a, b".into())]);
    }

    #[test]
    fn test_paren_group_argument() {
        let cmd = tokenize_command("macro 'greet', (echo \"hi\")").unwrap();
        assert_eq!(
            cmd.args,
            vec![
                Value::QuotedString("greet".into()),
                Value::ParenGroup("echo \"hi\"".into()),
            ]
        );
    }

    #[test]
    fn test_commas_inside_nesting_do_not_split() {
        let cmd = tokenize_command("run (a, b), [c, d]").unwrap();
        assert_eq!(cmd.args.len(), 2);
        assert_eq!(cmd.args[0], Value::ParenGroup("a, b".into()));
    }

    #[test]
    fn test_literal_typing() {
        assert_eq!(parse_literal("true").unwrap(), Value::Bool(true));
        assert_eq!(parse_literal("false").unwrap(), Value::Bool(false));
        assert_eq!(parse_literal("42").unwrap(), Value::Int(42));
        assert_eq!(parse_literal("-7").unwrap(), Value::Int(-7));
        assert_eq!(parse_literal("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(parse_literal("hello").unwrap(), Value::Symbol("hello".into()));
    }

    #[test]
    fn test_dot_requires_digits_on_both_sides() {
        assert_eq!(parse_literal(".5").unwrap(), Value::Symbol(".5".into()));
        assert_eq!(parse_literal("5.").unwrap(), Value::Symbol("5.".into()));
        assert_eq!(parse_literal("1.2.3").unwrap(), Value::Symbol("1.2.3".into()));
    }

    #[test]
    fn test_escape_resolution() {
        assert_eq!(resolve_escapes("a\\nb").unwrap(), "a\nb");
        assert_eq!(resolve_escapes("a\\tb").unwrap(), "a\tb");
        assert_eq!(resolve_escapes("\\\"hi\\\"").unwrap(), "\"hi\"");
        assert_eq!(resolve_escapes("\\x41").unwrap(), "A");
        assert_eq!(resolve_escapes("\\u00e9").unwrap(), "é");
        assert_eq!(resolve_escapes("\\?\\~").unwrap(), "?~");
    }

    #[test]
    fn test_invalid_hex_escape_is_an_error() {
        assert!(resolve_escapes("\\xzz").is_err());
        assert!(resolve_escapes("\\u12").is_err());
    }

    #[test]
    fn test_unknown_escape_stays_verbatim() {
        assert_eq!(resolve_escapes("a\\qb").unwrap(), "a\\qb");
    }

    #[test]
    fn test_escaped_specials_in_bare_symbol() {
        let cmd = tokenize_command("echo a\\;b\\ c").unwrap();
        assert_eq!(cmd.args, vec![Value::Symbol("a;b c".into())]);
    }

    #[test]
    fn test_partial_quote_is_symbol() {
        // Not a whole-argument quote, stays a bare symbol
        let cmd = tokenize_command("echo \"a\"b").unwrap();
        assert_eq!(cmd.args, vec![Value::Symbol("\"a\"b".into())]);
    }
}
