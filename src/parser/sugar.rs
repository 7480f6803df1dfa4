//! Syntactic Sugar
//!
//! Rewrites `cmd name(tail)rest` into `cmd 'name', (tail)rest` before
//! substitution, so definitions read like declarations:
//!
//!     macro greet(echo "hi $1")
//!
//! becomes
//!
//!     macro 'greet', (echo "hi $1")

/// Apply the sugar rewrite. Returns `None` when the text does not match
/// the pattern.
pub fn apply_sugar(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();

    // Command word
    let mut i = 0usize;
    while i < chars.len() && !chars[i].is_whitespace() {
        if chars[i] == '(' || chars[i] == '"' || chars[i] == '\'' {
            return None;
        }
        i += 1;
    }
    if i == 0 || i >= chars.len() {
        return None;
    }
    let cmd_end = i;

    // At least one whitespace character
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }

    // Identifier immediately followed by '('
    let ident_start = i;
    if i >= chars.len() || !(chars[i].is_ascii_alphabetic() || chars[i] == '_') {
        return None;
    }
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if i >= chars.len() || chars[i] != '(' {
        return None;
    }
    let ident_end = i;
    let open_idx = i;

    let close_idx = find_paren_close(&chars, open_idx)?;

    let cmd: String = chars[..cmd_end].iter().collect();
    let ident: String = chars[ident_start..ident_end].iter().collect();
    let tail: String = chars[open_idx + 1..close_idx].iter().collect();
    let rest: String = chars[close_idx + 1..].iter().collect();

    Some(format!("{} '{}', ({}){}", cmd, ident, tail, rest))
}

/// Find the matching `)` for the `(` at `open_idx`, handling nested
/// parens, quotes, and escapes.
fn find_paren_close(chars: &[char], open_idx: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut i = open_idx + 1;

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
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_definition_sugar() {
        assert_eq!(
            apply_sugar("macro greet(echo \"hi $1\")"),
            Some("macro 'greet', (echo \"hi $1\")".to_string())
        );
    }

    #[test]
    fn test_nested_parens_in_tail() {
        assert_eq!(
            apply_sugar("macro wrap(run (inner))"),
            Some("macro 'wrap', (run (inner))".to_string())
        );
    }

    #[test]
    fn test_quotes_hide_parens() {
        assert_eq!(
            apply_sugar("macro say(echo \"a ) b\")"),
            Some("macro 'say', (echo \"a ) b\")".to_string())
        );
    }

    #[test]
    fn test_rest_after_close_is_kept() {
        assert_eq!(
            apply_sugar("macro f(echo hi), extra"),
            Some("macro 'f', (echo hi), extra".to_string())
        );
    }

    #[test]
    fn test_no_match_without_ident_paren() {
        assert_eq!(apply_sugar("set x, 10"), None);
        assert_eq!(apply_sugar("greet \"world\""), None);
        assert_eq!(apply_sugar("echo"), None);
        assert_eq!(apply_sugar("echo hi there"), None);
    }

    #[test]
    fn test_space_before_paren_blocks_sugar() {
        assert_eq!(apply_sugar("macro greet (echo hi)"), None);
    }

    #[test]
    fn test_unclosed_paren_blocks_sugar() {
        assert_eq!(apply_sugar("macro greet(echo hi"), None);
    }
}
