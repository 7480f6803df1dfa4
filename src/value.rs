//! Value Model
//!
//! Tagged values flowing between commands. Bare symbols, quoted strings,
//! and parenthesized groups are kept as distinct variants because the
//! substitution layer re-emits each in its original lexical form.

use std::fmt;
use std::sync::Arc;

/// A single PawScript value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A bare word, e.g. `hello` or `some-name`.
    Symbol(String),
    /// A single- or double-quoted string with escapes already resolved.
    QuotedString(String),
    /// A parenthesized group with the outer parens stripped, e.g. the
    /// `echo "hi"` in `(echo "hi")`. Groups are executed lazily.
    ParenGroup(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Shared list payload. Opaque to the engine.
    List(Arc<Vec<Value>>),
    /// Shared byte buffer. Opaque to the engine.
    Bytes(Arc<Vec<u8>>),
    /// A suspension token id, e.g. `token_3`.
    Token(String),
    Undefined,
}

impl Value {
    /// Whether this value clears a formal result when stored: either the
    /// `Undefined` variant or the bare symbol `undefined`.
    pub fn clears_result(&self) -> bool {
        match self {
            Value::Undefined => true,
            Value::Symbol(s) => s == "undefined",
            _ => false,
        }
    }

    /// The raw text of the value as it is spliced into a command string by
    /// `${...}` substitution and by `$N` argument unwrapping: symbols,
    /// quoted strings and paren groups yield their inner text, numeric and
    /// boolean values their canonical rendering.
    pub fn substitution_text(&self) -> String {
        match self {
            Value::Symbol(s) | Value::QuotedString(s) | Value::ParenGroup(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Bool(b) => b.to_string(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.substitution_text()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Bytes(bytes) => format!("bytes[{}]", bytes.len()),
            Value::Token(id) => id.clone(),
            Value::Undefined => "undefined".to_string(),
        }
    }

    /// Short tag name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Symbol(_) => "symbol",
            Value::QuotedString(_) => "string",
            Value::ParenGroup(_) => "group",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Bytes(_) => "bytes",
            Value::Token(_) => "token",
            Value::Undefined => "undefined",
        }
    }

    /// Interpret the value as a number, when it carries one.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// The text of a value used where a name is expected (variable or
    /// macro names accept bare symbols and quoted strings).
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) | Value::QuotedString(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.substitution_text())
    }
}

/// An integer-or-float number extracted from a `Value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(n) => *n as f64,
            Number::Float(f) => *f,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(n) => Value::Int(n),
            Number::Float(f) => Value::Float(f),
        }
    }
}

/// Render a float the way the parser accepts it back: a trailing `.0` is
/// kept so the value round-trips as a float literal.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_text_preserves_lexical_form() {
        assert_eq!(Value::Symbol("abc".into()).substitution_text(), "abc");
        assert_eq!(Value::QuotedString("a b".into()).substitution_text(), "a b");
        assert_eq!(Value::ParenGroup("echo hi".into()).substitution_text(), "echo hi");
        assert_eq!(Value::Int(42).substitution_text(), "42");
        assert_eq!(Value::Float(2.5).substitution_text(), "2.5");
        assert_eq!(Value::Float(3.0).substitution_text(), "3.0");
        assert_eq!(Value::Bool(true).substitution_text(), "true");
        assert_eq!(Value::Undefined.substitution_text(), "undefined");
    }

    #[test]
    fn test_clears_result() {
        assert!(Value::Undefined.clears_result());
        assert!(Value::Symbol("undefined".into()).clears_result());
        assert!(!Value::QuotedString("undefined".into()).clears_result());
        assert!(!Value::Int(0).clears_result());
    }

    #[test]
    fn test_as_number() {
        assert_eq!(Value::Int(3).as_number(), Some(Number::Int(3)));
        assert_eq!(Value::Float(1.5).as_number(), Some(Number::Float(1.5)));
        assert_eq!(Value::Symbol("3".into()).as_number(), None);
    }

    #[test]
    fn test_list_rendering() {
        let list = Value::List(Arc::new(vec![Value::Int(1), Value::Symbol("x".into())]));
        assert_eq!(list.substitution_text(), "[1, x]");
    }
}
