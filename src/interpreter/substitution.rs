//! Substitution Layer
//!
//! Applied once to each command string immediately before dispatch, in a
//! fixed order:
//!
//! 1. `\$` is hidden behind an internal sentinel.
//! 2. Top-level brace expressions are discovered and evaluated, each in a
//!    child scope with accumulated position offsets. When every
//!    evaluation completes synchronously the results are spliced in
//!    (end to start, so byte offsets stay valid); when any suspends, a
//!    coordinator token takes over and the command is dispatched later.
//! 3. Inside an active argument context, `$*`, `$#`, and `$N` are
//!    replaced. Splicing is quote-aware: values spliced into a quoted
//!    string have their quotes and backslashes escaped and gain no new
//!    quoting, while bare splices of text with separators get wrapped in
//!    quotes. A spliced value can never introduce live `$` or `~` tokens.
//! 4. The sentinel becomes a literal `$`.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex_lite::Regex;

use crate::engine::EngineInner;
use crate::interpreter::braces::find_top_level_braces;
use crate::interpreter::coordinator::{self, BraceEvaluation};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::state::ExecutionState;
use crate::parser::types::{MacroContext, SourcePosition};
use crate::value::Value;

/// Internal stand-in for an escaped dollar while substitution runs.
pub const DOLLAR_SENTINEL: char = '\u{E000}';

lazy_static! {
    static ref SAFE_IDENT: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

/// Carrier for macro arguments, offsets, and the macro invocation chain,
/// passed down through nested evaluation.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Positional arguments; present inside a macro invocation (and for
    /// script arguments handed to the top-level source).
    pub args: Option<Vec<Value>>,
    pub macro_context: Option<Arc<MacroContext>>,
    pub filename: Option<String>,
    /// Line/column offsets of the current source inside its enclosing
    /// source; column applies on the first line only.
    pub line_offset: usize,
    pub column_offset: usize,
    /// Nesting depth across macro invocations and brace evaluations.
    pub depth: usize,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional substitution runs only when an argument context is
    /// installed.
    pub fn positional_enabled(&self) -> bool {
        self.args.is_some()
    }

    /// Context for source embedded at an absolute position (brace
    /// content, block content), keeping arguments and macro chain.
    pub fn for_embedded(&self, content_position: &SourcePosition) -> Self {
        Self {
            args: self.args.clone(),
            macro_context: self.macro_context.clone(),
            filename: self.filename.clone(),
            line_offset: content_position.line.saturating_sub(1),
            column_offset: content_position.column.saturating_sub(1),
            depth: self.depth + 1,
        }
    }
}

/// A recorded substitution failure, queryable by the host while the
/// enclosing sequence keeps running.
#[derive(Debug, Clone)]
pub struct SubstitutionFailure {
    pub message: String,
    pub position: SourcePosition,
}

/// Result of substituting one command string.
pub enum SubstResult {
    /// Fully substituted; ready to tokenize and dispatch.
    Done(String),
    /// At least one brace evaluation suspended; the id names the
    /// coordinator token that will re-drive dispatch.
    Suspended(String),
    /// A brace evaluation failed; the command must not be dispatched.
    Failed(SubstitutionFailure),
}

/// Rendering of the in-flight marker for a suspended substitution.
pub fn async_marker(coordinator_id: &str) -> String {
    format!("\u{27e8}ASYNC_BRACES:{}\u{27e9}", coordinator_id)
}

/// Run the substitution pipeline for one command string. `position` is
/// the command's absolute source position.
pub fn substitute_command(
    engine: &Arc<EngineInner>,
    text: &str,
    state: &ExecutionState,
    ctx: &SubstitutionContext,
    position: &SourcePosition,
) -> EngineResult<SubstResult> {
    let escaped = escape_dollar(text);

    let braces = match find_top_level_braces(&escaped) {
        Ok(braces) => braces,
        Err(err) => {
            let failure = SubstitutionFailure {
                message: err.message.clone(),
                position: position.clone(),
            };
            return Ok(SubstResult::Failed(failure));
        }
    };

    if braces.is_empty() {
        return Ok(SubstResult::Done(finish_text(&escaped, ctx)));
    }

    let mut evaluations: Vec<BraceEvaluation> = Vec::with_capacity(braces.len());
    for location in braces {
        let (rel_line, rel_col) = location.content_offset();
        let content_position = SourcePosition::new(rel_line + 1, rel_col + 1)
            .offset_by(position.line.saturating_sub(1), position.column.saturating_sub(1))
            .with_filename(position.filename.clone());
        let child_ctx = ctx.for_embedded(&content_position);
        let child_state = state.create_child();

        let eval = match crate::interpreter::executor::execute_source(
            engine,
            &location.content,
            &child_state,
            &child_ctx,
        ) {
            Ok(Flow::Token(token_id)) => BraceEvaluation {
                location,
                is_async: true,
                token_id: Some(token_id),
                result: None,
                completed: false,
                failed: false,
                error_text: None,
                position: content_position,
                child_state: Some(child_state),
            },
            Ok(flow) => {
                let status = flow.carried_status();
                if status {
                    let text = child_state
                        .get_result()
                        .map(|v| v.substitution_text())
                        .unwrap_or_else(|| "undefined".to_string());
                    BraceEvaluation {
                        location,
                        is_async: false,
                        token_id: None,
                        result: Some(text),
                        completed: true,
                        failed: false,
                        error_text: None,
                        position: content_position,
                        child_state: Some(child_state),
                    }
                } else {
                    let message = format!("brace expression at {} failed", content_position);
                    BraceEvaluation {
                        location,
                        is_async: false,
                        token_id: None,
                        result: None,
                        completed: true,
                        failed: true,
                        error_text: Some(message),
                        position: content_position,
                        child_state: Some(child_state),
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Parse,
                    Some(&content_position),
                    &message,
                );
                BraceEvaluation {
                    location,
                    is_async: false,
                    token_id: None,
                    result: None,
                    completed: true,
                    failed: true,
                    error_text: Some(message),
                    position: content_position,
                    child_state: Some(child_state),
                }
            }
        };
        evaluations.push(eval);
    }

    let any_async = evaluations.iter().any(|e| e.is_async);
    if any_async {
        let coord_id = coordinator::start(
            engine,
            evaluations,
            escaped,
            ctx.clone(),
            state,
            position,
        )?;
        logging::emit(
            LogLevel::Debug,
            LogCategory::Async,
            Some(position),
            &format!("substitution suspended: {}", async_marker(&coord_id)),
        );
        return Ok(SubstResult::Suspended(coord_id));
    }

    if let Some(failed) = evaluations.iter().find(|e| e.failed) {
        let failure = SubstitutionFailure {
            message: failed
                .error_text
                .clone()
                .unwrap_or_else(|| "brace expression failed".to_string()),
            position: failed.position.clone(),
        };
        return Ok(SubstResult::Failed(failure));
    }

    let spliced = coordinator::splice_completed(&escaped, &evaluations);
    Ok(SubstResult::Done(finish_text(&spliced, ctx)))
}

/// Steps 3 and 4 of the pipeline: positional substitution, then sentinel
/// restoration. The brace coordinator runs this on its spliced string.
pub fn finish_text(text: &str, ctx: &SubstitutionContext) -> String {
    let positional = match &ctx.args {
        Some(args) => apply_positional(text, args),
        None => text.to_string(),
    };
    unescape_sentinel(&positional)
}

/// Hide `\$` behind the sentinel so nothing downstream treats it as live.
fn escape_dollar(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            match chars.get(i + 1) {
                Some('$') => {
                    out.push(DOLLAR_SENTINEL);
                    i += 2;
                }
                Some(&next) => {
                    out.push(c);
                    out.push(next);
                    i += 2;
                }
                None => {
                    out.push(c);
                    i += 1;
                }
            }
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

fn unescape_sentinel(text: &str) -> String {
    text.replace(DOLLAR_SENTINEL, "$")
}

/// Replace `$*`, `$#`, and `$N` with quote-aware splicing.
fn apply_positional(text: &str, args: &[Value]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' {
            out.push(c);
            if let Some(&next) = chars.get(i + 1) {
                out.push(next);
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        match quote {
            Some(q) if c == q => {
                quote = None;
                out.push(c);
                i += 1;
                continue;
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
                i += 1;
                continue;
            }
            _ => {}
        }

        if c != '$' {
            out.push(c);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            Some('*') => {
                out.push_str(&splice_all(args, quote.is_some()));
                i += 2;
            }
            Some('#') => {
                out.push_str(&args.len().to_string());
                i += 2;
            }
            Some(d) if d.is_ascii_digit() => {
                let mut j = i + 1;
                let mut number = 0usize;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    number = number * 10 + (chars[j] as usize - '0' as usize);
                    j += 1;
                }
                match (number >= 1).then(|| args.get(number - 1)).flatten() {
                    Some(value) => out.push_str(&splice_one(value, quote.is_some())),
                    None => {
                        logging::emit(
                            LogLevel::Warn,
                            LogCategory::Argument,
                            None,
                            &format!("no argument ${} (have {})", number, args.len()),
                        );
                    }
                }
                i = j;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Escape quotes and backslashes for splicing into a quoted context.
fn escape_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '"' || c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Neutralize characters that would read as fresh tokens in a bare
/// splice.
fn escape_bare(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '$' || c == '~' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn needs_quoting(text: &str) -> bool {
    text.is_empty()
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | ';' | '&' | '|' | '"' | '\''))
}

/// `$N`: unwrap the value and splice it.
fn splice_one(value: &Value, in_quotes: bool) -> String {
    let raw = value.substitution_text();
    if in_quotes {
        escape_quoted(&raw)
    } else if needs_quoting(&raw) {
        format!("\"{}\"", escape_quoted(&raw))
    } else {
        escape_bare(&raw)
    }
}

/// `$*`: all arguments joined by `, `, each keeping its lexical shape.
fn splice_all(args: &[Value], in_quotes: bool) -> String {
    if in_quotes {
        let joined = args
            .iter()
            .map(|v| v.substitution_text())
            .collect::<Vec<_>>()
            .join(", ");
        return escape_quoted(&joined);
    }
    args.iter()
        .map(shaped_argument)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render one argument for a bare `$*` splice, preserving its shape.
fn shaped_argument(value: &Value) -> String {
    match value {
        Value::ParenGroup(c) => format!("({})", escape_quoted(c)),
        Value::QuotedString(c) => format!("\"{}\"", escape_quoted(c)),
        Value::Symbol(s) => {
            if SAFE_IDENT.is_match(s) {
                s.clone()
            } else {
                format!("\"{}\"", escape_quoted(s))
            }
        }
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => value.substitution_text(),
        other => {
            let raw = other.substitution_text();
            if needs_quoting(&raw) {
                format!("\"{}\"", escape_quoted(&raw))
            } else {
                raw
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[Value]) -> Vec<Value> {
        values.to_vec()
    }

    #[test]
    fn test_escaped_dollar_roundtrip() {
        let escaped = escape_dollar("echo \\$1");
        assert!(!escaped.contains('$'));
        let ctx = SubstitutionContext {
            args: Some(vec![Value::Int(9)]),
            ..Default::default()
        };
        assert_eq!(finish_text(&escaped, &ctx), "echo $1");
    }

    #[test]
    fn test_positional_in_quotes_splices_raw() {
        let args = args(&[Value::QuotedString("world".into())]);
        assert_eq!(apply_positional("echo \"hi $1\"", &args), "echo \"hi world\"");
    }

    #[test]
    fn test_positional_in_quotes_escapes_quotes() {
        let args = args(&[Value::QuotedString("say \"hi\"".into())]);
        assert_eq!(
            apply_positional("echo \"$1\"", &args),
            "echo \"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_positional_bare_wraps_spaces() {
        let args = args(&[Value::QuotedString("two words".into())]);
        assert_eq!(apply_positional("echo $1", &args), "echo \"two words\"");
    }

    #[test]
    fn test_positional_bare_neutralizes_dollar_and_tilde() {
        let args = args(&[Value::QuotedString("~a$b".into())]);
        assert_eq!(apply_positional("echo $1", &args), "echo \\~a\\$b");
    }

    #[test]
    fn test_arg_count_and_star() {
        let args = args(&[Value::Int(1), Value::Symbol("two".into())]);
        assert_eq!(apply_positional("echo $#", &args), "echo 2");
        assert_eq!(apply_positional("echo $*", &args), "echo 1, two");
    }

    #[test]
    fn test_star_preserves_shapes() {
        let args = args(&[
            Value::ParenGroup("echo hi".into()),
            Value::QuotedString("a b".into()),
            Value::Symbol("plain".into()),
            Value::Symbol("not safe".into()),
        ]);
        assert_eq!(
            apply_positional("run $*", &args),
            "run (echo hi), \"a b\", plain, \"not safe\""
        );
    }

    #[test]
    fn test_star_inside_quotes_joins_raw() {
        let args = args(&[Value::Int(1), Value::QuotedString("a \"b\"".into())]);
        assert_eq!(
            apply_positional("echo \"$*\"", &args),
            "echo \"1, a \\\"b\\\"\""
        );
    }

    #[test]
    fn test_missing_argument_splices_nothing() {
        let args = args(&[Value::Int(1)]);
        assert_eq!(apply_positional("echo $2", &args), "echo ");
    }

    #[test]
    fn test_multi_digit_argument() {
        let mut values = Vec::new();
        for n in 0..12 {
            values.push(Value::Int(n));
        }
        assert_eq!(apply_positional("echo $12", &values), "echo 11");
    }

    #[test]
    fn test_dollar_without_selector_is_literal() {
        let args = args(&[Value::Int(1)]);
        assert_eq!(apply_positional("echo $x", &args), "echo $x");
        assert_eq!(apply_positional("echo $", &args), "echo $");
    }
}
