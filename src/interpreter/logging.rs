//! Structured Logging
//!
//! Engine diagnostics are emitted through `tracing` with a level and a
//! category field. Categories group messages by subsystem (parse,
//! command, macro, async, ...) so hosts can filter with an `EnvFilter`.
//! Error output can include a window of source context around the
//! reported position.

use crate::parser::types::SourcePosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Parse,
    Command,
    Variable,
    Argument,
    Io,
    Network,
    Macro,
    Async,
    Memory,
    Math,
    List,
    String,
    Type,
    Flow,
    System,
    App,
    User,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Parse => "parse",
            LogCategory::Command => "command",
            LogCategory::Variable => "variable",
            LogCategory::Argument => "argument",
            LogCategory::Io => "io",
            LogCategory::Network => "network",
            LogCategory::Macro => "macro",
            LogCategory::Async => "async",
            LogCategory::Memory => "memory",
            LogCategory::Math => "math",
            LogCategory::List => "list",
            LogCategory::String => "string",
            LogCategory::Type => "type",
            LogCategory::Flow => "flow",
            LogCategory::System => "system",
            LogCategory::App => "app",
            LogCategory::User => "user",
        }
    }
}

/// Emit one log record. `notice` maps onto INFO and `fatal` onto ERROR
/// with a marker field, matching the levels `tracing` provides.
pub fn emit(level: LogLevel, category: LogCategory, position: Option<&SourcePosition>, message: &str) {
    let category = category.as_str();
    let position = position.map(|p| p.to_string()).unwrap_or_default();
    match level {
        LogLevel::Trace => tracing::trace!(category, %position, "{}", message),
        LogLevel::Debug => tracing::debug!(category, %position, "{}", message),
        LogLevel::Info => tracing::info!(category, %position, "{}", message),
        LogLevel::Notice => tracing::info!(category, %position, notice = true, "{}", message),
        LogLevel::Warn => tracing::warn!(category, %position, "{}", message),
        LogLevel::Error => tracing::error!(category, %position, "{}", message),
        LogLevel::Fatal => tracing::error!(category, %position, fatal = true, "{}", message),
    }
}

/// Render `context_lines` lines of source around a position, with a caret
/// marking the column:
///
/// ```text
///   2 | set x, 10
///   3 | echo {get y
///     |      ^
/// ```
pub fn format_source_context(source: &str, position: &SourcePosition, context_lines: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() || position.line == 0 {
        return String::new();
    }
    let target = position.line.min(lines.len());
    let first = target.saturating_sub(context_lines).max(1);
    let last = (target + context_lines).min(lines.len());
    let width = last.to_string().len();

    let mut out = String::new();
    for n in first..=last {
        out.push_str(&format!("{:>width$} | {}\n", n, lines[n - 1], width = width));
        if n == target && position.column > 0 {
            out.push_str(&format!(
                "{:>width$} | {}^\n",
                "",
                " ".repeat(position.column - 1),
                width = width
            ));
        }
    }
    out
}

/// Log an error with position and optional source context.
pub fn report_error(
    category: LogCategory,
    position: Option<&SourcePosition>,
    message: &str,
    source: Option<&str>,
    show_context: bool,
    context_lines: usize,
) {
    emit(LogLevel::Error, category, position, message);
    if show_context {
        if let (Some(pos), Some(src)) = (position, source) {
            let context = format_source_context(src, pos, context_lines);
            if !context.is_empty() {
                tracing::error!(category = category.as_str(), "\n{}", context);
            }
        }
        if let Some(pos) = position {
            if let Some(chain) = &pos.macro_context {
                tracing::error!(category = category.as_str(), "{}", chain.describe());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_and_category_names() {
        assert_eq!(LogLevel::Notice.as_str(), "notice");
        assert_eq!(LogCategory::Async.as_str(), "async");
    }

    #[test]
    fn test_source_context_window() {
        let src = "one\ntwo\nthree\nfour\nfive";
        let pos = SourcePosition::new(3, 2);
        let ctx = format_source_context(src, &pos, 1);
        assert!(ctx.contains("2 | two"));
        assert!(ctx.contains("3 | three"));
        assert!(ctx.contains("4 | four"));
        assert!(!ctx.contains("1 | one"));
        assert!(ctx.contains("| ^") || ctx.contains(" ^"));
    }

    #[test]
    fn test_context_clamps_to_input() {
        let src = "only";
        let pos = SourcePosition::new(9, 1);
        let ctx = format_source_context(src, &pos, 2);
        assert!(ctx.contains("1 | only"));
    }
}
