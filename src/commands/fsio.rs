// src/commands/fsio.rs
//
// File access gated by the sandbox policy the host (or the CLI's
// --allow-read/--allow-write/--sandbox-dir flags) installed. Without a
// policy all paths are allowed.

use std::path::Path;

use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::value::Value;

fn path_arg(ctx: &CommandContext, name: &str) -> Option<String> {
    match ctx.arg(0).and_then(|v| v.as_name()) {
        Some(path) => Some(path.to_string()),
        None => {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                &format!("{}: expected a path", name),
            );
            None
        }
    }
}

pub struct ReadFileCommand;

impl Command for ReadFileCommand {
    fn name(&self) -> &str {
        "read_file"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(path) = path_arg(ctx, "read_file") else {
            return Ok(Flow::Status(false));
        };
        if let Some(policy) = &ctx.inner.config.sandbox {
            if !policy.can_read(Path::new(&path)) {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Io,
                    Some(&ctx.position),
                    &format!("read_file: '{}' is outside the allowed paths", path),
                );
                return Ok(Flow::Status(false));
            }
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                ctx.set_result(Value::QuotedString(content));
                Ok(Flow::Status(true))
            }
            Err(err) => {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Io,
                    Some(&ctx.position),
                    &format!("read_file: {}: {}", path, err),
                );
                Ok(Flow::Status(false))
            }
        }
    }
}

pub struct WriteFileCommand;

impl Command for WriteFileCommand {
    fn name(&self) -> &str {
        "write_file"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(path) = path_arg(ctx, "write_file") else {
            return Ok(Flow::Status(false));
        };
        let content = ctx
            .arg(1)
            .map(|v| v.substitution_text())
            .unwrap_or_default();
        if let Some(policy) = &ctx.inner.config.sandbox {
            if !policy.can_write(Path::new(&path)) {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Io,
                    Some(&ctx.position),
                    &format!("write_file: '{}' is outside the allowed paths", path),
                );
                return Ok(Flow::Status(false));
            }
        }
        match std::fs::write(&path, content.as_bytes()) {
            Ok(()) => Ok(Flow::Status(true)),
            Err(err) => {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Io,
                    Some(&ctx.position),
                    &format!("write_file: {}: {}", path, err),
                );
                Ok(Flow::Status(false))
            }
        }
    }
}
