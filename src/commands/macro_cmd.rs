// src/commands/macro_cmd.rs
//
// `macro name, (body)` — define a macro; the sugar rewrite turns
// `macro greet(echo "hi $1")` into this form. `macro name` alone is a
// forward declaration.

use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineError, EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::macros::is_valid_macro_name;
use crate::value::Value;

pub struct MacroCommand;

impl Command for MacroCommand {
    fn name(&self) -> &str {
        "macro"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        if !ctx.inner.config.allow_macros {
            return Err(EngineError::MacrosDisabled);
        }
        let Some(name) = ctx.arg(0).and_then(|v| v.as_name()).map(str::to_string) else {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                "macro: expected a name",
            );
            return Ok(Flow::Status(false));
        };
        if !is_valid_macro_name(&name) {
            logging::emit(
                LogLevel::Error,
                LogCategory::Macro,
                Some(&ctx.position),
                &format!("macro: '{}' is not a valid name", name),
            );
            return Ok(Flow::Status(false));
        }

        match ctx.arg(1) {
            Some(Value::ParenGroup(body)) => {
                ctx.inner
                    .macros
                    .define(&name, body.clone(), ctx.position.clone());
                logging::emit(
                    LogLevel::Debug,
                    LogCategory::Macro,
                    Some(&ctx.position),
                    &format!("defined macro '{}'", name),
                );
                Ok(Flow::Status(true))
            }
            Some(other) => {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Argument,
                    Some(&ctx.position),
                    &format!("macro: expected a (body) group, got {}", other.type_name()),
                );
                Ok(Flow::Status(false))
            }
            None => {
                ctx.inner.macros.forward_declare(&name, ctx.position.clone());
                Ok(Flow::Status(true))
            }
        }
    }
}
