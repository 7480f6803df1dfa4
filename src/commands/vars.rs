// src/commands/vars.rs
//
// Variable table access: set, get, unset. `get` publishes the value as
// the formal result so brace expressions can splice it.

use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};

pub struct SetCommand;

impl Command for SetCommand {
    fn name(&self) -> &str {
        "set"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(name) = ctx.arg(0).and_then(|v| v.as_name()).map(str::to_string) else {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                "set: expected a variable name",
            );
            return Ok(Flow::Status(false));
        };
        let Some(value) = ctx.arg(1).cloned() else {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                "set: expected a value",
            );
            return Ok(Flow::Status(false));
        };
        ctx.set_var(name, value);
        Ok(Flow::Status(true))
    }
}

pub struct GetCommand;

impl Command for GetCommand {
    fn name(&self) -> &str {
        "get"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(name) = ctx.arg(0).and_then(|v| v.as_name()).map(str::to_string) else {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                "get: expected a variable name",
            );
            return Ok(Flow::Status(false));
        };
        match ctx.get_var(&name) {
            Some(value) => {
                ctx.set_result(value);
                Ok(Flow::Status(true))
            }
            None => {
                logging::emit(
                    LogLevel::Debug,
                    LogCategory::Variable,
                    Some(&ctx.position),
                    &format!("get: variable '{}' is not set", name),
                );
                ctx.clear_result();
                Ok(Flow::Status(false))
            }
        }
    }
}

pub struct UnsetCommand;

impl Command for UnsetCommand {
    fn name(&self) -> &str {
        "unset"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(name) = ctx.arg(0).and_then(|v| v.as_name()).map(str::to_string) else {
            return Ok(Flow::Status(false));
        };
        Ok(Flow::Status(ctx.state.unset_var(&name)))
    }
}
