// src/commands/result.rs
//
// Formal-result access. `get_result` republishes the inherited result so
// `{get_result}` splices the value set by an earlier command.

use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::value::Value;

pub struct GetResultCommand;

impl Command for GetResultCommand {
    fn name(&self) -> &str {
        "get_result"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        match ctx.get_result() {
            Some(value) => {
                ctx.set_result(value);
                Ok(Flow::Status(true))
            }
            None => Ok(Flow::Status(false)),
        }
    }
}

pub struct SetResultCommand;

impl Command for SetResultCommand {
    fn name(&self) -> &str {
        "set_result"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let value = ctx.arg(0).cloned().unwrap_or(Value::Undefined);
        ctx.set_result(value);
        Ok(Flow::Status(true))
    }
}

pub struct ClearResultCommand;

impl Command for ClearResultCommand {
    fn name(&self) -> &str {
        "clear_result"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        ctx.clear_result();
        Ok(Flow::Status(true))
    }
}
