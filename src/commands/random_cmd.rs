// src/commands/random_cmd.rs
use rand::Rng;

use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::value::Value;

/// `random [min, max]` — uniform integer in `[min, max]` (defaults
/// 0..=2147483647), published as the formal result.
pub struct RandomCommand;

impl Command for RandomCommand {
    fn name(&self) -> &str {
        "random"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let (min, max) = match (ctx.arg(0), ctx.arg(1)) {
            (None, _) => (0i64, i32::MAX as i64),
            (Some(Value::Int(min)), Some(Value::Int(max))) => (*min, *max),
            (Some(Value::Int(max)), None) => (0, *max),
            _ => {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Argument,
                    Some(&ctx.position),
                    "random: expected integer bounds",
                );
                return Ok(Flow::Status(false));
            }
        };
        if min > max {
            logging::emit(
                LogLevel::Error,
                LogCategory::Math,
                Some(&ctx.position),
                &format!("random: empty range {}..{}", min, max),
            );
            return Ok(Flow::Status(false));
        }
        let value = rand::thread_rng().gen_range(min..=max);
        ctx.set_result(Value::Int(value));
        Ok(Flow::Status(true))
    }
}
