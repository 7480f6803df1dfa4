// src/commands/sleep_cmd.rs
//
// `sleep ms` — the reference asynchronous handler. With a tokio runtime
// available it suspends on a token that a timer task resumes; without
// one it blocks the (cooperative, single-logical-thread) script instead.

use std::time::Duration;

use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::value::Value;

pub struct SleepCommand;

impl Command for SleepCommand {
    fn name(&self) -> &str {
        "sleep"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let millis = match ctx.arg(0).and_then(Value::as_number) {
            Some(n) if n.as_f64() >= 0.0 => n.as_f64() as u64,
            _ => {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Argument,
                    Some(&ctx.position),
                    "sleep: expected a duration in milliseconds",
                );
                return Ok(Flow::Status(false));
            }
        };
        let duration = Duration::from_millis(millis);

        match ctx.inner.runtime.clone() {
            Some(handle) => {
                let token = ctx.request_token(None);
                let engine = ctx.engine();
                let token_id = token.clone();
                handle.spawn(async move {
                    tokio::time::sleep(duration).await;
                    engine.resume_token(&token_id, true);
                });
                Ok(Flow::Token(token))
            }
            None => {
                std::thread::sleep(duration);
                Ok(Flow::Status(true))
            }
        }
    }
}
