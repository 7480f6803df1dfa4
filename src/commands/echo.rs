// src/commands/echo.rs
use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};

/// Print the arguments joined by spaces, followed by a newline.
pub struct EchoCommand;

impl Command for EchoCommand {
    fn name(&self) -> &str {
        "echo"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let line = ctx
            .args
            .iter()
            .map(|v| v.substitution_text())
            .collect::<Vec<_>>()
            .join(" ");
        ctx.write_stdout(&line);
        ctx.write_stdout("\n");
        Ok(Flow::Status(true))
    }
}
