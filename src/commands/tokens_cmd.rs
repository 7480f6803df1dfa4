// src/commands/tokens_cmd.rs
use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};

/// `tokens` — print the active-token report as JSON.
pub struct TokensCommand;

impl Command for TokensCommand {
    fn name(&self) -> &str {
        "tokens"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let report = ctx.inner.tokens.status_report();
        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                ctx.write_stdout(&json);
                ctx.write_stdout("\n");
                Ok(Flow::Status(true))
            }
            Err(_) => Ok(Flow::Status(false)),
        }
    }
}
