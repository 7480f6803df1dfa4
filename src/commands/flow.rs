// src/commands/flow.rs
//
// Flow-control commands: fixed statuses, the macro return, break and
// continue signals, and the loop collectors. Loops run their bodies in
// the caller's scope and stay resumable when a body iteration suspends:
// the remaining iterations are captured on a callback continuation
// chained behind the suspended body.

use std::sync::Arc;

use crate::commands::types::{Command, CommandContext};
use crate::engine::EngineInner;
use crate::interpreter::errors::{EngineError, EngineResult, Flow};
use crate::interpreter::executor;
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::state::ExecutionState;
use crate::interpreter::substitution::SubstitutionContext;
use crate::interpreter::tokens::{self, Continuation, RequestOptions};
use crate::parser::types::SourcePosition;
use crate::value::Value;

pub struct TrueCommand;

impl Command for TrueCommand {
    fn name(&self) -> &str {
        "true"
    }

    fn execute(&self, _ctx: &mut CommandContext) -> EngineResult<Flow> {
        Ok(Flow::Status(true))
    }
}

pub struct FalseCommand;

impl Command for FalseCommand {
    fn name(&self) -> &str {
        "false"
    }

    fn execute(&self, _ctx: &mut CommandContext) -> EngineResult<Flow> {
        Ok(Flow::Status(false))
    }
}

/// `ret [status] [value]` terminates the enclosing macro body, carrying
/// both the status and the formal result to the caller.
pub struct RetCommand;

impl Command for RetCommand {
    fn name(&self) -> &str {
        "ret"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let (status, value) = match (ctx.arg(0), ctx.arg(1)) {
            (Some(Value::Bool(status)), value) => (*status, value.cloned()),
            (Some(value), _) => (true, Some(value.clone())),
            (None, _) => (true, None),
        };
        if let Some(value) = value {
            ctx.set_result(value);
        }
        Ok(Flow::Return { status })
    }
}

pub struct BreakCommand;

impl Command for BreakCommand {
    fn name(&self) -> &str {
        "break"
    }

    fn execute(&self, _ctx: &mut CommandContext) -> EngineResult<Flow> {
        Ok(Flow::Break { status: true })
    }
}

pub struct ContinueCommand;

impl Command for ContinueCommand {
    fn name(&self) -> &str {
        "continue"
    }

    fn execute(&self, _ctx: &mut CommandContext) -> EngineResult<Flow> {
        Ok(Flow::Continue { status: true })
    }
}

/// `repeat count, (body)` — run the body `count` times.
pub struct RepeatCommand;

impl Command for RepeatCommand {
    fn name(&self) -> &str {
        "repeat"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(Value::Int(count)) = ctx.arg(0).cloned() else {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                "repeat: expected a count",
            );
            return Ok(Flow::Status(false));
        };
        let Some(Value::ParenGroup(body)) = ctx.arg(1).cloned() else {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                "repeat: expected a (body) group",
            );
            return Ok(Flow::Status(false));
        };
        let count = count.max(0) as u64;
        if count > ctx.inner.config.max_loop_iterations {
            return Err(EngineError::IterationLimitExceeded(
                ctx.inner.config.max_loop_iterations as usize,
            ));
        }
        let inner = ctx.inner.clone();
        run_repeat(
            &inner,
            body,
            count,
            ctx.state.clone(),
            ctx.subst.clone(),
            ctx.position.clone(),
            true,
        )
    }
}

fn run_repeat(
    engine: &Arc<EngineInner>,
    body: String,
    mut remaining: u64,
    state: ExecutionState,
    ctx: SubstitutionContext,
    position: SourcePosition,
    mut last_status: bool,
) -> EngineResult<Flow> {
    while remaining > 0 {
        remaining -= 1;
        let block_ctx = ctx.for_embedded(&position);
        match executor::execute_source(engine, &body, &state, &block_ctx)? {
            Flow::Status(status) => last_status = status,
            Flow::Break { status } => return Ok(Flow::Status(status)),
            Flow::Continue { status } => last_status = status,
            Flow::Return { status } => return Ok(Flow::Return { status }),
            Flow::Token(token_id) => {
                return suspend_loop(engine, &token_id, &state, &position, {
                    let body = body.clone();
                    let state = state.clone();
                    let ctx = ctx.clone();
                    let position = position.clone();
                    Box::new(move |engine: &Arc<EngineInner>, status: bool| {
                        run_repeat(engine, body, remaining, state, ctx, position, status)
                    })
                });
            }
        }
    }
    Ok(Flow::Status(last_status))
}

/// `while (cond), (body)` — run the body while the condition block
/// succeeds. The final status is the last body status (true when the
/// body never ran).
pub struct WhileCommand;

impl Command for WhileCommand {
    fn name(&self) -> &str {
        "while"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let (Some(Value::ParenGroup(cond)), Some(Value::ParenGroup(body))) =
            (ctx.arg(0).cloned(), ctx.arg(1).cloned())
        else {
            logging::emit(
                LogLevel::Error,
                LogCategory::Argument,
                Some(&ctx.position),
                "while: expected (condition) and (body) groups",
            );
            return Ok(Flow::Status(false));
        };
        let inner = ctx.inner.clone();
        run_while(
            &inner,
            cond,
            body,
            ctx.state.clone(),
            ctx.subst.clone(),
            ctx.position.clone(),
            true,
            0,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn run_while(
    engine: &Arc<EngineInner>,
    cond: String,
    body: String,
    state: ExecutionState,
    ctx: SubstitutionContext,
    position: SourcePosition,
    mut last_status: bool,
    mut iterations: u64,
) -> EngineResult<Flow> {
    loop {
        iterations += 1;
        if iterations > engine.config.max_loop_iterations {
            return Err(EngineError::IterationLimitExceeded(
                engine.config.max_loop_iterations as usize,
            ));
        }

        let block_ctx = ctx.for_embedded(&position);
        let cond_flow = executor::execute_source(engine, &cond, &state, &block_ctx)?;
        let cond_status = match cond_flow {
            Flow::Token(token_id) => {
                return suspend_loop(engine, &token_id, &state, &position, {
                    let cond = cond.clone();
                    let body = body.clone();
                    let state = state.clone();
                    let ctx = ctx.clone();
                    let position = position.clone();
                    let last = last_status;
                    Box::new(move |engine: &Arc<EngineInner>, status: bool| {
                        while_after_cond(
                            engine, cond, body, state, ctx, position, last, iterations, status,
                        )
                    })
                });
            }
            flow => flow.carried_status(),
        };
        if !cond_status {
            return Ok(Flow::Status(last_status));
        }

        let block_ctx = ctx.for_embedded(&position);
        match executor::execute_source(engine, &body, &state, &block_ctx)? {
            Flow::Status(status) => last_status = status,
            Flow::Break { status } => return Ok(Flow::Status(status)),
            Flow::Continue { status } => last_status = status,
            Flow::Return { status } => return Ok(Flow::Return { status }),
            Flow::Token(token_id) => {
                return suspend_loop(engine, &token_id, &state, &position, {
                    let cond = cond.clone();
                    let body = body.clone();
                    let state = state.clone();
                    let ctx = ctx.clone();
                    let position = position.clone();
                    Box::new(move |engine: &Arc<EngineInner>, status: bool| {
                        run_while(engine, cond, body, state, ctx, position, status, iterations)
                    })
                });
            }
        }
    }
}

/// Continue a `while` whose condition block suspended: the resumed
/// status decides between running the body and finishing the loop.
#[allow(clippy::too_many_arguments)]
fn while_after_cond(
    engine: &Arc<EngineInner>,
    cond: String,
    body: String,
    state: ExecutionState,
    ctx: SubstitutionContext,
    position: SourcePosition,
    last_status: bool,
    iterations: u64,
    cond_status: bool,
) -> EngineResult<Flow> {
    if !cond_status {
        return Ok(Flow::Status(last_status));
    }
    let block_ctx = ctx.for_embedded(&position);
    match executor::execute_source(engine, &body, &state, &block_ctx)? {
        Flow::Status(status) => {
            run_while(engine, cond, body, state, ctx, position, status, iterations)
        }
        Flow::Break { status } => Ok(Flow::Status(status)),
        Flow::Continue { status } => {
            run_while(engine, cond, body, state, ctx, position, status, iterations)
        }
        Flow::Return { status } => Ok(Flow::Return { status }),
        Flow::Token(token_id) => {
            let anchor_state = state.clone();
            let anchor_position = position.clone();
            suspend_loop(
                engine,
                &token_id,
                &anchor_state,
                &anchor_position,
                Box::new(move |engine: &Arc<EngineInner>, status: bool| {
                    run_while(engine, cond, body, state, ctx, position, status, iterations)
                }),
            )
        }
    }
}

/// Capture the rest of a loop on a token chained behind the suspended
/// body or condition.
fn suspend_loop(
    engine: &Arc<EngineInner>,
    inner_token: &str,
    state: &ExecutionState,
    position: &SourcePosition,
    resume: Box<dyn FnOnce(&Arc<EngineInner>, bool) -> EngineResult<Flow> + Send>,
) -> EngineResult<Flow> {
    let loop_token = tokens::request_token(
        engine,
        state.clone(),
        RequestOptions {
            position: Some(position.clone()),
            ..Default::default()
        },
    );
    tokens::set_continuation(engine, &loop_token, Continuation::Callback(resume))?;
    tokens::chain_or_resolve(engine, inner_token, &loop_token)?;
    Ok(Flow::Token(loop_token))
}
