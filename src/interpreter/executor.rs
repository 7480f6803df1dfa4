//! Sequence Executor
//!
//! Runs command sequences with `;` / `&` / `|` flow control. A command
//! moves through the phases Parsing, AwaitingSubstitution,
//! AwaitingBraceCoord, Dispatched, and Suspended/Completed. When a
//! command suspends, the remainder of the sequence is captured on a
//! token chained behind the suspended one; resumption continues the
//! remainder with the resumed status feeding the next separator
//! decision.

use std::sync::Arc;

use crate::commands::types::CommandContext;
use crate::engine::EngineInner;
use crate::interpreter::coordinator::{self, CoordinatorOutcome};
use crate::interpreter::errors::{EngineError, EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::state::ExecutionState;
use crate::interpreter::substitution::{self, SubstitutionContext, SubstResult, SubstitutionFailure};
use crate::interpreter::tokens::{self, CommandSequence, RequestOptions, SequenceKind};
use crate::parser::arguments::{tokenize_command, whole_paren_group};
use crate::parser::sugar::apply_sugar;
use crate::parser::types::{ParsedCommand, Separator, SourcePosition};
use crate::value::Value;

/// Phases a single command moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandPhase {
    AwaitingSubstitution,
    AwaitingBraceCoord,
    Dispatched,
    Suspended,
    Completed,
}

fn trace_phase(engine: &Arc<EngineInner>, phase: CommandPhase, position: &SourcePosition) {
    if engine.config.debug {
        logging::emit(
            LogLevel::Trace,
            LogCategory::Command,
            Some(position),
            &format!("phase {:?}", phase),
        );
    }
}

/// Parse and run a complete piece of source in the given scope.
pub fn execute_source(
    engine: &Arc<EngineInner>,
    source: &str,
    state: &ExecutionState,
    ctx: &SubstitutionContext,
) -> EngineResult<Flow> {
    if ctx.depth > engine.config.max_macro_depth {
        return Err(EngineError::MacroDepthExceeded(engine.config.max_macro_depth));
    }

    let commands = crate::parser::parse(
        source,
        ctx.filename.as_deref(),
        ctx.line_offset,
        ctx.column_offset,
    )
    .map_err(|err| EngineError::Parse {
        message: err.message.clone(),
        position: err.position().with_filename(ctx.filename.clone()),
    })?;

    run_sequence(engine, commands, 0, true, state, ctx, source)
}

/// Run `commands[start..]` with `last_status` feeding the first separator
/// decision.
pub fn run_sequence(
    engine: &Arc<EngineInner>,
    commands: Vec<ParsedCommand>,
    start: usize,
    last_status: bool,
    state: &ExecutionState,
    ctx: &SubstitutionContext,
    original_text: &str,
) -> EngineResult<Flow> {
    let mut last_status = last_status;

    for i in start..commands.len() {
        let cmd = &commands[i];
        let should_run = match cmd.separator {
            Separator::None | Separator::Seq => true,
            Separator::And => last_status,
            Separator::Or => !last_status,
        };
        if !should_run {
            // A skipped command leaves the previous status in place
            continue;
        }

        match execute_single(engine, cmd, state, ctx) {
            Flow::Status(status) => last_status = status,
            Flow::Token(token_id) => {
                if i + 1 >= commands.len() {
                    return Ok(Flow::Token(token_id));
                }
                let remaining: Vec<ParsedCommand> = commands[i + 1..].to_vec();
                let kind = match remaining[0].separator {
                    Separator::And => SequenceKind::Conditional,
                    Separator::Or => SequenceKind::Or,
                    _ => SequenceKind::Sequence,
                };
                let sequence_token = tokens::request_token(
                    engine,
                    state.clone(),
                    RequestOptions {
                        position: Some(cmd.position.clone()),
                        ..Default::default()
                    },
                );
                tokens::push_command_sequence(
                    engine,
                    &sequence_token,
                    CommandSequence {
                        kind,
                        remaining,
                        current_index: 0,
                        original_text: original_text.to_string(),
                        inherited_result: state.snapshot(),
                        position: cmd.position.clone(),
                        state: state.clone(),
                        ctx: ctx.clone(),
                    },
                )?;
                tokens::chain_or_resolve(engine, &token_id, &sequence_token)?;
                return Ok(Flow::Token(sequence_token));
            }
            signal => return Ok(signal),
        }
    }

    Ok(Flow::Status(last_status))
}

/// Continue a captured sequence remainder with the resumed status.
pub fn resume_sequence(
    engine: &Arc<EngineInner>,
    seq: CommandSequence,
    status: bool,
) -> EngineResult<Flow> {
    logging::emit(
        LogLevel::Debug,
        LogCategory::Flow,
        Some(&seq.position),
        &format!(
            "resuming {:?} sequence ({} commands left) with status {}",
            seq.kind,
            seq.remaining.len() - seq.current_index,
            status
        ),
    );
    run_sequence(
        engine,
        seq.remaining,
        seq.current_index,
        status,
        &seq.state,
        &seq.ctx,
        &seq.original_text,
    )
}

/// Execute one command: strip inversion, run parenthesized blocks in the
/// same scope, apply sugar, substitute, tokenize, dispatch. Errors are
/// reported and become a false status so sibling commands keep running.
pub fn execute_single(
    engine: &Arc<EngineInner>,
    cmd: &ParsedCommand,
    state: &ExecutionState,
    ctx: &SubstitutionContext,
) -> Flow {
    let full = cmd.text.as_str();

    // Leading `!`s schedule status inversion; `!!` cancels out.
    let mut invert = false;
    let mut text = full.trim();
    while let Some(rest) = text.strip_prefix('!') {
        invert = !invert;
        text = rest.trim_start();
    }
    let consumed_chars = full.chars().count() - text.chars().count();

    let result = execute_stripped(engine, cmd, text, consumed_chars, invert, state, ctx);
    match result {
        Ok(flow) => flow,
        Err(err) => {
            report_engine_error(engine, &err, cmd);
            trace_phase(engine, CommandPhase::Completed, &cmd.position);
            Flow::Status(invert)
        }
    }
}

fn execute_stripped(
    engine: &Arc<EngineInner>,
    cmd: &ParsedCommand,
    text: &str,
    consumed_chars: usize,
    invert: bool,
    state: &ExecutionState,
    ctx: &SubstitutionContext,
) -> EngineResult<Flow> {
    if text.is_empty() {
        return Ok(Flow::Status(!invert));
    }

    // A command that is entirely `( ... )` runs as a block in the same
    // scope, not a child scope.
    if let Some(inner) = whole_paren_group(text) {
        let content_position = SourcePosition::new(
            cmd.position.line,
            cmd.position.column + consumed_chars + 1,
        )
        .with_filename(cmd.position.filename.clone());
        let block_ctx = ctx.for_embedded(&content_position);
        let flow = execute_source(engine, inner, state, &block_ctx)?;
        return apply_inversion(engine, flow, invert, state, &cmd.position);
    }

    trace_phase(engine, CommandPhase::AwaitingSubstitution, &cmd.position);

    let sugared;
    let mut effective = text;
    if engine.config.enable_syntactic_sugar {
        if let Some(rewritten) = apply_sugar(text) {
            logging::emit(
                LogLevel::Trace,
                LogCategory::Parse,
                Some(&cmd.position),
                &format!("sugar rewrite: {}", rewritten),
            );
            sugared = rewritten;
            effective = &sugared;
        }
    }

    match substitution::substitute_command(engine, effective, state, ctx, &cmd.position)? {
        SubstResult::Done(final_text) => {
            dispatch_text(engine, &final_text, &cmd.position, state, ctx, invert)
        }
        SubstResult::Failed(failure) => {
            record_substitution_failure(engine, &failure, cmd);
            trace_phase(engine, CommandPhase::Completed, &cmd.position);
            Ok(Flow::Status(invert))
        }
        SubstResult::Suspended(coordinator_id) => {
            trace_phase(engine, CommandPhase::AwaitingBraceCoord, &cmd.position);
            let position = cmd.position.clone();
            let callback_state = state.clone();
            let callback_ctx = ctx.clone();
            let command = cmd.clone();
            coordinator::set_resume(
                engine,
                &coordinator_id,
                Box::new(move |engine, outcome| match outcome {
                    CoordinatorOutcome::Success(spliced) => {
                        let final_text = substitution::finish_text(&spliced, &callback_ctx);
                        dispatch_text(
                            engine,
                            &final_text,
                            &position,
                            &callback_state,
                            &callback_ctx,
                            invert,
                        )
                    }
                    CoordinatorOutcome::Failure(message) => {
                        let failure = SubstitutionFailure {
                            message,
                            position: position.clone(),
                        };
                        record_substitution_failure(engine, &failure, &command);
                        Ok(Flow::Status(invert))
                    }
                }),
            )?;
            Ok(Flow::Token(coordinator_id))
        }
    }
}

/// Tokenize a fully substituted command string and dispatch it.
fn dispatch_text(
    engine: &Arc<EngineInner>,
    text: &str,
    position: &SourcePosition,
    state: &ExecutionState,
    ctx: &SubstitutionContext,
    invert: bool,
) -> EngineResult<Flow> {
    let tokenized =
        tokenize_command(text).map_err(|err| EngineError::parse(err, position))?;
    if tokenized.name.is_empty() {
        return Ok(Flow::Status(!invert));
    }

    trace_phase(engine, CommandPhase::Dispatched, position);
    let flow = dispatch(engine, &tokenized.name, tokenized.args, position, state, ctx)?;
    if flow.is_token() {
        trace_phase(engine, CommandPhase::Suspended, position);
    } else {
        trace_phase(engine, CommandPhase::Completed, position);
    }
    apply_inversion(engine, flow, invert, state, position)
}

/// Resolve a command name: registry, then macros, then the fallback
/// handler.
fn dispatch(
    engine: &Arc<EngineInner>,
    name: &str,
    args: Vec<Value>,
    position: &SourcePosition,
    state: &ExecutionState,
    ctx: &SubstitutionContext,
) -> EngineResult<Flow> {
    let handler = engine.registry.read().unwrap().get_arc(name);
    if let Some(handler) = handler {
        logging::emit(
            LogLevel::Trace,
            LogCategory::Command,
            Some(position),
            &format!("dispatching '{}' ({} args)", name, args.len()),
        );
        let mut context = CommandContext::new(engine, args, position.clone(), state.clone(), ctx.clone());
        return handler.execute(&mut context);
    }

    if engine.config.allow_macros {
        if let Some(def) = engine.macros.resolve(name) {
            return crate::interpreter::macros::invoke_macro(engine, &def, args, position, state, ctx);
        }
    }

    let fallback = engine.fallback.read().unwrap().clone();
    if let Some(fallback) = fallback {
        let mut context = CommandContext::new(engine, args, position.clone(), state.clone(), ctx.clone());
        if let Some(flow) = fallback.handle(name, &mut context)? {
            return Ok(flow);
        }
    }

    Err(EngineError::UnknownCommand {
        name: name.to_string(),
        position: position.clone(),
    })
}

/// Invert a completed status; a suspended command gets an inverter token
/// spliced into its chain instead.
fn apply_inversion(
    engine: &Arc<EngineInner>,
    flow: Flow,
    invert: bool,
    state: &ExecutionState,
    position: &SourcePosition,
) -> EngineResult<Flow> {
    if !invert {
        return Ok(flow);
    }
    match flow {
        Flow::Status(status) => Ok(Flow::Status(!status)),
        Flow::Token(token_id) => {
            let inverter = tokens::request_token(
                engine,
                state.clone(),
                RequestOptions {
                    position: Some(position.clone()),
                    ..Default::default()
                },
            );
            tokens::set_invert(engine, &inverter)?;
            tokens::chain_or_resolve(engine, &token_id, &inverter)?;
            Ok(Flow::Token(inverter))
        }
        signal => Ok(signal),
    }
}

fn record_substitution_failure(
    engine: &Arc<EngineInner>,
    failure: &SubstitutionFailure,
    cmd: &ParsedCommand,
) {
    *engine.substatus.lock().unwrap() = Some(failure.clone());
    logging::report_error(
        LogCategory::Command,
        Some(&failure.position),
        &format!("substitution failed: {}", failure.message),
        cmd.position.original_text.as_deref(),
        engine.config.show_error_context,
        engine.config.context_lines,
    );
}

fn report_engine_error(engine: &Arc<EngineInner>, err: &EngineError, cmd: &ParsedCommand) {
    let category = match err {
        EngineError::Parse { .. } => LogCategory::Parse,
        EngineError::UnknownCommand { .. } => LogCategory::Command,
        EngineError::Substitution { .. } => LogCategory::Command,
        EngineError::MacroDepthExceeded(_) | EngineError::MacrosDisabled => LogCategory::Macro,
        EngineError::IterationLimitExceeded(_) => LogCategory::Flow,
        EngineError::TokenNotFound(_) => LogCategory::Async,
        EngineError::Io(_) => LogCategory::Io,
    };
    let position = err.position().cloned().unwrap_or_else(|| cmd.position.clone());
    logging::report_error(
        category,
        Some(&position),
        &err.to_string(),
        cmd.position.original_text.as_deref(),
        engine.config.show_error_context,
        engine.config.context_lines,
    );
}
