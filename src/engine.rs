//! PawScript Engine
//!
//! Main entry point for embedding. Ties together the parser, the
//! substitution layer, the token manager, and the command registry, and
//! exposes the host-facing API: registration, execution, token
//! resumption, and macro management.

use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::commands::types::{Command, FallbackHandler, FnCommand, FnFallback};
use crate::commands::CommandRegistry;
use crate::interpreter::errors::{EngineError, EngineResult, Flow};
use crate::interpreter::executor;
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::macros::{self, is_valid_macro_name, ModuleEnv};
use crate::interpreter::state::ExecutionState;
use crate::interpreter::substitution::{SubstitutionContext, SubstitutionFailure};
use crate::interpreter::tokens::{self, TokenManager, TokenStatusReport};
use crate::parser::types::SourcePosition;
use crate::sandbox::SandboxPolicy;

/// Shared byte sink for engine output; defaults to the process stdout
/// and stderr.
pub type OutputStream = Arc<Mutex<dyn Write + Send>>;

/// Options for creating an engine.
#[derive(Clone)]
pub struct EngineConfig {
    /// Emit per-command phase traces.
    pub debug: bool,
    /// Timeout after which an unresumed token is force-cleaned.
    pub default_token_timeout: Duration,
    /// Rewrite `cmd name(tail)` into `cmd 'name', (tail)`.
    pub enable_syntactic_sugar: bool,
    pub allow_macros: bool,
    /// Include source context lines in error output.
    pub show_error_context: bool,
    pub context_lines: usize,
    /// Nesting bound across macro invocations and brace evaluations.
    pub max_macro_depth: usize,
    pub max_loop_iterations: u64,
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
    /// Path policy for the file commands; absent means unrestricted.
    pub sandbox: Option<SandboxPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_token_timeout: Duration::from_secs(300),
            enable_syntactic_sugar: true,
            allow_macros: true,
            show_error_context: true,
            context_lines: 2,
            max_macro_depth: 1000,
            max_loop_iterations: 1_000_000,
            stdout: None,
            stderr: None,
            sandbox: None,
        }
    }
}

/// Outcome of a top-level execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    /// The script completed with a final status.
    Done(bool),
    /// The script suspended; the id resolves when the host resumes the
    /// underlying token(s).
    Suspended(String),
}

impl ExecStatus {
    pub fn is_suspended(&self) -> bool {
        matches!(self, ExecStatus::Suspended(_))
    }
}

/// Engine internals shared by handles, tokens, and background tasks.
pub struct EngineInner {
    pub config: EngineConfig,
    pub registry: RwLock<CommandRegistry>,
    pub fallback: RwLock<Option<Arc<dyn FallbackHandler>>>,
    pub macros: Arc<ModuleEnv>,
    pub tokens: TokenManager,
    /// Most recent brace-substitution failure, host-queryable.
    pub substatus: Mutex<Option<SubstitutionFailure>>,
    /// Captured at construction; used to arm token timeout timers.
    pub runtime: Option<tokio::runtime::Handle>,
    stdout: OutputStream,
    stderr: OutputStream,
    root_state: ExecutionState,
}

impl EngineInner {
    pub fn write_stdout(&self, text: &str) {
        let _ = self.stdout.lock().unwrap().write_all(text.as_bytes());
    }

    pub fn write_stderr(&self, text: &str) {
        let _ = self.stderr.lock().unwrap().write_all(text.as_bytes());
    }
}

/// A cloneable handle to one engine instance.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let stdout = config
            .stdout
            .clone()
            .unwrap_or_else(|| Arc::new(Mutex::new(std::io::stdout())));
        let stderr = config
            .stderr
            .clone()
            .unwrap_or_else(|| Arc::new(Mutex::new(std::io::stderr())));

        let mut registry = CommandRegistry::new();
        crate::commands::register_builtins(&mut registry);

        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: RwLock::new(registry),
                fallback: RwLock::new(None),
                macros: ModuleEnv::root(),
                tokens: TokenManager::new(),
                substatus: Mutex::new(None),
                runtime: tokio::runtime::Handle::try_current().ok(),
                stdout,
                stderr,
                root_state: ExecutionState::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// The engine's root scope: variables and results persist across
    /// `execute` calls.
    pub fn state(&self) -> &ExecutionState {
        &self.inner.root_state
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register(&self, cmd: Box<dyn Command>) {
        self.inner.registry.write().unwrap().register(cmd);
    }

    /// Register a closure under a name.
    pub fn register_fn<F>(&self, name: &str, func: F)
    where
        F: Fn(&mut crate::commands::CommandContext) -> EngineResult<Flow> + Send + Sync + 'static,
    {
        self.register(Box::new(FnCommand::new(name, func)));
    }

    /// Install the handler consulted for unknown command names.
    pub fn register_fallback(&self, handler: Box<dyn FallbackHandler>) {
        *self.inner.fallback.write().unwrap() = Some(Arc::from(handler));
    }

    pub fn register_fallback_fn<F>(&self, func: F)
    where
        F: Fn(&str, &mut crate::commands::CommandContext) -> EngineResult<Option<Flow>>
            + Send
            + Sync
            + 'static,
    {
        self.register_fallback(Box::new(FnFallback::new(func)));
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute source in the engine's root scope.
    pub fn execute(&self, text: &str) -> EngineResult<ExecStatus> {
        self.execute_with_state(text, &self.inner.root_state.clone(), None, None, 0, 0)
    }

    /// Execute source in a given scope, with an optional substitution
    /// context and position offsets into an enclosing source.
    pub fn execute_with_state(
        &self,
        text: &str,
        state: &ExecutionState,
        subst: Option<SubstitutionContext>,
        filename: Option<&str>,
        line_offset: usize,
        column_offset: usize,
    ) -> EngineResult<ExecStatus> {
        tokens::sweep_expired(&self.inner);
        let mut ctx = subst.unwrap_or_default();
        if filename.is_some() {
            ctx.filename = filename.map(String::from);
        }
        ctx.line_offset = line_offset;
        ctx.column_offset = column_offset;

        let flow = executor::execute_source(&self.inner, text, state, &ctx)?;
        Ok(match flow {
            Flow::Token(id) => ExecStatus::Suspended(id),
            other => ExecStatus::Done(other.carried_status()),
        })
    }

    /// Execute and block until a suspension (if any) resolves. Used by
    /// the CLI and by hosts without their own completion plumbing.
    pub fn execute_and_wait(&self, text: &str) -> EngineResult<bool> {
        match self.execute(text)? {
            ExecStatus::Done(status) => Ok(status),
            ExecStatus::Suspended(id) => Ok(self.wait_for_token(&id)),
        }
    }

    /// Block until a token resolves; a token that already settled yields
    /// its recorded final status.
    pub fn wait_for_token(&self, id: &str) -> bool {
        match self.inner.tokens.attach_waiter(id) {
            Some(rx) => rx.recv().unwrap_or(false),
            None => self.inner.tokens.recent_final_status(id).unwrap_or(false),
        }
    }

    /// Resume a suspended token with a status. Returns false when the
    /// token is unknown (already resolved, timed out, or never issued).
    pub fn resume_token(&self, id: &str, status: bool) -> bool {
        match tokens::resolve_token(&self.inner, id, status) {
            Ok(_) => true,
            Err(EngineError::TokenNotFound(_)) => {
                logging::emit(
                    LogLevel::Warn,
                    LogCategory::Async,
                    None,
                    &format!("resume of unknown token '{}'", id),
                );
                false
            }
            Err(err) => {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Async,
                    None,
                    &format!("resume of '{}' failed: {}", id, err),
                );
                true
            }
        }
    }

    // ------------------------------------------------------------------
    // Macros
    // ------------------------------------------------------------------

    pub fn define_macro(&self, name: &str, body: &str) -> EngineResult<()> {
        if !self.inner.config.allow_macros {
            return Err(EngineError::MacrosDisabled);
        }
        if !is_valid_macro_name(name) {
            return Err(EngineError::Parse {
                message: format!("'{}' is not a valid macro name", name),
                position: SourcePosition::new(1, 1),
            });
        }
        let site = SourcePosition::new(1, 1).with_filename(Some("<api>".to_string()));
        self.inner.macros.define(name, body, site);
        Ok(())
    }

    /// Invoke a macro directly, without going through command dispatch.
    pub fn execute_macro(&self, name: &str) -> EngineResult<ExecStatus> {
        let def = self
            .inner
            .macros
            .resolve(name)
            .ok_or_else(|| EngineError::UnknownCommand {
                name: name.to_string(),
                position: SourcePosition::new(1, 1),
            })?;
        let flow = macros::invoke_macro(
            &self.inner,
            &def,
            Vec::new(),
            &SourcePosition::new(1, 1),
            &self.inner.root_state,
            &SubstitutionContext::new(),
        )?;
        Ok(match flow {
            Flow::Token(id) => ExecStatus::Suspended(id),
            other => ExecStatus::Done(other.carried_status()),
        })
    }

    pub fn list_macros(&self) -> Vec<String> {
        self.inner.macros.list()
    }

    pub fn delete_macro(&self, name: &str) -> bool {
        self.inner.macros.delete(name)
    }

    pub fn clear_macros(&self) {
        self.inner.macros.clear();
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn get_token_status(&self) -> TokenStatusReport {
        self.inner.tokens.status_report()
    }

    /// The most recent brace-substitution failure, if any.
    pub fn get_substatus(&self) -> Option<SubstitutionFailure> {
        self.inner.substatus.lock().unwrap().clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn capture_engine() -> (Engine, Arc<Mutex<Vec<u8>>>) {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let stream: OutputStream = buffer.clone();
        let config = EngineConfig {
            stdout: Some(stream),
            ..Default::default()
        };
        (Engine::new(config), buffer)
    }

    fn stdout_of(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_echo_sequence() {
        let (engine, out) = capture_engine();
        let status = engine.execute("echo \"a\"; echo \"b\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "a\nb\n");
    }

    #[test]
    fn test_flow_operators() {
        let (engine, out) = capture_engine();
        let status = engine.execute("false & echo \"x\" | echo \"y\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "y\n");
    }

    #[test]
    fn test_leading_command_sees_previous_status_true() {
        let (engine, out) = capture_engine();
        let status = engine.execute("& echo \"x\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "x\n");
    }

    #[test]
    fn test_skipped_command_preserves_status() {
        let (engine, out) = capture_engine();
        // The skipped `echo x` must not flip the status seen by `|`
        let status = engine.execute("false & echo \"x\" & echo \"y\" | echo \"z\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "z\n");
    }

    #[test]
    fn test_formal_result_through_brace() {
        let (engine, out) = capture_engine();
        let status = engine.execute("add 2, 3; echo {get_result}").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "5\n");
    }

    #[test]
    fn test_variables_through_brace() {
        let (engine, out) = capture_engine();
        let status = engine.execute("set x, 10; echo {get x}").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "10\n");
    }

    #[test]
    fn test_macro_definition_and_invocation() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("macro greet(echo \"hi $1\"); greet \"world\"")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "hi world\n");
    }

    #[test]
    fn test_inverted_block() {
        let (engine, out) = capture_engine();
        let status = engine.execute("!(false); echo \"ok\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "ok\n");
    }

    #[test]
    fn test_inversion_involution() {
        let (engine, _) = capture_engine();
        assert_eq!(engine.execute("!false").unwrap(), ExecStatus::Done(true));
        assert_eq!(engine.execute("!!false").unwrap(), ExecStatus::Done(false));
        assert_eq!(engine.execute("!!true").unwrap(), ExecStatus::Done(true));
    }

    #[test]
    fn test_inversion_keeps_formal_result() {
        let (engine, out) = capture_engine();
        let status = engine.execute("!add 2, 2; echo {get_result}").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "4\n");
    }

    #[test]
    fn test_suspension_and_resume() {
        let (engine, out) = capture_engine();
        let pending: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let captured = pending.clone();
        engine.register_fn("wait", move |ctx| {
            let id = ctx.request_token(None);
            *captured.lock().unwrap() = Some(id.clone());
            Ok(Flow::Token(id))
        });

        let status = engine.execute("wait; echo \"done\"").unwrap();
        let ExecStatus::Suspended(top) = status else {
            panic!("expected suspension, got {:?}", status);
        };
        assert_eq!(stdout_of(&out), "");

        let inner = pending.lock().unwrap().clone().unwrap();
        assert!(engine.resume_token(&inner, true));
        assert_eq!(stdout_of(&out), "done\n");
        assert!(engine.wait_for_token(&top));
        assert_eq!(engine.get_token_status().active_count, 0);
    }

    #[test]
    fn test_resumed_status_feeds_next_separator() {
        let (engine, out) = capture_engine();
        let pending: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let captured = pending.clone();
        engine.register_fn("wait", move |ctx| {
            let id = ctx.request_token(None);
            *captured.lock().unwrap() = Some(id.clone());
            Ok(Flow::Token(id))
        });

        let status = engine.execute("wait & echo \"ran\" | echo \"skipped\"").unwrap();
        let ExecStatus::Suspended(top) = status else {
            panic!("expected suspension");
        };
        let inner = pending.lock().unwrap().clone().unwrap();
        engine.resume_token(&inner, false);
        assert!(engine.wait_for_token(&top));
        assert_eq!(stdout_of(&out), "skipped\n");
    }

    #[test]
    fn test_suspension_transparency() {
        // The same handler run synchronously or through a token produces
        // the same observable output.
        let run = |asynchronous: bool| {
            let (engine, out) = capture_engine();
            engine.register_fn("maybe", move |ctx| {
                ctx.set_result(Value::Int(7));
                if asynchronous {
                    Ok(Flow::Token(ctx.request_token(None)))
                } else {
                    Ok(Flow::Status(true))
                }
            });
            let status = engine.execute("maybe; echo {get_result}").unwrap();
            let final_status = match status {
                ExecStatus::Done(b) => b,
                ExecStatus::Suspended(top) => {
                    let report = engine.get_token_status();
                    let handler_token = report
                        .tokens
                        .iter()
                        .find(|t| !t.has_sequence)
                        .map(|t| t.id.clone())
                        .unwrap();
                    engine.resume_token(&handler_token, true);
                    engine.wait_for_token(&top)
                }
            };
            (final_status, stdout_of(&out))
        };

        let sync = run(false);
        let asynchronous = run(true);
        assert_eq!(sync, asynchronous);
        assert_eq!(sync.1, "7\n");
    }

    #[test]
    fn test_async_brace_coordination() {
        let (engine, out) = capture_engine();
        let pending: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = pending.clone();
        engine.register_fn("slow", move |ctx| {
            // Value captured before suspension; the host only supplies a
            // status at resume time
            let n = ctx.arg(0).cloned().unwrap_or(Value::Undefined);
            ctx.set_result(n);
            let id = ctx.request_token(None);
            captured.lock().unwrap().push(id.clone());
            Ok(Flow::Token(id))
        });

        let status = engine.execute("add {slow 2}, {slow 3}; echo {get_result}").unwrap();
        let ExecStatus::Suspended(top) = status else {
            panic!("expected suspension");
        };
        let ids = pending.lock().unwrap().clone();
        assert_eq!(ids.len(), 2);
        // Completion order does not affect substitution placement
        engine.resume_token(&ids[1], true);
        assert_eq!(stdout_of(&out), "");
        engine.resume_token(&ids[0], true);
        assert!(engine.wait_for_token(&top));
        assert_eq!(stdout_of(&out), "5\n");
        assert_eq!(engine.get_token_status().active_count, 0);
    }

    #[test]
    fn test_brace_failure_skips_command_but_not_siblings() {
        let (engine, out) = capture_engine();
        let status = engine.execute("echo {get missing}; echo \"after\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "after\n");
        let failure = engine.get_substatus().expect("substatus recorded");
        assert!(failure.message.contains("failed"));
    }

    #[test]
    fn test_brace_child_scope_isolation() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("set x, 1; echo {set x, 2; get x}; echo {get x}")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "2\n1\n");
    }

    #[test]
    fn test_block_shares_scope() {
        let (engine, out) = capture_engine();
        let status = engine.execute("(set y, 5); echo {get y}").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "5\n");
    }

    #[test]
    fn test_unknown_command_fails_but_sequence_continues() {
        let (engine, out) = capture_engine();
        let status = engine.execute("no_such_cmd | echo \"recovered\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "recovered\n");
    }

    #[test]
    fn test_fallback_handler() {
        let (engine, out) = capture_engine();
        engine.register_fallback_fn(|name, ctx| {
            if name.starts_with("ext_") {
                ctx.write_stdout(&format!("external {}\n", name));
                Ok(Some(Flow::Status(true)))
            } else {
                Ok(None)
            }
        });
        assert_eq!(engine.execute("ext_probe").unwrap(), ExecStatus::Done(true));
        assert_eq!(engine.execute("still_unknown").unwrap(), ExecStatus::Done(false));
        assert_eq!(stdout_of(&out), "external ext_probe\n");
    }

    #[test]
    fn test_macro_ret_carries_status_and_result() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("macro m(ret false, 9; echo \"unreached\"); m | echo {get_result}")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "9\n");
    }

    #[test]
    fn test_macro_arg_count_and_star() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("macro show(echo \"$# -> $*\"); show 1, two, \"three four\"")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "3 -> 1, two, three four\n");
    }

    #[test]
    fn test_repeat_loop_with_break() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("repeat 5, (echo \"x\"; break); echo \"end\"")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "x\nend\n");
    }

    #[test]
    fn test_repeat_accumulates() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("set n, 0; repeat 3, (add {get n}, 1; set n, {get_result}); echo {get n}")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "3\n");
    }

    #[test]
    fn test_while_loop() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("set flag, 1; while (get flag), (unset flag; echo \"once\"); echo \"end\"")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "once\nend\n");
    }

    #[test]
    fn test_while_false_condition_never_runs_body() {
        let (engine, out) = capture_engine();
        let status = engine.execute("while (false), (echo \"no\"); echo \"end\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "end\n");
    }

    #[test]
    fn test_define_macro_api() {
        let (engine, out) = capture_engine();
        engine.define_macro("hello", "echo \"from api\"").unwrap();
        assert!(engine.list_macros().contains(&"hello".to_string()));
        assert_eq!(engine.execute_macro("hello").unwrap(), ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "from api\n");
        assert!(engine.delete_macro("hello"));
        assert!(engine.execute_macro("hello").is_err());
    }

    #[test]
    fn test_invalid_macro_name_rejected() {
        let (engine, _) = capture_engine();
        assert!(engine.define_macro("not a name", "echo hi").is_err());
    }

    #[test]
    fn test_macros_disabled() {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let stream: OutputStream = buffer.clone();
        let engine = Engine::new(EngineConfig {
            allow_macros: false,
            stdout: Some(stream),
            ..Default::default()
        });
        assert!(engine.define_macro("m", "echo hi").is_err());
        // The macro builtin errors, the command fails, siblings continue
        let status = engine.execute("macro m(echo hi); echo \"after\"").unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(String::from_utf8(buffer.lock().unwrap().clone()).unwrap(), "after\n");
    }

    #[test]
    fn test_escaped_dollar_stays_literal() {
        let (engine, out) = capture_engine();
        let ctx = SubstitutionContext {
            args: Some(vec![Value::Int(5)]),
            ..Default::default()
        };
        let state = engine.state().clone();
        let status = engine
            .execute_with_state("echo \"\\$1 costs $1\"", &state, Some(ctx), None, 0, 0)
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "$1 costs 5\n");
    }

    #[test]
    fn test_unescape_brace_reparses() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("set cmd, \"echo deep\"; ${get cmd}")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "deep\n");
    }

    #[test]
    fn test_escaping_brace_result_is_single_token() {
        let (engine, out) = capture_engine();
        let status = engine
            .execute("set v, \"a; b\"; echo {get v}; echo \"next\"")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "a; b\nnext\n");
    }

    #[test]
    fn test_top_level_parse_error_is_err() {
        let (engine, _) = capture_engine();
        let err = engine.execute("echo \"unterminated").unwrap_err();
        match err {
            EngineError::Parse { position, .. } => {
                assert_eq!((position.line, position.column), (1, 6));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_token_accounting_after_completion() {
        let (engine, _) = capture_engine();
        engine.execute("echo \"a\"; add 1, 2; echo {get_result}").unwrap();
        assert_eq!(engine.get_token_status().active_count, 0);
    }

    #[test]
    fn test_token_status_report_shape() {
        let (engine, _) = capture_engine();
        engine.register_fn("wait", |ctx| Ok(Flow::Token(ctx.request_token(None))));
        let status = engine.execute("wait; echo \"x\"").unwrap();
        assert!(status.is_suspended());

        let report = engine.get_token_status();
        assert_eq!(report.active_count, 2);
        assert!(report.tokens.iter().any(|t| t.has_sequence));

        // Clean up: resume the handler token
        let handler = report.tokens.iter().find(|t| !t.has_sequence).unwrap();
        engine.resume_token(&handler.id.clone(), true);
        assert_eq!(engine.get_token_status().active_count, 0);
    }

    #[test]
    fn test_resume_unknown_token_returns_false() {
        let (engine, _) = capture_engine();
        assert!(!engine.resume_token("token_999", true));
    }

    #[test]
    fn test_sugar_can_be_disabled() {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let stream: OutputStream = buffer.clone();
        let engine = Engine::new(EngineConfig {
            enable_syntactic_sugar: false,
            stdout: Some(stream),
            ..Default::default()
        });
        // Without sugar the definition form must be written out long-hand
        let status = engine
            .execute("macro 'greet', (echo \"hi\"); greet")
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(String::from_utf8(buffer.lock().unwrap().clone()).unwrap(), "hi\n");
    }

    #[test]
    fn test_script_arguments_via_context() {
        let (engine, out) = capture_engine();
        let ctx = SubstitutionContext {
            args: Some(vec![
                Value::QuotedString("alpha".into()),
                Value::Int(2),
            ]),
            ..Default::default()
        };
        let state = engine.state().clone();
        let status = engine
            .execute_with_state("echo \"$1/$2 of $#\"", &state, Some(ctx), Some("args.paw"), 0, 0)
            .unwrap();
        assert_eq!(status, ExecStatus::Done(true));
        assert_eq!(stdout_of(&out), "alpha/2 of 2\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sleep_command_suspends_and_resumes() {
        let (engine, out) = capture_engine();
        let worker = {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || engine.execute_and_wait("sleep 20; echo \"woke\""))
        };
        let status = worker.await.unwrap().unwrap();
        assert!(status);
        assert_eq!(stdout_of(&out), "woke\n");
        assert_eq!(engine.get_token_status().active_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_token_timeout_force_cleans() {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let stream: OutputStream = buffer.clone();
        let engine = Engine::new(EngineConfig {
            default_token_timeout: Duration::from_millis(30),
            stdout: Some(stream),
            ..Default::default()
        });
        let cleaned: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
        let flag = cleaned.clone();
        engine.register_fn("hang", move |ctx| {
            let flag = flag.clone();
            let id = ctx.request_token(Some(Box::new(move || {
                *flag.lock().unwrap() = true;
            })));
            Ok(Flow::Token(id))
        });

        let engine2 = engine.clone();
        let status = tokio::task::spawn_blocking(move || {
            engine2.execute_and_wait("hang; echo \"never\"")
        })
        .await
        .unwrap()
        .unwrap();

        // The continuation is discarded, not resumed
        assert!(!status);
        assert!(*cleaned.lock().unwrap());
        assert_eq!(String::from_utf8(buffer.lock().unwrap().clone()).unwrap(), "");
        // Both the handler token and the captured sequence expire
        for _ in 0..100 {
            if engine.get_token_status().active_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.get_token_status().active_count, 0);
    }
}
