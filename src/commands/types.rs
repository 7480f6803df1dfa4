//! Command Types
//!
//! The `Command` trait native handlers implement, the per-dispatch
//! context handed to them, and the fallback-handler hook for unknown
//! command names.

use std::sync::Arc;

use crate::engine::{Engine, EngineInner};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::interpreter::state::ExecutionState;
use crate::interpreter::substitution::SubstitutionContext;
use crate::interpreter::tokens::{self, CleanupFn, RequestOptions};
use crate::parser::types::SourcePosition;
use crate::value::Value;

/// Context for one handler dispatch.
pub struct CommandContext {
    pub(crate) inner: Arc<EngineInner>,
    pub args: Vec<Value>,
    pub position: SourcePosition,
    pub state: ExecutionState,
    pub subst: SubstitutionContext,
}

impl CommandContext {
    pub(crate) fn new(
        inner: &Arc<EngineInner>,
        args: Vec<Value>,
        position: SourcePosition,
        state: ExecutionState,
        subst: SubstitutionContext,
    ) -> Self {
        Self {
            inner: Arc::clone(inner),
            args,
            position,
            state,
            subst,
        }
    }

    /// A cloneable engine handle, e.g. for background tasks that resume
    /// tokens later.
    pub fn engine(&self) -> Engine {
        Engine::from_inner(self.inner.clone())
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    // ------------------------------------------------------------------
    // Formal result accessors
    // ------------------------------------------------------------------

    pub fn set_result(&self, value: Value) {
        self.state.set_result(value);
    }

    pub fn get_result(&self) -> Option<Value> {
        self.state.get_result()
    }

    pub fn has_result(&self) -> bool {
        self.state.has_result()
    }

    pub fn clear_result(&self) {
        self.state.clear_result();
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        self.state.set_var(name, value);
    }

    pub fn get_var(&self, name: &str) -> Option<Value> {
        self.state.get_var(name)
    }

    // ------------------------------------------------------------------
    // Suspension
    // ------------------------------------------------------------------

    /// Allocate a suspension token bound to this dispatch's scope.
    /// Returning it from the handler suspends the enclosing sequence.
    pub fn request_token(&self, cleanup: Option<CleanupFn>) -> String {
        tokens::request_token(
            &self.inner,
            self.state.clone(),
            RequestOptions {
                cleanup,
                position: Some(self.position.clone()),
                ..Default::default()
            },
        )
    }

    pub fn resume_token(&self, id: &str, status: bool) -> bool {
        self.engine().resume_token(id, status)
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    pub fn write_stdout(&self, text: &str) {
        self.inner.write_stdout(text);
    }

    pub fn write_stderr(&self, text: &str) {
        self.inner.write_stderr(text);
    }

    /// Execute a block body in this command's scope (loops and grouping
    /// commands use this).
    pub fn exec_block(&self, body: &str) -> EngineResult<Flow> {
        let block_ctx = self.subst.for_embedded(&self.position);
        crate::interpreter::executor::execute_source(&self.inner, body, &self.state, &block_ctx)
    }
}

/// A native command handler.
pub trait Command: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow>;
}

/// Called for command names nothing else resolves. Returning `Ok(None)`
/// means "still unknown".
pub trait FallbackHandler: Send + Sync {
    fn handle(&self, name: &str, ctx: &mut CommandContext) -> EngineResult<Option<Flow>>;
}

/// Adapter so closures register as commands.
pub struct FnCommand<F> {
    name: String,
    func: F,
}

impl<F> FnCommand<F>
where
    F: Fn(&mut CommandContext) -> EngineResult<Flow> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Command for FnCommand<F>
where
    F: Fn(&mut CommandContext) -> EngineResult<Flow> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        (self.func)(ctx)
    }
}

/// Adapter so closures register as fallback handlers.
pub struct FnFallback<F> {
    func: F,
}

impl<F> FnFallback<F>
where
    F: Fn(&str, &mut CommandContext) -> EngineResult<Option<Flow>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> FallbackHandler for FnFallback<F>
where
    F: Fn(&str, &mut CommandContext) -> EngineResult<Option<Flow>> + Send + Sync,
{
    fn handle(&self, name: &str, ctx: &mut CommandContext) -> EngineResult<Option<Flow>> {
        (self.func)(name, ctx)
    }
}
