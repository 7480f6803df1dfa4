//! Execution State
//!
//! Per-scope container for the formal result and the variable table. The
//! formal result is the value channel between commands, distinct from the
//! true/false status. Child states inherit the current result; variables
//! are readable through the parent chain but writes stay local unless the
//! child was created with shared variables.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::value::Value;

#[derive(Debug)]
struct StateInner {
    result: Mutex<Option<Value>>,
    vars: Arc<Mutex<HashMap<String, Value>>>,
    parent: Option<Arc<StateInner>>,
}

/// A shareable handle to one execution scope. Cloning the handle shares
/// the scope; `create_child` makes a new scope.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    inner: Arc<StateInner>,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                result: Mutex::new(None),
                vars: Arc::new(Mutex::new(HashMap::new())),
                parent: None,
            }),
        }
    }

    /// Store the formal result. Storing the symbol `undefined` (or the
    /// `Undefined` value) clears it instead.
    pub fn set_result(&self, value: Value) {
        let mut slot = self.inner.result.lock().unwrap();
        if value.clears_result() {
            *slot = None;
        } else {
            *slot = Some(value);
        }
    }

    pub fn get_result(&self) -> Option<Value> {
        self.inner.result.lock().unwrap().clone()
    }

    pub fn has_result(&self) -> bool {
        self.inner.result.lock().unwrap().is_some()
    }

    pub fn clear_result(&self) {
        *self.inner.result.lock().unwrap() = None;
    }

    /// Capture `(value, present)` in one step.
    pub fn snapshot(&self) -> (Option<Value>, bool) {
        let slot = self.inner.result.lock().unwrap();
        (slot.clone(), slot.is_some())
    }

    pub fn restore(&self, snapshot: (Option<Value>, bool)) {
        let mut slot = self.inner.result.lock().unwrap();
        *slot = if snapshot.1 { snapshot.0 } else { None };
    }

    pub fn set_var(&self, name: impl Into<String>, value: Value) {
        self.inner.vars.lock().unwrap().insert(name.into(), value);
    }

    /// Look a variable up through the scope chain.
    pub fn get_var(&self, name: &str) -> Option<Value> {
        let mut scope: Option<&Arc<StateInner>> = Some(&self.inner);
        while let Some(inner) = scope {
            if let Some(v) = inner.vars.lock().unwrap().get(name) {
                return Some(v.clone());
            }
            scope = inner.parent.as_ref();
        }
        None
    }

    /// Remove a variable from the nearest scope that defines it.
    pub fn unset_var(&self, name: &str) -> bool {
        let mut scope: Option<&Arc<StateInner>> = Some(&self.inner);
        while let Some(inner) = scope {
            if inner.vars.lock().unwrap().remove(name).is_some() {
                return true;
            }
            scope = inner.parent.as_ref();
        }
        false
    }

    /// New scope inheriting the current result. Variables read through to
    /// this scope but writes in the child stay in the child.
    pub fn create_child(&self) -> ExecutionState {
        ExecutionState {
            inner: Arc::new(StateInner {
                result: Mutex::new(self.get_result()),
                vars: Arc::new(Mutex::new(HashMap::new())),
                parent: Some(self.inner.clone()),
            }),
        }
    }

    /// New scope inheriting the current result and sharing this scope's
    /// variable table: writes in the child mutate the parent.
    pub fn create_child_shared_vars(&self) -> ExecutionState {
        ExecutionState {
            inner: Arc::new(StateInner {
                result: Mutex::new(self.get_result()),
                vars: self.inner.vars.clone(),
                parent: self.inner.parent.clone(),
            }),
        }
    }

    /// Whether two handles refer to the same scope.
    pub fn same_scope(&self, other: &ExecutionState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_roundtrip() {
        let state = ExecutionState::new();
        assert!(!state.has_result());
        state.set_result(Value::Int(5));
        assert!(state.has_result());
        assert_eq!(state.get_result(), Some(Value::Int(5)));
        state.clear_result();
        assert!(!state.has_result());
    }

    #[test]
    fn test_undefined_symbol_clears_result() {
        let state = ExecutionState::new();
        state.set_result(Value::Int(5));
        state.set_result(Value::Symbol("undefined".into()));
        assert!(!state.has_result());
        assert_eq!(state.get_result(), None);
    }

    #[test]
    fn test_child_inherits_result() {
        let state = ExecutionState::new();
        state.set_result(Value::Int(5));
        let child = state.create_child();
        assert_eq!(child.get_result(), Some(Value::Int(5)));

        child.set_result(Value::Int(9));
        assert_eq!(state.get_result(), Some(Value::Int(5)));
    }

    #[test]
    fn test_child_reads_parent_vars_but_writes_locally() {
        let state = ExecutionState::new();
        state.set_var("x", Value::Int(10));
        let child = state.create_child();
        assert_eq!(child.get_var("x"), Some(Value::Int(10)));

        child.set_var("x", Value::Int(20));
        assert_eq!(child.get_var("x"), Some(Value::Int(20)));
        assert_eq!(state.get_var("x"), Some(Value::Int(10)));

        child.set_var("y", Value::Int(1));
        assert_eq!(state.get_var("y"), None);
    }

    #[test]
    fn test_shared_vars_child_mutates_parent() {
        let state = ExecutionState::new();
        state.set_var("x", Value::Int(10));
        let child = state.create_child_shared_vars();
        child.set_var("x", Value::Int(20));
        assert_eq!(state.get_var("x"), Some(Value::Int(20)));
    }

    #[test]
    fn test_snapshot_restore() {
        let state = ExecutionState::new();
        state.set_result(Value::Bool(true));
        let snap = state.snapshot();
        state.clear_result();
        state.restore(snap);
        assert_eq!(state.get_result(), Some(Value::Bool(true)));
    }
}
