//! Macro Machinery
//!
//! Macros are named command-sequence bodies stored per module
//! environment. A child environment sees its parent's macros and forks
//! locally on write. Forward declarations reserve a name before its body
//! exists so mutually recursive macros resolve.
//!
//! Invocation builds a child scope, installs the call-site arguments as
//! the positional-substitution context, chains the definition and
//! invocation sites for diagnostics, and lifts the body's formal result
//! back into the caller's scope.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex_lite::Regex;

use crate::engine::EngineInner;
use crate::interpreter::errors::{EngineError, EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::state::ExecutionState;
use crate::interpreter::substitution::SubstitutionContext;
use crate::interpreter::tokens::{self, Continuation, RequestOptions};
use crate::parser::types::{MacroContext, SourcePosition};
use crate::value::Value;

lazy_static! {
    static ref MACRO_NAME: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

pub fn is_valid_macro_name(name: &str) -> bool {
    MACRO_NAME.is_match(name)
}

#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub name: String,
    pub body: String,
    pub definition_site: SourcePosition,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// True while the name is only forward-declared.
    pub is_forward: bool,
}

/// One scoping unit for macro definitions with copy-on-write
/// inheritance from its parent.
pub struct ModuleEnv {
    parent: Option<Arc<ModuleEnv>>,
    macros: Mutex<IndexMap<String, MacroDefinition>>,
}

impl ModuleEnv {
    pub fn root() -> Arc<ModuleEnv> {
        Arc::new(ModuleEnv {
            parent: None,
            macros: Mutex::new(IndexMap::new()),
        })
    }

    /// Child environment: reads fall through to the parent, writes fork.
    pub fn child(parent: &Arc<ModuleEnv>) -> Arc<ModuleEnv> {
        Arc::new(ModuleEnv {
            parent: Some(parent.clone()),
            macros: Mutex::new(IndexMap::new()),
        })
    }

    pub fn define(&self, name: impl Into<String>, body: impl Into<String>, site: SourcePosition) {
        let name = name.into();
        let def = MacroDefinition {
            name: name.clone(),
            body: body.into(),
            definition_site: site,
            timestamp: chrono::Utc::now(),
            is_forward: false,
        };
        self.macros.lock().unwrap().insert(name, def);
    }

    /// Reserve a name with an empty body so it resolves before its
    /// definition appears. A later `define` replaces it.
    pub fn forward_declare(&self, name: impl Into<String>, site: SourcePosition) {
        let name = name.into();
        let mut macros = self.macros.lock().unwrap();
        if macros.contains_key(&name) {
            return;
        }
        macros.insert(
            name.clone(),
            MacroDefinition {
                name,
                body: String::new(),
                definition_site: site,
                timestamp: chrono::Utc::now(),
                is_forward: true,
            },
        );
    }

    /// Look a name up through the environment chain, nearest first.
    pub fn resolve(&self, name: &str) -> Option<MacroDefinition> {
        if let Some(def) = self.macros.lock().unwrap().get(name) {
            return Some(def.clone());
        }
        self.parent.as_ref().and_then(|p| p.resolve(name))
    }

    /// Remove a definition from this environment (the parent's copy, if
    /// any, becomes visible again).
    pub fn delete(&self, name: &str) -> bool {
        self.macros.lock().unwrap().shift_remove(name).is_some()
    }

    pub fn clear(&self) {
        self.macros.lock().unwrap().clear();
    }

    /// All resolvable names, parent definitions first, in definition
    /// order.
    pub fn list(&self) -> Vec<String> {
        let mut merged: IndexMap<String, ()> = IndexMap::new();
        self.collect_names(&mut merged);
        merged.into_keys().collect()
    }

    fn collect_names(&self, into: &mut IndexMap<String, ()>) {
        if let Some(parent) = &self.parent {
            parent.collect_names(into);
        }
        for name in self.macros.lock().unwrap().keys() {
            into.insert(name.clone(), ());
        }
    }
}

/// Invoke a macro: run its body in a child scope with the call-site
/// arguments installed, then lift the body's result into the caller.
pub fn invoke_macro(
    engine: &Arc<EngineInner>,
    def: &MacroDefinition,
    args: Vec<Value>,
    invocation_site: &SourcePosition,
    caller_state: &ExecutionState,
    caller_ctx: &SubstitutionContext,
) -> EngineResult<Flow> {
    if !engine.config.allow_macros {
        return Err(EngineError::MacrosDisabled);
    }
    if def.is_forward {
        logging::emit(
            LogLevel::Warn,
            LogCategory::Macro,
            Some(invocation_site),
            &format!("macro '{}' is declared but not yet defined", def.name),
        );
        return Ok(Flow::Status(false));
    }
    let depth = caller_ctx.depth + 1;
    if depth > engine.config.max_macro_depth {
        return Err(EngineError::MacroDepthExceeded(engine.config.max_macro_depth));
    }

    logging::emit(
        LogLevel::Debug,
        LogCategory::Macro,
        Some(invocation_site),
        &format!("invoking macro '{}' with {} args", def.name, args.len()),
    );

    let child_state = caller_state.create_child();
    let macro_context = Arc::new(MacroContext {
        macro_name: def.name.clone(),
        definition_site: def.definition_site.clone(),
        invocation_site: invocation_site.clone(),
        parent: caller_ctx.macro_context.clone(),
    });
    let body_ctx = SubstitutionContext {
        args: Some(args),
        macro_context: Some(macro_context),
        filename: def.definition_site.filename.clone(),
        line_offset: def.definition_site.line.saturating_sub(1),
        column_offset: def.definition_site.column.saturating_sub(1),
        depth,
    };

    let flow = crate::interpreter::executor::execute_source(engine, &def.body, &child_state, &body_ctx)?;
    match flow {
        Flow::Return { status } | Flow::Status(status) => {
            caller_state.restore(child_state.snapshot());
            Ok(Flow::Status(status))
        }
        Flow::Token(token_id) => {
            // Body suspended: lift the result when it settles
            let macro_token = tokens::request_token(
                engine,
                child_state.clone(),
                RequestOptions {
                    position: Some(invocation_site.clone()),
                    ..Default::default()
                },
            );
            let caller = caller_state.clone();
            let child = child_state.clone();
            tokens::set_continuation(
                engine,
                &macro_token,
                Continuation::Callback(Box::new(move |_engine, status| {
                    caller.restore(child.snapshot());
                    Ok(Flow::Status(status))
                })),
            )?;
            tokens::chain_or_resolve(engine, &token_id, &macro_token)?;
            Ok(Flow::Token(macro_token))
        }
        signal => {
            // break/continue pass through to the caller's loop
            caller_state.restore(child_state.snapshot());
            Ok(signal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SourcePosition {
        SourcePosition::new(1, 1)
    }

    #[test]
    fn test_define_and_resolve() {
        let env = ModuleEnv::root();
        env.define("greet", "echo hi", site());
        let def = env.resolve("greet").unwrap();
        assert_eq!(def.body, "echo hi");
        assert!(!def.is_forward);
        assert!(env.resolve("other").is_none());
    }

    #[test]
    fn test_child_sees_parent_and_forks_on_write() {
        let root = ModuleEnv::root();
        root.define("a", "echo root", site());
        let child = ModuleEnv::child(&root);
        assert_eq!(child.resolve("a").unwrap().body, "echo root");

        child.define("a", "echo child", site());
        assert_eq!(child.resolve("a").unwrap().body, "echo child");
        assert_eq!(root.resolve("a").unwrap().body, "echo root");
    }

    #[test]
    fn test_forward_declaration_resolves() {
        let env = ModuleEnv::root();
        env.forward_declare("later", site());
        assert!(env.resolve("later").unwrap().is_forward);

        env.define("later", "echo now", site());
        let def = env.resolve("later").unwrap();
        assert!(!def.is_forward);
        assert_eq!(def.body, "echo now");
    }

    #[test]
    fn test_forward_declaration_does_not_clobber() {
        let env = ModuleEnv::root();
        env.define("f", "echo hi", site());
        env.forward_declare("f", site());
        assert!(!env.resolve("f").unwrap().is_forward);
    }

    #[test]
    fn test_delete_uncovers_parent() {
        let root = ModuleEnv::root();
        root.define("a", "echo root", site());
        let child = ModuleEnv::child(&root);
        child.define("a", "echo child", site());
        assert!(child.delete("a"));
        assert_eq!(child.resolve("a").unwrap().body, "echo root");
        assert!(!child.delete("a"));
    }

    #[test]
    fn test_list_merges_in_definition_order() {
        let root = ModuleEnv::root();
        root.define("a", "", site());
        root.define("b", "", site());
        let child = ModuleEnv::child(&root);
        child.define("c", "", site());
        child.define("b", "override", site());
        assert_eq!(child.list(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_macro_name_validation() {
        assert!(is_valid_macro_name("greet"));
        assert!(is_valid_macro_name("_x9"));
        assert!(!is_valid_macro_name("9x"));
        assert!(!is_valid_macro_name("a-b"));
        assert!(!is_valid_macro_name(""));
    }
}
