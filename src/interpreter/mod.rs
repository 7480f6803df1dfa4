//! PawScript Interpreter
//!
//! The execution engine: scopes and formal results, the substitution
//! layer, the token-based suspension mechanism, the brace coordinator,
//! the sequence executor, and the macro machinery.

pub mod braces;
pub mod coordinator;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod macros;
pub mod state;
pub mod substitution;
pub mod tokens;

pub use errors::{EngineError, EngineResult, Flow};
pub use logging::{LogCategory, LogLevel};
pub use macros::{MacroDefinition, ModuleEnv};
pub use state::ExecutionState;
pub use substitution::{SubstitutionContext, SubstitutionFailure};
pub use tokens::{TokenManager, TokenStatusEntry, TokenStatusReport};
