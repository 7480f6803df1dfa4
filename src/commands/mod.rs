// src/commands/mod.rs
pub mod echo;
pub mod flow;
pub mod fsio;
pub mod macro_cmd;
pub mod math;
pub mod random_cmd;
pub mod registry;
pub mod result;
pub mod sleep_cmd;
pub mod tokens_cmd;
pub mod types;
pub mod vars;

pub use registry::CommandRegistry;
pub use types::{Command, CommandContext, FallbackHandler, FnCommand, FnFallback};

/// Register the builtin command set.
pub fn register_builtins(registry: &mut CommandRegistry) {
    registry.register(Box::new(echo::EchoCommand));
    registry.register(Box::new(vars::SetCommand));
    registry.register(Box::new(vars::GetCommand));
    registry.register(Box::new(vars::UnsetCommand));
    registry.register(Box::new(result::GetResultCommand));
    registry.register(Box::new(result::SetResultCommand));
    registry.register(Box::new(result::ClearResultCommand));
    registry.register(Box::new(math::AddCommand));
    registry.register(Box::new(math::SubCommand));
    registry.register(Box::new(math::MulCommand));
    registry.register(Box::new(math::DivCommand));
    registry.register(Box::new(flow::TrueCommand));
    registry.register(Box::new(flow::FalseCommand));
    registry.register(Box::new(flow::RetCommand));
    registry.register(Box::new(flow::BreakCommand));
    registry.register(Box::new(flow::ContinueCommand));
    registry.register(Box::new(flow::RepeatCommand));
    registry.register(Box::new(flow::WhileCommand));
    registry.register(Box::new(sleep_cmd::SleepCommand));
    registry.register(Box::new(random_cmd::RandomCommand));
    registry.register(Box::new(fsio::ReadFileCommand));
    registry.register(Box::new(fsio::WriteFileCommand));
    registry.register(Box::new(macro_cmd::MacroCommand));
    registry.register(Box::new(tokens_cmd::TokensCommand));
}
