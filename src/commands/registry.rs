// src/commands/registry.rs
use indexmap::IndexMap;
use std::sync::Arc;

use super::types::Command;

pub struct CommandRegistry {
    commands: IndexMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: IndexMap::new(),
        }
    }

    pub fn register(&mut self, cmd: Box<dyn Command>) {
        let name = cmd.name().to_string();
        self.commands.insert(name, Arc::from(cmd));
    }

    pub fn register_arc(&mut self, cmd: Arc<dyn Command>) {
        self.commands.insert(cmd.name().to_string(), cmd);
    }

    /// A cloned handle, so dispatch can run the handler without holding
    /// the registry lock.
    pub fn get_arc(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
