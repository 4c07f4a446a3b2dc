//! Tool registration and lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Tool;

/// Name to tool capability lookup.
///
/// Read-mostly: registration happens at startup and rarely afterwards, so
/// the map sits behind a readers-writer lock. Execution happens outside any
/// critical section.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a registry preloaded with the built-in tools.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        super::builtin::register_builtins(&registry);
        registry
    }

    /// Register or replace a tool. Names are case-sensitive and non-empty.
    pub fn register(&self, tool: Arc<dyn Tool>) -> anyhow::Result<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            anyhow::bail!("tool name cannot be empty");
        }
        self.tools.write().insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).map(Arc::clone)
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// `name: description` lines for the resolution prompt.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let tools = self.tools.read();
        let mut lines: Vec<String> = tools
            .values()
            .map(|tool| format!("{}: {}", tool.name(), tool.description()))
            .collect();
        lines.sort();
        lines
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolArguments, ToolError};

    struct NamedTool(&'static str);

    #[async_trait::async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "a named test tool"
        }

        async fn execute(&self, _arguments: ToolArguments) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!(self.0))
        }
    }

    #[test]
    fn register_then_get_round_trip() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("echo"))).unwrap();

        let tool = registry.get("echo").expect("tool should be registered");
        assert_eq!(tool.name(), "echo");
        assert!(registry.exists("echo"));
        assert!(!registry.exists("Echo"), "names are case-sensitive");
    }

    #[test]
    fn register_rejects_empty_name() {
        let registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(NamedTool(""))).is_err());
    }

    #[test]
    fn register_replaces_existing_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("dup"))).unwrap();
        registry.register(Arc::new(NamedTool("dup"))).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_is_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("zeta"))).unwrap();
        registry.register(Arc::new(NamedTool("alpha"))).unwrap();
        assert_eq!(registry.list(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
