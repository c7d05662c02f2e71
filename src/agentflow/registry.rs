//! Named tool registry.
//!
//! A [`ToolRegistry`] maps unique names to [`Tool`] implementations and can
//! project the whole set into provider-declaration form. Mutation is guarded
//! by a read/write lock so a registry can be shared between an agent, its
//! executor, and the runner's filtered views.

use crate::agentflow::tool::{Tool, ToolDeclaration};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of tools available to an agent.
///
/// Registering a tool under an existing name replaces the previous entry —
/// names stay unique.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool, replacing any previous tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        if tools.insert(name.clone(), tool).is_some() {
            log::debug!("tool '{}' replaced in registry", name);
        }
    }

    /// Remove a tool by name, returning it when present.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().await.remove(name)
    }

    /// Look up a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Project every tool into provider-declaration form, sorted by name.
    pub async fn declarations(&self) -> Vec<ToolDeclaration> {
        let tools = self.tools.read().await;
        let mut decls: Vec<ToolDeclaration> = tools.values().map(|t| t.declaration()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Build a new registry containing only the named tools.
    ///
    /// Names that are not registered are skipped. Used by the runner to hand
    /// specialized agent types a restricted tool set.
    pub async fn filtered(&self, allow: &[String]) -> ToolRegistry {
        let tools = self.tools.read().await;
        let mut subset = HashMap::new();
        for name in allow {
            if let Some(tool) = tools.get(name) {
                subset.insert(name.clone(), Arc::clone(tool));
            }
        }
        ToolRegistry {
            tools: RwLock::new(subset),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
