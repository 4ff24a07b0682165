//! Tool registry: every capability the process can hand to a handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use jobclaw_core::context::ToolSet;
use jobclaw_core::traits::Tool;

/// Registered tools, keyed by capability name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second tool with the same name replaces the first.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("⚠️ Tool '{name}' registered twice, keeping the latest");
        } else {
            tracing::debug!("🔧 Registered tool: {name}");
        }
    }

    /// Find a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered names in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Build the filtered set handed to one run. Unknown names are skipped.
    pub fn toolset_for(&self, allowed: &[String]) -> ToolSet {
        let mut set = ToolSet::new();
        for name in allowed {
            match self.tools.get(name) {
                Some(tool) => set.insert(tool.clone()),
                None => tracing::debug!("Tool '{name}' allowed but not registered"),
            }
        }
        set
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
