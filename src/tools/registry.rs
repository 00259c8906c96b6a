use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    model::NodeCategory,
    tools::{CounterTool, DelayTool, RunWorkflowTool, Tool},
};

/// Built-in library sections, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ToolCategory {
    Actions,
    Utilities,
    Widgets,
    Controls,
    Custom,
    Mcp,
}

impl ToolCategory {
    /// Library section a node category is served from by default.
    pub fn of(category: NodeCategory) -> Self {
        match category {
            NodeCategory::Utility => ToolCategory::Utilities,
            NodeCategory::Control => ToolCategory::Controls,
            NodeCategory::Widget => ToolCategory::Widgets,
            NodeCategory::Custom => ToolCategory::Custom,
            NodeCategory::Action | NodeCategory::Trigger | NodeCategory::Other => ToolCategory::Actions,
        }
    }
}

/// String-keyed tool lookup.
#[derive(Default)]
pub struct ToolRegistry {
    library: HashMap<ToolCategory, HashMap<String, Arc<dyn Tool>>>,
    plugins: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the tools shipped with the crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ToolCategory::Controls, Arc::new(DelayTool));
        registry.register(ToolCategory::Controls, Arc::new(RunWorkflowTool));
        registry.register(ToolCategory::Utilities, Arc::new(CounterTool));
        registry
    }

    /// Add or replace a built-in library tool.
    pub fn register(
        &mut self,
        category: ToolCategory,
        tool: Arc<dyn Tool>,
    ) {
        debug!(tool = tool.name(), category = category.as_ref(), "register tool");
        self.library.entry(category).or_default().insert(tool.name().to_string(), tool);
    }

    /// Add or replace a plugin tool, consulted after the whole library.
    pub fn register_plugin(
        &mut self,
        tool: Arc<dyn Tool>,
    ) {
        debug!(tool = tool.name(), "register plugin tool");
        self.plugins.insert(tool.name().to_string(), tool);
    }

    /// Resolve a node type: the section of the node's own category first,
    /// then the remaining library sections in order, then plugins.
    pub fn resolve(
        &self,
        node_type: &str,
        category: NodeCategory,
    ) -> Option<Arc<dyn Tool>> {
        use strum::IntoEnumIterator;

        let own = ToolCategory::of(category);
        std::iter::once(own)
            .chain(ToolCategory::iter().filter(|c| *c != own))
            .filter_map(|category| self.library.get(&category))
            .find_map(|tools| tools.get(node_type).cloned())
            .or_else(|| self.plugins.get(node_type).cloned())
    }

    pub fn len(&self) -> usize {
        self.library.values().map(HashMap::len).sum::<usize>() + self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
