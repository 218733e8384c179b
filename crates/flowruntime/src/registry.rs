use flowcore::{Handler, HandlerMetadata, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available node types
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own type tag, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let node_type = handler.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.handlers.insert(node_type, handler);
    }

    /// Look up the handler for a type tag
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn Handler>, WorkflowError> {
        self.handlers
            .get(node_type)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<HandlerMetadata> {
        self.handlers.get(node_type).map(|h| h.metadata())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
