use crate::executor::{FlowExecutor, RunReport, RUNNER_NODE_TYPE};
use crate::registry::HandlerRegistry;
use crate::store::{RunStateStore, StateChange};
use flowcore::{EventBus, Flow, FlowError, Message, RunEvent, RunInputs};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Main entry point for running flows
pub struct FlowRuntime {
    registry: Arc<HandlerRegistry>,
    executor: FlowExecutor,
    event_bus: Arc<EventBus>,
    store: RunStateStore,
}

impl FlowRuntime {
    /// Create a runtime with an empty registry
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(HandlerRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<HandlerRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let store = RunStateStore::new(config.state_buffer_size);
        let executor = FlowExecutor::new(registry.clone(), store.clone(), event_bus.clone())
            .with_checkpoint_types(config.checkpoint_types);

        Self {
            registry,
            executor,
            event_bus,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Live per-node state of the current run
    pub fn store(&self) -> &RunStateStore {
        &self.store
    }

    /// Run a flow from its roots, discarding state from any previous run
    pub async fn execute_flow(
        &self,
        flow: &Flow,
        inputs: &RunInputs,
        globals: Message,
        context: Message,
    ) -> RunReport {
        self.executor.execute_flow(flow, inputs, globals, context).await
    }

    /// Continue from `node_id` (typically a paused checkpoint) with `msg`
    pub async fn execute_branch(
        &self,
        flow: &Flow,
        inputs: &RunInputs,
        globals: Message,
        context: Message,
        msg: Message,
        node_id: &str,
    ) -> Result<RunReport, FlowError> {
        self.executor
            .execute_branch(flow, inputs, globals, context, msg, node_id)
            .await
    }

    /// Subscribe to run events
    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        self.event_bus.subscribe()
    }

    /// Subscribe to run state store changes
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.store.subscribe()
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    pub state_buffer_size: usize,
    /// Node types that stop automatic traversal
    pub checkpoint_types: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            state_buffer_size: 1000,
            checkpoint_types: vec![RUNNER_NODE_TYPE.to_string()],
        }
    }
}
