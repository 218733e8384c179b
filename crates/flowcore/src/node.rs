use crate::{events::EventEmitter, Message, NodeError, NodeId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Core trait that all node-type handlers implement
#[async_trait]
pub trait Handler: Send + Sync {
    /// Type tag this handler serves (e.g. "input", "userFunction")
    fn node_type(&self) -> &str;

    /// Run the node against the branch message in `ctx`.
    ///
    /// A recoverable failure is returned as `Err`, or as `Ok` with a
    /// message carrying the error-signal key; both end the branch.
    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError>;

    /// Optional: description shown by tooling
    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata::default()
    }
}

/// Execution context passed to each handler call
#[derive(Clone)]
pub struct HandlerContext {
    pub node_id: NodeId,

    /// Run-wide read-only record
    pub globals: Arc<Message>,

    /// Per-node overrides for this run
    pub inputs: Message,

    /// Branch message; owned by this call
    pub msg: Message,

    /// Caller-defined run data, forwarded untouched
    pub context: Arc<Message>,

    pub events: EventEmitter,
}

impl HandlerContext {
    pub fn new(node_id: impl Into<NodeId>, events: EventEmitter) -> Self {
        Self {
            node_id: node_id.into(),
            globals: Arc::new(Message::new()),
            inputs: Message::new(),
            msg: Message::new(),
            context: Arc::new(Message::new()),
            events,
        }
    }

    pub fn with_inputs(mut self, inputs: Message) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_msg(mut self, msg: Message) -> Self {
        self.msg = msg;
        self
    }

    pub fn with_globals(mut self, globals: Arc<Message>) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_context(mut self, context: Arc<Message>) -> Self {
        self.context = context;
        self
    }

    /// `{ globals, msg }`, the root that property paths resolve against.
    pub fn scope(&self) -> serde_json::Value {
        serde_json::json!({
            "globals": self.globals.as_ref(),
            "msg": &self.msg,
        })
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Lifecycle state of one node within a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Done,
    Error {
        #[serde(rename = "inputMsg")]
        input_msg: Message,
        error: String,
    },
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Error { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Running => "running",
            NodeStatus::Done => "done",
            NodeStatus::Error { .. } => "error",
        }
    }
}

/// Latest recorded state and output of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(flatten)]
    pub status: NodeStatus,
    pub output: Option<Message>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn new(status: NodeStatus, output: Option<Message>) -> Self {
        Self {
            status,
            output,
            updated_at: Utc::now(),
        }
    }
}
