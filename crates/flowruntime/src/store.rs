use flowcore::{Message, NodeId, NodeRecord, NodeStatus};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One mutation applied to the store
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StateChange {
    /// Every entry was dropped; a fresh run is starting.
    Reset,
    /// Insert-or-replace of one node's entry
    Node { node_id: NodeId, record: NodeRecord },
}

/// Latest lifecycle state and output of every node that has started in
/// the current run.
///
/// Cloning yields another handle onto the same store. Each write replaces
/// the node's entry unconditionally; when two branches run the same node
/// concurrently the last write wins.
#[derive(Clone)]
pub struct RunStateStore {
    records: Arc<RwLock<HashMap<NodeId, NodeRecord>>>,
    changes: broadcast::Sender<StateChange>,
}

impl RunStateStore {
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Receive every subsequent change. Slow receivers may lag and miss
    /// entries; the store itself stays authoritative.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Mark a node as running. Its previous output stays visible until it
    /// settles.
    pub fn set_running(&self, node_id: &str) {
        let output = self.output(node_id);
        self.put(node_id, NodeRecord::new(NodeStatus::Running, output));
    }

    pub fn set_done(&self, node_id: &str, output: Message) {
        self.put(node_id, NodeRecord::new(NodeStatus::Done, Some(output)));
    }

    pub fn set_error(&self, node_id: &str, input_msg: Message, output: Message, error: impl Into<String>) {
        let status = NodeStatus::Error {
            input_msg,
            error: error.into(),
        };
        self.put(node_id, NodeRecord::new(status, Some(output)));
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.records.read().get(node_id).cloned()
    }

    /// Current state; `Idle` for a node that has not been reached.
    pub fn status(&self, node_id: &str) -> NodeStatus {
        self.records
            .read()
            .get(node_id)
            .map(|r| r.status.clone())
            .unwrap_or_default()
    }

    pub fn output(&self, node_id: &str) -> Option<Message> {
        self.records.read().get(node_id).and_then(|r| r.output.clone())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.records.read().contains_key(node_id)
    }

    /// All entries, sorted by node id
    pub fn snapshot(&self) -> Vec<(NodeId, NodeRecord)> {
        let mut entries: Vec<(NodeId, NodeRecord)> = self
            .records
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
        tracing::trace!("Run state cleared");
        let _ = self.changes.send(StateChange::Reset);
    }

    fn put(&self, node_id: &str, record: NodeRecord) {
        tracing::trace!(node_id, status = record.status.label(), "Recording node state");
        self.records.write().insert(node_id.to_string(), record.clone());
        let _ = self.changes.send(StateChange::Node {
            node_id: node_id.to_string(),
            record,
        });
    }
}

impl Default for RunStateStore {
    fn default() -> Self {
        Self::new(1024)
    }
}
