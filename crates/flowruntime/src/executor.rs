use crate::graph::{self, Adjacency};
use crate::registry::HandlerRegistry;
use crate::store::RunStateStore;
use chrono::Utc;
use flowcore::{
    EventBus, Flow, FlowError, HandlerContext, Message, NodeError, NodeId, NodeSpec, RunEvent,
    RunId, RunInputs, RunKind, RunSummary, WorkflowError,
};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Type tag of the built-in checkpoint node
pub const RUNNER_NODE_TYPE: &str = "runner";

/// Why a node was not executed
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    UnknownNodeType(String),
    MissingNode(NodeId),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnknownNodeType(t) => write!(f, "no handler for node type '{}'", t),
            SkipReason::MissingNode(id) => write!(f, "node '{}' not in flow", id),
        }
    }
}

/// What happened to one node visit
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Done,
    Failed(String),
    Skipped(SkipReason),
    /// Checkpoint reached; waits for `execute_branch`.
    Paused,
}

/// Result of a run or resumption.
///
/// Node failures never turn into an `Err`; they show up here and in the
/// run state store.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    /// One entry per visit, in settle order. A node reached through two
    /// parents appears twice.
    pub outcomes: Vec<(NodeId, NodeOutcome)>,
    pub duration_ms: u64,
}

impl RunReport {
    fn ids_where(&self, pred: impl Fn(&NodeOutcome) -> bool) -> Vec<NodeId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn executed(&self) -> Vec<NodeId> {
        self.ids_where(|o| matches!(o, NodeOutcome::Done | NodeOutcome::Failed(_)))
    }

    pub fn failed(&self) -> Vec<NodeId> {
        self.ids_where(|o| matches!(o, NodeOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<NodeId> {
        self.ids_where(|o| matches!(o, NodeOutcome::Skipped(_)))
    }

    pub fn paused(&self) -> Vec<NodeId> {
        self.ids_where(|o| matches!(o, NodeOutcome::Paused))
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for (_, outcome) in &self.outcomes {
            match outcome {
                NodeOutcome::Done => summary.done += 1,
                NodeOutcome::Failed(_) => summary.failed += 1,
                NodeOutcome::Skipped(_) => summary.skipped += 1,
                NodeOutcome::Paused => summary.paused += 1,
            }
        }
        summary
    }
}

/// Everything one traversal shares across its branches
struct RunScope<'f> {
    run_id: RunId,
    nodes: HashMap<&'f str, &'f NodeSpec>,
    adjacency: Adjacency,
    inputs: &'f RunInputs,
    globals: Arc<Message>,
    context: Arc<Message>,
    outcomes: Mutex<Vec<(NodeId, NodeOutcome)>>,
}

impl<'f> RunScope<'f> {
    fn new(
        flow: &'f Flow,
        inputs: &'f RunInputs,
        globals: Message,
        context: Message,
    ) -> Self {
        Self {
            run_id: RunId::new_v4(),
            nodes: flow.nodes.iter().map(|n| (n.id.as_str(), n)).collect(),
            adjacency: Adjacency::build(flow),
            inputs,
            globals: Arc::new(globals),
            context: Arc::new(context),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, node_id: &str, outcome: NodeOutcome) {
        self.outcomes.lock().push((node_id.to_string(), outcome));
    }

    fn into_report(self, started: Instant) -> RunReport {
        RunReport {
            run_id: self.run_id,
            outcomes: self.outcomes.into_inner(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Drives branch traversal over a flow graph
pub struct FlowExecutor {
    registry: Arc<HandlerRegistry>,
    store: RunStateStore,
    event_bus: Arc<EventBus>,
    checkpoint_types: HashSet<String>,
}

impl FlowExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, store: RunStateStore, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            store,
            event_bus,
            checkpoint_types: HashSet::from([RUNNER_NODE_TYPE.to_string()]),
        }
    }

    /// Replace the set of type tags that pause traversal
    pub fn with_checkpoint_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checkpoint_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn store(&self) -> &RunStateStore {
        &self.store
    }

    pub fn is_checkpoint(&self, node_type: &str) -> bool {
        self.checkpoint_types.contains(node_type)
    }

    /// Start a fresh run from every root with an empty message.
    ///
    /// Returns once every reachable node has settled.
    pub async fn execute_flow(
        &self,
        flow: &Flow,
        inputs: &RunInputs,
        globals: Message,
        context: Message,
    ) -> RunReport {
        let started = Instant::now();
        self.store.clear();

        let scope = RunScope::new(flow, inputs, globals, context);
        let roots = graph::roots(flow);
        self.emit_started(&scope, RunKind::Flow);
        tracing::info!(run_id = %scope.run_id, flow = %flow.name, roots = roots.len(), "Starting flow run");
        if roots.is_empty() && !flow.nodes.is_empty() {
            tracing::warn!(run_id = %scope.run_id, "Flow has no root nodes, nothing to run");
        }

        let branches = roots
            .iter()
            .map(|root| self.traverse(&scope, root.as_str(), Message::new()));
        join_all(branches).await;

        self.finish(scope, started)
    }

    /// Resume (or start) traversal at `node_id` with `msg`.
    ///
    /// State recorded by earlier runs stays in the store.
    pub async fn execute_branch(
        &self,
        flow: &Flow,
        inputs: &RunInputs,
        globals: Message,
        context: Message,
        msg: Message,
        node_id: &str,
    ) -> Result<RunReport, FlowError> {
        if flow.find_node(node_id).is_none() {
            return Err(WorkflowError::NodeNotFound(node_id.to_string()).into());
        }
        let started = Instant::now();

        let scope = RunScope::new(flow, inputs, globals, context);
        self.emit_started(
            &scope,
            RunKind::Branch {
                node_id: node_id.to_string(),
            },
        );
        tracing::info!(run_id = %scope.run_id, node_id, "Resuming branch");

        self.traverse(&scope, node_id, msg).await;

        Ok(self.finish(scope, started))
    }

    fn traverse<'s>(
        &'s self,
        scope: &'s RunScope<'_>,
        node_id: &'s str,
        msg: Message,
    ) -> BoxFuture<'s, ()> {
        Box::pin(async move {
            let Some(node) = scope.nodes.get(node_id).copied() else {
                self.skip(scope, node_id, SkipReason::MissingNode(node_id.to_string()));
                return;
            };
            let handler = match self.registry.resolve(&node.node_type) {
                Ok(handler) => handler,
                Err(_) => {
                    self.skip(scope, node_id, SkipReason::UnknownNodeType(node.node_type.clone()));
                    return;
                }
            };

            self.store.set_running(node_id);
            self.event_bus.emit(RunEvent::NodeStarted {
                run_id: scope.run_id,
                node_id: node_id.to_string(),
                node_type: node.node_type.clone(),
                timestamp: Utc::now(),
            });
            tracing::debug!(run_id = %scope.run_id, node_id, node_type = %node.node_type, "Executing node");

            let ctx = HandlerContext {
                node_id: node_id.to_string(),
                globals: scope.globals.clone(),
                inputs: scope.inputs.for_node(node_id),
                msg: msg.clone(),
                context: scope.context.clone(),
                events: self.event_bus.create_emitter(scope.run_id, node_id.to_string()),
            };
            let start = Instant::now();
            let result = match AssertUnwindSafe(handler.call(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(NodeError::ExecutionFailed(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let output = match settle(result, &msg) {
                Ok(output) => output,
                Err((output, error)) => {
                    tracing::warn!(run_id = %scope.run_id, node_id, error = %error, "Node failed");
                    self.store.set_error(node_id, msg, output, error.clone());
                    self.event_bus.emit(RunEvent::NodeFailed {
                        run_id: scope.run_id,
                        node_id: node_id.to_string(),
                        error: error.clone(),
                        timestamp: Utc::now(),
                    });
                    scope.record(node_id, NodeOutcome::Failed(error));
                    return;
                }
            };

            tracing::info!(run_id = %scope.run_id, node_id, duration_ms, "Node completed");
            self.store.set_done(node_id, output.clone());
            self.event_bus.emit(RunEvent::NodeCompleted {
                run_id: scope.run_id,
                node_id: node_id.to_string(),
                duration_ms,
                timestamp: Utc::now(),
            });
            scope.record(node_id, NodeOutcome::Done);

            let mut branches = Vec::new();
            for child_id in scope.adjacency.children(node_id) {
                let is_checkpoint = scope
                    .nodes
                    .get(child_id.as_str())
                    .is_some_and(|child| self.is_checkpoint(&child.node_type));
                if is_checkpoint {
                    self.pause(scope, child_id);
                    continue;
                }
                // each child owns its own copy from here on
                branches.push(self.traverse(scope, child_id.as_str(), output.clone()));
            }
            join_all(branches).await;
        })
    }

    fn skip(&self, scope: &RunScope<'_>, node_id: &str, reason: SkipReason) {
        tracing::warn!(run_id = %scope.run_id, node_id, reason = %reason, "Skipping node");
        self.event_bus.emit(RunEvent::NodeSkipped {
            run_id: scope.run_id,
            node_id: node_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        scope.record(node_id, NodeOutcome::Skipped(reason));
    }

    fn pause(&self, scope: &RunScope<'_>, node_id: &str) {
        tracing::info!(run_id = %scope.run_id, node_id, "Reached checkpoint, waiting for resume");
        self.event_bus.emit(RunEvent::NodePaused {
            run_id: scope.run_id,
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        });
        scope.record(node_id, NodeOutcome::Paused);
    }

    fn emit_started(&self, scope: &RunScope<'_>, kind: RunKind) {
        self.event_bus.emit(RunEvent::RunStarted {
            run_id: scope.run_id,
            kind,
            timestamp: Utc::now(),
        });
    }

    fn finish(&self, scope: RunScope<'_>, started: Instant) -> RunReport {
        let report = scope.into_report(started);
        let summary = report.summary();
        tracing::info!(
            run_id = %report.run_id,
            done = summary.done,
            failed = summary.failed,
            skipped = summary.skipped,
            paused = summary.paused,
            duration_ms = report.duration_ms,
            "Run settled"
        );
        self.event_bus.emit(RunEvent::RunCompleted {
            run_id: report.run_id,
            summary,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        report
    }
}

/// Split a handler result into the message to forward, or the recorded
/// output plus error description.
fn settle(result: Result<Message, NodeError>, input: &Message) -> Result<Message, (Message, String)> {
    match result {
        Ok(output) => match output.error() {
            Some(error) => Err((output, error)),
            None => Ok(output),
        },
        Err(e) => {
            let error = e.to_string();
            Err((input.clone().with_error(error.clone()), error))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
