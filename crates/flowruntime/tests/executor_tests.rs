// crates/flowruntime/tests/executor_tests.rs

use async_trait::async_trait;
use flowcore::{
    EventBus, Flow, FlowError, Handler, HandlerContext, Message, NodeError, NodeSpec, NodeStatus,
    RunInputs, WorkflowError, ERROR_KEY,
};
use flowruntime::{
    FlowExecutor, FlowRuntime, HandlerRegistry, NodeOutcome, RunStateStore, RuntimeConfig,
    SkipReason, StateChange,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Appends its node id to `msg.path`
struct Trace;

#[async_trait]
impl Handler for Trace {
    fn node_type(&self) -> &str {
        "trace"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        let mut msg = ctx.msg;
        let mut path = msg
            .get("path")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        path.push(json!(ctx.node_id));
        msg.insert("path", path);
        if let Some(value) = ctx.inputs.get("value") {
            msg.insert("value", value.clone());
        }
        if let Some(trace_id) = ctx.context.get("traceId") {
            msg.insert("traceId", trace_id.clone());
        }
        if let Some(greeting) = ctx.globals.get("greeting") {
            msg.insert("greeting", greeting.clone());
        }
        Ok(msg)
    }
}

/// Reports failure through the error-signal key
struct Signal;

#[async_trait]
impl Handler for Signal {
    fn node_type(&self) -> &str {
        "signal"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        Ok(ctx.msg.with_error("signalled failure"))
    }
}

/// Fails outright
struct Boom;

#[async_trait]
impl Handler for Boom {
    fn node_type(&self) -> &str {
        "boom"
    }

    async fn call(&self, _ctx: HandlerContext) -> Result<Message, NodeError> {
        Err(NodeError::ExecutionFailed("exploded".to_string()))
    }
}

/// Mutates its message heavily, yielding in between
struct Mutate;

#[async_trait]
impl Handler for Mutate {
    fn node_type(&self) -> &str {
        "mutate"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        let mut msg = ctx.msg;
        msg.insert("touched", json!(ctx.node_id));
        tokio::task::yield_now().await;
        msg.remove("path");
        Ok(msg)
    }
}

/// Sleeps before passing the message on
struct Slow;

#[async_trait]
impl Handler for Slow {
    fn node_type(&self) -> &str {
        "slow"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(ctx.msg.with("slow", true))
    }
}

/// Panics part way through its call
struct Panicky;

#[async_trait]
impl Handler for Panicky {
    fn node_type(&self) -> &str {
        "panicky"
    }

    async fn call(&self, _ctx: HandlerContext) -> Result<Message, NodeError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        panic!("handler blew up");
    }
}

/// Pass-through for checkpoint nodes
struct Runner;

#[async_trait]
impl Handler for Runner {
    fn node_type(&self) -> &str {
        "runner"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        Ok(ctx.msg)
    }
}

/// Captures the store's view of its own node while running
struct Watcher {
    store: RunStateStore,
    seen: parking_lot::Mutex<Vec<NodeStatus>>,
}

#[async_trait]
impl Handler for Watcher {
    fn node_type(&self) -> &str {
        "watcher"
    }

    async fn call(&self, ctx: HandlerContext) -> Result<Message, NodeError> {
        self.seen.lock().push(self.store.status(&ctx.node_id));
        Ok(ctx.msg)
    }
}

fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(Trace));
    registry.register(Arc::new(Signal));
    registry.register(Arc::new(Boom));
    registry.register(Arc::new(Mutate));
    registry.register(Arc::new(Slow));
    registry.register(Arc::new(Runner));
    registry
}

fn runtime() -> FlowRuntime {
    FlowRuntime::with_registry(Arc::new(registry()), RuntimeConfig::default())
}

fn flow(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Flow {
    let mut flow = Flow::new("test");
    for (id, node_type) in nodes {
        flow.add_node(NodeSpec::new(*id, *node_type));
    }
    for (source, target) in edges {
        flow.connect(*source, *target);
    }
    flow
}

fn path_of(msg: &Message) -> Vec<String> {
    msg.get("path")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_linear_chain_runs_in_order() {
    let runtime = runtime();
    let flow = flow(&[("a", "trace"), ("b", "trace"), ("c", "trace")], &[("a", "b"), ("b", "c")]);

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(report.executed().len(), 3);
    let out = runtime.store().output("c").unwrap();
    assert_eq!(path_of(&out), vec!["a", "b", "c"]);
    for id in ["a", "b", "c"] {
        assert_eq!(runtime.store().status(id), NodeStatus::Done);
    }
}

#[tokio::test]
async fn test_signalled_error_stops_branch() {
    let runtime = runtime();
    let flow = flow(&[("a", "trace"), ("b", "signal"), ("c", "trace")], &[("a", "b"), ("b", "c")]);

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(runtime.store().status("a"), NodeStatus::Done);
    match runtime.store().status("b") {
        NodeStatus::Error { input_msg, error } => {
            assert_eq!(error, "signalled failure");
            assert_eq!(path_of(&input_msg), vec!["a"]);
        }
        other => panic!("expected error state, got {:?}", other),
    }
    assert!(runtime.store().get("c").is_none());
    assert_eq!(report.failed(), vec!["b".to_string()]);
    assert_eq!(report.outcomes.len(), 2);
}

#[tokio::test]
async fn test_handler_err_converges_on_error_state() {
    let runtime = runtime();
    let flow = flow(&[("a", "trace"), ("b", "boom"), ("c", "trace")], &[("a", "b"), ("b", "c")]);

    runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    let record = runtime.store().get("b").unwrap();
    match &record.status {
        NodeStatus::Error { input_msg, error } => {
            assert_eq!(error, "Execution failed: exploded");
            assert!(!input_msg.has_error());
        }
        other => panic!("expected error state, got {:?}", other),
    }
    let output = record.output.unwrap();
    assert_eq!(output.error().as_deref(), Some("Execution failed: exploded"));
    assert_eq!(path_of(&output), vec!["a"]);
    assert!(!runtime.store().contains("c"));
}

#[tokio::test]
async fn test_unknown_root_type_records_nothing() {
    let runtime = runtime();
    let flow = flow(&[("x", "no-such-type"), ("y", "trace")], &[("x", "y")]);

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert!(runtime.store().is_empty());
    assert_eq!(
        report.outcomes,
        vec![(
            "x".to_string(),
            NodeOutcome::Skipped(SkipReason::UnknownNodeType("no-such-type".to_string()))
        )]
    );
}

#[tokio::test]
async fn test_unknown_type_only_skips_its_own_subtree() {
    let runtime = runtime();
    let flow = flow(
        &[("a", "trace"), ("u", "mystery"), ("u2", "trace"), ("b", "trace"), ("r2", "trace")],
        &[("a", "u"), ("u", "u2"), ("a", "b")],
    );

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    let executed: BTreeSet<_> = report.executed().into_iter().collect();
    assert_eq!(executed, BTreeSet::from(["a".into(), "b".into(), "r2".into()]));
    assert_eq!(report.skipped(), vec!["u".to_string()]);
    assert!(!runtime.store().contains("u2"));
}

#[tokio::test]
async fn test_checkpoint_pauses_then_resumes() {
    let runtime = runtime();
    let flow = flow(
        &[("a", "trace"), ("r", "runner"), ("d", "trace")],
        &[("a", "r"), ("r", "d")],
    );

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(report.paused(), vec!["r".to_string()]);
    assert!(!runtime.store().contains("r"));
    assert!(!runtime.store().contains("d"));

    let resume_msg = Message::new().with("payload", "resumed");
    let resumed = runtime
        .execute_branch(&flow, &RunInputs::new(), Message::new(), Message::new(), resume_msg, "r")
        .await
        .unwrap();

    assert_eq!(resumed.executed(), vec!["r".to_string(), "d".to_string()]);
    assert_eq!(runtime.store().status("r"), NodeStatus::Done);
    let out = runtime.store().output("d").unwrap();
    assert_eq!(out.get_str("payload"), Some("resumed"));
    assert_eq!(path_of(&out), vec!["d"]);
    // history from before the pause is still there
    assert_eq!(runtime.store().status("a"), NodeStatus::Done);
}

#[tokio::test]
async fn test_resume_matches_direct_run() {
    let m = Message::new().with("payload", "m").with("path", json!(["seed"]));

    let paused = flow(
        &[("a", "trace"), ("r", "runner"), ("x", "trace"), ("y", "signal"), ("z", "trace")],
        &[("a", "r"), ("r", "x"), ("r", "y"), ("y", "z")],
    );
    let resumed_runtime = runtime();
    resumed_runtime
        .execute_flow(&paused, &RunInputs::new(), Message::new(), Message::new())
        .await;
    resumed_runtime
        .execute_branch(&paused, &RunInputs::new(), Message::new(), Message::new(), m.clone(), "r")
        .await
        .unwrap();

    let direct_runtime = runtime();
    direct_runtime
        .execute_branch(&paused, &RunInputs::new(), Message::new(), Message::new(), m, "r")
        .await
        .unwrap();

    for id in ["r", "x", "y", "z"] {
        assert_eq!(
            resumed_runtime.store().status(id),
            direct_runtime.store().status(id),
            "state of {}",
            id
        );
        assert_eq!(
            resumed_runtime.store().output(id),
            direct_runtime.store().output(id),
            "output of {}",
            id
        );
    }
    assert!(!direct_runtime.store().contains("a"));
}

#[tokio::test]
async fn test_checkpoint_as_root_executes() {
    let runtime = runtime();
    let flow = flow(&[("r", "runner"), ("d", "trace")], &[("r", "d")]);

    runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(runtime.store().status("r"), NodeStatus::Done);
    assert_eq!(runtime.store().status("d"), NodeStatus::Done);
}

#[tokio::test]
async fn test_resume_unknown_node_is_an_error() {
    let runtime = runtime();
    let flow = flow(&[("a", "trace")], &[]);

    let err = runtime
        .execute_branch(&flow, &RunInputs::new(), Message::new(), Message::new(), Message::new(), "ghost")
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Workflow(WorkflowError::NodeNotFound(ref id)) if id == "ghost"));
}

#[tokio::test]
async fn test_siblings_do_not_share_messages() {
    let runtime = runtime();
    let flow = flow(
        &[("a", "trace"), ("m", "mutate"), ("t", "trace")],
        &[("a", "m"), ("a", "t")],
    );

    runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    let mutated = runtime.store().output("m").unwrap();
    assert_eq!(mutated.get_str("touched"), Some("m"));
    assert!(mutated.get("path").is_none());

    let untouched = runtime.store().output("t").unwrap();
    assert!(untouched.get("touched").is_none());
    assert_eq!(path_of(&untouched), vec!["a", "t"]);

    let parent = runtime.store().output("a").unwrap();
    assert_eq!(path_of(&parent), vec!["a"]);
}

#[tokio::test]
async fn test_sibling_failure_does_not_cancel_others() {
    let runtime = runtime();
    let flow = flow(
        &[("a", "trace"), ("f", "boom"), ("s", "slow"), ("s2", "trace")],
        &[("a", "f"), ("a", "s"), ("s", "s2")],
    );

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert!(matches!(runtime.store().status("f"), NodeStatus::Error { .. }));
    assert_eq!(runtime.store().status("s"), NodeStatus::Done);
    assert_eq!(runtime.store().status("s2"), NodeStatus::Done);
    assert_eq!(report.summary().failed, 1);
    assert_eq!(report.summary().done, 3);
}

#[tokio::test]
async fn test_handler_panic_is_contained_to_its_branch() {
    let mut registry = registry();
    registry.register(Arc::new(Panicky));
    let runtime = FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default());
    let flow = flow(
        &[("p", "panicky"), ("after", "trace"), ("s", "slow"), ("s2", "trace")],
        &[("p", "after"), ("s", "s2")],
    );

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    match runtime.store().status("p") {
        NodeStatus::Error { error, .. } => {
            assert_eq!(error, "Execution failed: handler panicked: handler blew up");
        }
        other => panic!("p should be in error, got {:?}", other),
    }
    assert_eq!(
        runtime.store().output("p").unwrap().error().as_deref(),
        Some("Execution failed: handler panicked: handler blew up")
    );
    assert_eq!(runtime.store().status("after"), NodeStatus::Idle);
    assert_eq!(runtime.store().status("s"), NodeStatus::Done);
    assert_eq!(runtime.store().status("s2"), NodeStatus::Done);
    assert_eq!(report.failed(), vec!["p".to_string()]);
    assert_eq!(report.summary().done, 2);
}

#[tokio::test]
async fn test_diamond_reexecutes_per_path() {
    let runtime = runtime();
    let flow = flow(
        &[("a", "trace"), ("b", "trace"), ("c", "trace"), ("d", "trace")],
        &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
    );

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    let d_visits = report.outcomes.iter().filter(|(id, _)| id == "d").count();
    assert_eq!(d_visits, 2);
    let last = path_of(&runtime.store().output("d").unwrap());
    assert!(last == vec!["a", "b", "d"] || last == vec!["a", "c", "d"]);
}

#[tokio::test]
async fn test_cycle_without_roots_does_nothing() {
    let runtime = runtime();
    let flow = flow(&[("a", "trace"), ("b", "trace")], &[("a", "b"), ("b", "a")]);

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert!(report.outcomes.is_empty());
    assert!(runtime.store().is_empty());
}

#[tokio::test]
async fn test_dangling_edges_are_skipped() {
    let runtime = runtime();
    let mut flow = flow(&[("a", "trace"), ("b", "trace"), ("c", "trace")], &[("a", "b")]);
    flow.connect("a", "missing");
    flow.connect("ghost", "c");

    runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(runtime.store().status("b"), NodeStatus::Done);
    // an edge from an unknown source still makes "c" a non-root
    assert!(!runtime.store().contains("c"));
}

#[tokio::test]
async fn test_inputs_globals_and_context_reach_handlers() {
    let runtime = runtime();
    let flow = flow(&[("a", "trace"), ("b", "trace")], &[("a", "b")]);
    let inputs = RunInputs::new().with("b", Message::new().with("value", 42));
    let globals = Message::new().with("greeting", "hi");
    let context = Message::new().with("traceId", "t-1");

    runtime.execute_flow(&flow, &inputs, globals, context).await;

    let a = runtime.store().output("a").unwrap();
    assert!(a.get("value").is_none());
    assert_eq!(a.get_str("greeting"), Some("hi"));
    let b = runtime.store().output("b").unwrap();
    assert_eq!(b.get("value"), Some(&json!(42)));
    assert_eq!(b.get_str("traceId"), Some("t-1"));
}

#[tokio::test]
async fn test_done_outputs_never_carry_error_key() {
    let runtime = runtime();
    let flow = flow(
        &[("a", "trace"), ("b", "signal"), ("c", "boom"), ("d", "slow"), ("e", "mutate")],
        &[("a", "b"), ("a", "c"), ("a", "d"), ("d", "e")],
    );

    runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    for (_, record) in runtime.store().snapshot() {
        if record.status == NodeStatus::Done {
            assert!(!record.output.unwrap().contains_key(ERROR_KEY));
        }
    }
}

#[tokio::test]
async fn test_fresh_run_clears_previous_state() {
    let runtime = runtime();
    let first = flow(&[("old", "trace")], &[]);
    let second = flow(&[("new", "trace")], &[]);

    runtime
        .execute_flow(&first, &RunInputs::new(), Message::new(), Message::new())
        .await;
    runtime
        .execute_flow(&second, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert!(!runtime.store().contains("old"));
    assert!(runtime.store().contains("new"));
}

#[tokio::test]
async fn test_running_is_recorded_before_handler() {
    let store = RunStateStore::new(16);
    let watcher = Arc::new(Watcher {
        store: store.clone(),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    let mut registry = HandlerRegistry::new();
    registry.register(watcher.clone());
    let executor = FlowExecutor::new(Arc::new(registry), store.clone(), Arc::new(EventBus::new(16)));
    let flow = flow(&[("p", "watcher")], &[]);

    executor
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(*watcher.seen.lock(), vec![NodeStatus::Running]);
    assert_eq!(store.status("p"), NodeStatus::Done);
}

#[tokio::test]
async fn test_state_changes_are_broadcast() {
    let runtime = runtime();
    let mut changes = runtime.subscribe_state();
    let flow = flow(&[("a", "trace")], &[]);

    runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert!(matches!(changes.recv().await.unwrap(), StateChange::Reset));
    match changes.recv().await.unwrap() {
        StateChange::Node { node_id, record } => {
            assert_eq!(node_id, "a");
            assert_eq!(record.status, NodeStatus::Running);
        }
        other => panic!("expected a node change, got {:?}", other),
    }
    match changes.recv().await.unwrap() {
        StateChange::Node { record, .. } => assert_eq!(record.status, NodeStatus::Done),
        other => panic!("expected a node change, got {:?}", other),
    }
}

#[tokio::test]
async fn test_branch_resume_does_not_announce_reset() {
    let runtime = runtime();
    let flow = flow(&[("a", "trace"), ("r", "runner"), ("b", "trace")], &[("a", "r"), ("r", "b")]);
    runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;
    let mut changes = runtime.subscribe_state();

    runtime
        .execute_branch(&flow, &RunInputs::new(), Message::new(), Message::new(), Message::new(), "r")
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push(change);
    }
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|c| matches!(c, StateChange::Node { .. })));
    assert_eq!(runtime.store().status("a"), NodeStatus::Done);
}

#[tokio::test]
async fn test_zero_buffer_sizes_are_clamped() {
    let config = RuntimeConfig {
        event_buffer_size: 0,
        state_buffer_size: 0,
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::with_registry(Arc::new(registry()), config);
    let _events = runtime.subscribe_events();
    let flow = flow(&[("a", "trace"), ("b", "trace")], &[("a", "b")]);

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(report.executed(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(runtime.store().status("b"), NodeStatus::Done);
}

#[tokio::test]
async fn test_custom_checkpoint_types() {
    let config = RuntimeConfig {
        checkpoint_types: vec!["slow".to_string()],
        ..RuntimeConfig::default()
    };
    let runtime = FlowRuntime::with_registry(Arc::new(registry()), config);
    let flow = flow(&[("a", "trace"), ("s", "slow"), ("r", "runner")], &[("a", "s"), ("a", "r")]);

    let report = runtime
        .execute_flow(&flow, &RunInputs::new(), Message::new(), Message::new())
        .await;

    assert_eq!(report.paused(), vec!["s".to_string()]);
    assert_eq!(runtime.store().status("r"), NodeStatus::Done);
}
