use relaycore::{
    CanvasNode, FlowDefinition, FlowStatus, RunStatus, StepStatus, TriggerType,
};
use relaynodes::{standard_registry, Ports};
use relayruntime::{
    BranchMode, FlowRuntime, InMemoryRecordStore, RecordingMessenger, RuntimeConfig, TokioClock,
};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    runtime: FlowRuntime,
    store: Arc<InMemoryRecordStore>,
    messenger: Arc<RecordingMessenger>,
}

fn harness(config: RuntimeConfig) -> Harness {
    let store = Arc::new(InMemoryRecordStore::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let ports = Ports {
        store: store.clone(),
        messaging: messenger.clone(),
        ..Ports::in_memory()
    };
    let registry = Arc::new(standard_registry(&ports));
    let runtime = FlowRuntime::with_clock(
        registry,
        store.clone(),
        config,
        Arc::new(TokioClock::new()),
    );
    Harness {
        runtime,
        store,
        messenger,
    }
}

/// trigger -> find customers by name -> any found? -(true)-> greet on WhatsApp
fn greeting_flow() -> FlowDefinition {
    let mut flow = FlowDefinition::new("greet returning customers").with_status(FlowStatus::Active);
    flow.add_node(CanvasNode::new("A", "trigger.manual"));
    flow.add_node(
        CanvasNode::new("B", "pb.find")
            .with_config("collection", "customers")
            .with_config("filter", "name = \"{{input.name}}\""),
    );
    flow.add_node(CanvasNode::new("C", "logic.if").with_config("condition", "input.count > 0"));
    flow.add_node(
        CanvasNode::new("D", "whatsapp.send")
            .with_config("to", "5511999999999")
            .with_config("template", "Welcome back!"),
    );
    flow.connect("A", "B");
    flow.connect("B", "C");
    flow.connect_branch("C", "true", "D");
    flow
}

#[tokio::test]
async fn test_every_successor_runs_by_default() {
    let h = harness(RuntimeConfig::default());
    let flow = greeting_flow();

    let report = h
        .runtime
        .run_flow(&flow, TriggerType::Manual, json!({"name": "Ada"}), false)
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Success);
    assert_eq!(report.executed, vec!["A", "B", "C", "D"]);
    assert_eq!(report.outputs["C"]["branch"], "false");

    let steps = h.runtime.list_run_steps(&report.run.id).await.unwrap();
    let order: Vec<_> = steps.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C", "D"]);
    assert!(steps.iter().all(|s| s.status == StepStatus::Success));

    // A's output is B's input
    assert_eq!(steps[0].output, Some(json!({"name": "Ada"})));
    assert_eq!(steps[1].input, Some(json!({"name": "Ada"})));
    assert_eq!(steps[1].output, Some(json!({"records": [], "count": 0})));

    assert_eq!(h.messenger.sent().await.len(), 1);
}

#[tokio::test]
async fn test_matching_handles_prune_the_untaken_branch() {
    let h = harness(RuntimeConfig::default().with_branch_mode(BranchMode::MatchHandle));
    let flow = greeting_flow();

    let report = h
        .runtime
        .run_flow(&flow, TriggerType::Manual, json!({"name": "Ada"}), false)
        .await
        .unwrap();
    assert_eq!(report.executed, vec!["A", "B", "C"]);
    assert!(h.messenger.sent().await.is_empty());

    h.store
        .seed("customers", vec![json!({"name": "Ada", "phone": "5511"})])
        .await;
    let report = h
        .runtime
        .run_flow(&flow, TriggerType::Manual, json!({"name": "Ada"}), false)
        .await
        .unwrap();
    assert_eq!(report.executed, vec!["A", "B", "C", "D"]);
    assert_eq!(h.messenger.sent().await.len(), 1);
}

#[tokio::test]
async fn test_failed_node_leaves_no_downstream_steps() {
    let h = harness(RuntimeConfig::default());
    let mut flow = FlowDefinition::new("broken");
    flow.add_node(CanvasNode::new("t", "trigger.webhook"));
    flow.add_node(CanvasNode::new("send", "whatsapp.send").with_config("toPath", "contact.phone"));
    flow.add_node(CanvasNode::new("log", "pb.create").with_config("collection", "log"));
    flow.connect("t", "send");
    flow.connect("send", "log");

    let report = h
        .runtime
        .run_flow(&flow, TriggerType::Webhook, json!({"contact": {}}), true)
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    let error = report.run.error.clone().unwrap();
    assert!(error.starts_with("Recipient not found"), "{}", error);

    let steps = h.runtime.list_run_steps(&report.run.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1].status, StepStatus::Failed);
    assert_eq!(steps[1].error.as_deref(), Some(error.as_str()));
    assert!(h.store.records("log").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delay_holds_the_run() {
    let h = harness(RuntimeConfig::default());
    let mut flow = FlowDefinition::new("wait then reshape");
    flow.add_node(CanvasNode::new("t", "trigger.manual"));
    flow.add_node(
        CanvasNode::new("wait", "util.delay")
            .with_config("amount", 2)
            .with_config("unit", "seconds"),
    );
    flow.add_node(
        CanvasNode::new("shape", "map.transform")
            .with_config("template", json!({"greeting": "hi {{input.name}}"})),
    );
    flow.connect("t", "wait");
    flow.connect("wait", "shape");

    let report = h
        .runtime
        .run_flow(&flow, TriggerType::Manual, json!({"name": "Ada"}), false)
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(report.data, json!({"greeting": "hi Ada"}));

    let steps = h.runtime.list_run_steps(&report.run.id).await.unwrap();
    let wait = &steps[1];
    let shape = &steps[2];
    let waited = wait.finished_at.unwrap() - wait.started_at;
    assert!(waited >= chrono::Duration::seconds(2), "waited {}", waited);
    assert!(shape.started_at >= wait.finished_at.unwrap());
    assert!(steps[0].finished_at.unwrap() <= wait.started_at);
}

#[tokio::test]
async fn test_record_nodes_chain_through_templates() {
    let h = harness(RuntimeConfig::default());
    h.store
        .seed("customers", vec![json!({"id": "c1", "name": "Ada", "visits": 1})])
        .await;

    let mut flow = FlowDefinition::new("count visit");
    flow.add_node(CanvasNode::new("t", "trigger.manual"));
    flow.add_node(
        CanvasNode::new("get", "pb.getOne")
            .with_config("collection", "customers")
            .with_config("recordId", "{{input.customerId}}"),
    );
    flow.add_node(
        CanvasNode::new("bump", "pb.update")
            .with_config("collection", "customers")
            .with_config("id", "{{input.record.id}}")
            .with_config("data", "{\"lastVisitor\": \"{{input.record.name}}\"}"),
    );
    flow.connect("t", "get");
    flow.connect("get", "bump");

    let report = h
        .runtime
        .run_flow(&flow, TriggerType::Manual, json!({"customerId": "c1"}), false)
        .await
        .unwrap();
    assert!(report.succeeded(), "{:?}", report.run.error);
    assert_eq!(report.data["record"]["lastVisitor"], "Ada");
    assert_eq!(h.store.records("customers").await[0]["visits"], 1);
}
