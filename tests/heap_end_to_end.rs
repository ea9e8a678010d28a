use std::sync::Arc;

use serde_json::json;

use conductor_agent::graph::{Edge, Graph, LlmParams, Node, NodeAgent};
use conductor_agent::heap::SpecialistInfo;
use conductor_agent::{
    AgentSpecialistRunner, HeapPlanner, HeapRunner, NodeAgentExecutor, SpecialistRegistry,
    TurnOrchestrator,
};
use conductor_core::config::AppConfig;
use conductor_core::event::EventBus;
use conductor_core::types::{AgentEvent, HeapStep};
use conductor_test_utils::{scripted, test_config, tool_call_tag, RecordingTools};

fn quiet_config() -> AppConfig {
    let mut config = test_config();
    config.turn.nudge_on_missing_tools = false;
    config.turn.max_follow_up_rounds = 1;
    config
}

fn registry() -> SpecialistRegistry {
    SpecialistRegistry::new()
        .with(
            SpecialistInfo::new("planner", "Breaks work into steps").with_keywords(&["plan"]),
            true,
        )
        .with(
            SpecialistInfo::new("builder", "Builds the change")
                .with_keywords(&["build"])
                .with_tools(vec!["delegate".into()]),
            true,
        )
        .with(SpecialistInfo::new("tester", "Runs the checks"), false)
}

#[tokio::test]
async fn turn_specialists_run_in_order_and_delegate() {
    let config = quiet_config();
    let llm = scripted([
        "Plan drafted.\nTwo components.\nExtra detail.".to_string(),
        format!(
            "Building now.\n{}",
            tool_call_tag("delegate", json!({"target": "tester"}))
        ),
        "Built it.".to_string(),
        "All tests pass.".to_string(),
    ]);
    let tools = Arc::new(RecordingTools::new().with_result(
        "delegate",
        json!({"delegateHeap": ["tester"], "delegateTask": "test the build"}),
    ));
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();

    let turns = Arc::new(
        TurnOrchestrator::new(&config, llm.clone(), tools.clone(), bus.clone()).unwrap(),
    );
    let registry = Arc::new(registry());
    let runner = AgentSpecialistRunner::new(registry.clone(), turns);

    let order: Vec<HeapStep> = vec!["planner".into(), "builder".into()];
    let outcome = HeapRunner::new(config.heap.clone())
        .with_event_bus(bus.clone())
        .run(&order, "ship the feature", &runner, &registry)
        .await
        .unwrap();

    assert_eq!(outcome.summary, "All tests pass.");
    assert_eq!(outcome.runs, 3);
    let ids: Vec<_> = outcome
        .context
        .entries()
        .map(|e| e.specialist_id.as_str())
        .collect();
    assert_eq!(ids, vec!["planner", "builder", "tester"]);
    assert_eq!(
        outcome.context.entries().next().unwrap().outcome,
        "Plan drafted.\nTwo components."
    );

    assert_eq!(llm.call_count(), 4);
    assert_eq!(llm.remaining(), 0);
    assert_eq!(tools.call_names(), vec!["delegate"]);

    // The delegated specialist gets the delegated task plus earlier outcomes.
    let requests = llm.requests();
    let tester_prompt = &requests[3].messages.last().unwrap().content;
    assert!(tester_prompt.contains("test the build"));
    assert!(tester_prompt.contains("## Previous specialist outcomes"));
    assert!(tester_prompt.contains("- builder: Built it."));

    let mut delegations = Vec::new();
    let mut levels = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            AgentEvent::DelegationStarted {
                specialist_id,
                depth,
            } => delegations.push((specialist_id, depth)),
            AgentEvent::HeapLevelStarted { .. } => levels += 1,
            _ => {}
        }
    }
    assert_eq!(delegations, vec![("builder".to_string(), 1)]);
    assert_eq!(levels, 3);
}

#[tokio::test]
async fn planner_falls_back_to_keywords_and_runs_heap() {
    let config = quiet_config();
    let llm = scripted([
        "I am not sure which specialists fit.",
        "Planned.",
        "Built.",
    ]);
    let tools = Arc::new(RecordingTools::new());
    let bus = Arc::new(EventBus::default());
    let registry = Arc::new(registry());

    let order = HeapPlanner::new(llm.clone(), config.model.clone())
        .plan("plan and build the release", &registry)
        .await
        .unwrap();
    assert_eq!(order, vec![HeapStep::from("planner"), HeapStep::from("builder")]);

    let turns =
        Arc::new(TurnOrchestrator::new(&config, llm.clone(), tools, bus.clone()).unwrap());
    let runner = AgentSpecialistRunner::new(registry.clone(), turns);
    let outcome = HeapRunner::new(config.heap.clone())
        .run(&order, "plan and build the release", &runner, &registry)
        .await
        .unwrap();

    assert_eq!(outcome.summary, "Built.");
    assert_eq!(outcome.runs, 2);
    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn graph_specialist_summarises_node_output() {
    let config = quiet_config();
    let llm = scripted(["Drafted the outline.\nSecond line.\nThird line."]);
    let tools = Arc::new(RecordingTools::new());
    let bus = Arc::new(EventBus::default());

    let agent = NodeAgent::new(
        "writer-graph",
        Graph::new(
            vec![
                Node::input("in"),
                Node::llm(
                    "draft",
                    LlmParams {
                        system_prompt: Some("You write outlines.".into()),
                        user_prompt: Some("{{ $input }}".into()),
                        ..Default::default()
                    },
                ),
                Node::output("out"),
            ],
            vec![Edge::new("in", "draft"), Edge::new("draft", "out")],
        ),
    );
    let registry = Arc::new(SpecialistRegistry::new().with(
        SpecialistInfo::new("writer", "Writes outlines").with_agent(agent),
        true,
    ));

    let turns = Arc::new(
        TurnOrchestrator::new(&config, llm.clone(), tools.clone(), bus.clone()).unwrap(),
    );
    let graphs = Arc::new(NodeAgentExecutor::new(llm.clone(), tools, config.clone()));
    let runner = AgentSpecialistRunner::new(registry.clone(), turns).with_graph_executor(graphs);

    let outcome = HeapRunner::new(config.heap.clone())
        .run(&[], "outline the guide", &runner, &registry)
        .await
        .unwrap();

    assert_eq!(outcome.summary, "Drafted the outline.\nSecond line.");
    assert_eq!(outcome.runs, 1);
    let requests = llm.requests();
    let prompt = &requests[0].messages.last().unwrap().content;
    assert!(prompt.contains("outline the guide"));
}
