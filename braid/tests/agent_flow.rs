//! End-to-end request scenarios through the full agent: caching on repeat,
//! semantic plan reuse, and request-level cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use braid::{
    Agent, AgentEvent, EnhancedAgent, EnhancedAgentConfig, MockEmbedder, MockModel, SessionContext,
    SessionEvent, Timing, ToolRegistry,
};

fn day_overview_registry() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry.register_fn("get_todays_events", |_| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(serde_json::json!([{"title": "standup", "at": "09:30"}]))
    });
    registry.register_fn("get_current_weather", |_| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(serde_json::json!({"temp_c": 18, "summary": "clear"}))
    });
    registry.register_fn("get_priority_items", |_| async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(serde_json::json!(["ship the report"]))
    });
    Arc::new(registry)
}

async fn collect(
    mut stream: tokio_stream::wrappers::ReceiverStream<SessionEvent>,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn final_timing(events: &[SessionEvent]) -> Timing {
    match &events.last().expect("no events").event {
        AgentEvent::Message { timing, .. } => timing.expect("message without timing"),
        other => panic!("expected final message, got {:?}", other),
    }
}

/// Scenario: two identical queries in a row. The second plans in
/// single-digit milliseconds (pattern / plan-cache fast path) and reports
/// at least one tool-cache hit.
#[tokio::test]
async fn repeat_query_hits_plan_and_tool_caches() {
    let llm = Arc::new(MockModel::with_response("Busy but pleasant."));
    let agent = EnhancedAgent::builder(llm, day_overview_registry()).build();
    let ctx = SessionContext::new().with_session_id("repeat");

    let first = collect(agent.stream_events("What's my day like?", &ctx)).await;
    assert_eq!(first.last().unwrap().event_type(), "message");
    let first_timing = final_timing(&first);

    let second = collect(agent.stream_events("What's my day like?", &ctx)).await;
    let second_timing = final_timing(&second);

    assert!(
        second_timing.plan_ms <= 5,
        "second plan took {}ms",
        second_timing.plan_ms
    );
    // Cached tools skip their 30 ms sleeps on the second run.
    assert!(
        second_timing.execution_ms < first_timing.execution_ms
            || second_timing.execution_ms <= 5,
        "second execution {}ms vs first {}ms",
        second_timing.execution_ms,
        first_timing.execution_ms
    );

    let stats = agent.stats();
    let tool_cache = stats.tool_cache.expect("tool cache enabled by default");
    assert!(tool_cache.hits >= 1, "no tool-cache hit reported");
}

/// Scenario: a novel query planned by the model is reused for a similar
/// query through the semantic layer; the model plans only once.
#[tokio::test]
async fn similar_query_reuses_the_plan_semantically() {
    let plan_json = r#"{"tools": ["get_priority_items"],
        "parallel_groups": [["get_priority_items"]],
        "reasoning": "priorities question",
        "expected_synthesis": "ordered list"}"#;
    let llm = Arc::new(MockModel::with_responses([
        plan_json,
        "Top priority: ship the report.",
        "Still the report.",
    ]));
    let embedder = MockEmbedder::new(4)
        .with_vector("zebra backlog ranking", vec![1.0, 0.0, 0.0, 0.0])
        .with_vector("ranking of the zebra backlog", vec![0.97, 0.24, 0.0, 0.0]);

    let agent = EnhancedAgent::builder(llm.clone(), day_overview_registry())
        .with_embedder(Arc::new(embedder))
        .build();
    let ctx = SessionContext::new().with_session_id("semantic");

    let first = collect(agent.stream_events("zebra backlog ranking", &ctx)).await;
    assert_eq!(first.last().unwrap().event_type(), "message");
    let planning_calls_after_first = llm.calls();

    // Let the background semantic store land.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = collect(agent.stream_events("ranking of the zebra backlog", &ctx)).await;
    assert_eq!(second.last().unwrap().event_type(), "message");

    let stats = agent.stats();
    assert_eq!(stats.planner.l3_plans, 1, "model should plan only once");
    assert_eq!(stats.planner.l2_hits, 1, "second query should hit L2");
    // Exactly one extra model call (the second synthesis).
    assert_eq!(llm.calls(), planning_calls_after_first + 1);
}

/// Scenario: caller-side cancellation aborts in-flight steps and closes
/// the stream without a final message.
#[tokio::test]
async fn cancellation_closes_the_stream_early() {
    let registry = ToolRegistry::new();
    registry.register_fn("get_todays_events", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(serde_json::json!([]))
    });
    registry.register_fn("get_current_weather", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(serde_json::json!({}))
    });
    registry.register_fn("get_priority_items", |_| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(serde_json::json!([]))
    });

    let llm = Arc::new(MockModel::with_response("unused"));
    let agent = EnhancedAgent::builder(llm, Arc::new(registry))
        .with_config(EnhancedAgentConfig {
            retry_delay: Duration::from_millis(10),
            ..EnhancedAgentConfig::default()
        })
        .build();
    let ctx = SessionContext::new().with_session_id("cancel");

    let cancel = CancellationToken::new();
    let stream =
        agent.stream_events_with_cancellation("What's my day like?", &ctx, cancel.clone());

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let events = collect(stream).await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation did not interrupt the run"
    );
    assert!(
        !events.iter().any(|e| e.event_type() == "message"),
        "cancelled request must not produce a message"
    );
}

/// Scenario: one agent serving two sessions keeps their conversations
/// independent.
#[tokio::test]
async fn sessions_are_isolated() {
    let llm = Arc::new(MockModel::with_response("Done."));
    let agent = EnhancedAgent::builder(llm, day_overview_registry()).build();

    let ctx_a = SessionContext::new().with_session_id("alpha");
    let ctx_b = SessionContext::new().with_session_id("beta");

    agent.run("What's my day like?", &ctx_a).await.unwrap();
    let usage_a = agent.context_manager().token_usage("alpha").await;
    let usage_b = agent.context_manager().token_usage("beta").await;

    assert_eq!(usage_a.messages, 2);
    assert_eq!(usage_b.messages, 0);
}
