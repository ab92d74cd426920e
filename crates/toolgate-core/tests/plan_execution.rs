//! Layered plan execution: parallelism, argument passing and failure
//! isolation against an in-memory tool client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use toolgate_core::config::ExecutorConfig;
use toolgate_core::fakes::StaticToolClient;
use toolgate_core::plan::{ArgValue, PlanExecutor, SchedulerError, Task, TaskStatus};

fn executor(client: StaticToolClient) -> (Arc<StaticToolClient>, PlanExecutor) {
    let client = Arc::new(client);
    let executor = PlanExecutor::new(client.clone(), ExecutorConfig::default());
    (client, executor)
}

fn slow(client: StaticToolClient, tool: &str, ms: u64) -> StaticToolClient {
    client.with_slow_tool("svc", tool, json!({ "from": tool }), Duration::from_millis(ms))
}

#[tokio::test]
async fn test_independent_tasks_run_in_parallel() {
    let mut client = StaticToolClient::new();
    for i in 0..5 {
        client = slow(client, &format!("t{i}"), 100);
    }
    let (_, executor) = executor(client);
    let tasks = (0..5)
        .map(|i| Task::tool(format!("t{i}"), "svc", format!("t{i}")))
        .collect();

    let started = Instant::now();
    let outcome = executor.execute(tasks).await.unwrap();
    let wall = started.elapsed();

    assert!(outcome.all_succeeded());
    assert_eq!(outcome.results.len(), 5);
    assert_eq!(outcome.layer_count, 1);
    assert!(wall < Duration::from_millis(150), "took {wall:?}");
    assert!(outcome.speedup >= 3.0, "speedup {}", outcome.speedup);
}

#[tokio::test]
async fn test_three_layer_plan_timing() {
    let mut client = StaticToolClient::new();
    for name in ["t1", "t2", "t3", "t4", "t5"] {
        client = slow(client, name, 100);
    }
    let (_, executor) = executor(client);
    let tasks = vec![
        Task::tool("t1", "svc", "t1"),
        Task::tool("t2", "svc", "t2"),
        Task::tool("t3", "svc", "t3").depends_on("t1").depends_on("t2"),
        Task::tool("t4", "svc", "t4").depends_on("t3"),
        Task::tool("t5", "svc", "t5").depends_on("t3"),
    ];

    let started = Instant::now();
    let outcome = executor.execute(tasks).await.unwrap();
    let wall = started.elapsed();

    assert!(outcome.all_succeeded());
    assert_eq!(outcome.layer_count, 3);
    assert!(wall < Duration::from_millis(350), "took {wall:?}");
    assert_eq!(outcome.result("t3").unwrap().layer, 1);
    assert_eq!(outcome.result("t5").unwrap().layer, 2);
}

#[tokio::test]
async fn test_reference_args_resolved_from_earlier_output() {
    let client = StaticToolClient::new()
        .with_tool("search", "query", json!({ "hits": [{ "url": "https://a" }] }))
        .with_tool("web", "fetch", json!("page body"));
    let (client, executor) = executor(client);
    let tasks = vec![
        Task::tool("find", "search", "query").with_literal("q", json!("rust")),
        Task::tool("get", "web", "fetch")
            .with_arg("url", ArgValue::reference_path("find", "hits.0.url")),
    ];

    let outcome = executor.execute(tasks).await.unwrap();
    assert!(outcome.all_succeeded());
    assert_eq!(outcome.result("get").unwrap().output, Some(json!("page body")));

    let fetch = client
        .calls()
        .into_iter()
        .find(|call| call.tool == "fetch")
        .unwrap();
    assert_eq!(fetch.args, json!({ "url": "https://a" }));
}

#[tokio::test]
async fn test_failure_isolated_to_dependents() {
    let client = StaticToolClient::new()
        .with_failing_tool("svc", "broken", "upstream 500")
        .with_tool("svc", "ok", json!(1));
    let (client, executor) = executor(client);
    let tasks = vec![
        Task::tool("bad", "svc", "broken"),
        Task::tool("sibling", "svc", "ok"),
        Task::tool("child", "svc", "ok").depends_on("bad"),
        Task::tool("other_child", "svc", "ok").depends_on("sibling"),
    ];

    let outcome = executor.execute(tasks).await.unwrap();

    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.result("sibling").unwrap().status, TaskStatus::Success);
    assert_eq!(outcome.result("other_child").unwrap().status, TaskStatus::Success);

    let child = outcome.result("child").unwrap();
    assert_eq!(child.status, TaskStatus::Error);
    assert!(child.error.as_deref().unwrap().starts_with("dependency bad failed"));
    // The dependent never reached the tool client.
    assert_eq!(client.call_count("svc", "ok"), 2);
}

#[tokio::test]
async fn test_task_timeout_reported() {
    let client = slow(StaticToolClient::new(), "sleepy", 500).with_tool("svc", "fast", json!(true));
    let (_, executor) = executor(client);
    let tasks = vec![
        Task::tool("slow", "svc", "sleepy").with_timeout_ms(50),
        Task::tool("fast", "svc", "fast"),
    ];

    let outcome = executor.execute(tasks).await.unwrap();

    let slow = outcome.result("slow").unwrap();
    assert_eq!(slow.error.as_deref(), Some("task timed out after 50ms"));
    assert!(outcome.result("fast").unwrap().is_success());
}

#[tokio::test]
async fn test_unknown_tool_fails_only_that_task() {
    let client = StaticToolClient::new().with_tool("svc", "ok", json!(1));
    let (_, executor) = executor(client);
    let tasks = vec![Task::tool("a", "svc", "missing"), Task::tool("b", "svc", "ok")];

    let outcome = executor.execute(tasks).await.unwrap();
    assert_eq!(
        outcome.result("a").unwrap().error.as_deref(),
        Some("tool not found: svc:missing")
    );
    assert!(outcome.result("b").unwrap().is_success());
}

#[tokio::test]
async fn test_code_task_without_sandbox_fails() {
    let (_, executor) = executor(StaticToolClient::new());
    let outcome = executor
        .execute(vec![Task::code("c", "return 1;")])
        .await
        .unwrap();
    assert_eq!(
        outcome.result("c").unwrap().error.as_deref(),
        Some("no sandbox is configured for code execution")
    );
}

#[tokio::test]
async fn test_cycle_aborts_before_any_call() {
    let client = StaticToolClient::new().with_tool("svc", "ok", json!(1));
    let (client, executor) = executor(client);
    let tasks = vec![
        Task::tool("a", "svc", "ok").depends_on("b"),
        Task::tool("b", "svc", "ok").depends_on("a"),
        Task::tool("c", "svc", "ok"),
    ];

    let err = executor.execute(tasks).await.unwrap_err();
    assert!(matches!(err, SchedulerError::CycleDetected { .. }));
    assert!(client.calls().is_empty());
}
