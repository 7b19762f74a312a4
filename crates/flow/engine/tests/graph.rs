//! Controller behaviour across reloads and node failures.

use std::time::Duration;

use flow_engine::{
    testcomponents, ComponentRegistry, FailureKind, Flow, FlowError, FlowOptions, NodeInfo,
    NodeState,
};
use flow_types::{ConfigError, Value};
use tokio_util::sync::CancellationToken;

fn flow() -> Flow {
    let mut components = ComponentRegistry::new();
    testcomponents::register_all(&mut components).unwrap();
    Flow::new(FlowOptions::new(components))
}

async fn info(flow: &Flow, id: &str) -> NodeInfo {
    flow.node_info("", id).await.unwrap()
}

/// Poll until `check` holds for node `id`.
async fn wait_for(flow: &Flow, id: &str, check: impl Fn(&NodeInfo) -> bool) -> NodeInfo {
    for _ in 0..500 {
        let node = info(flow, id).await;
        if check(&node) {
            return node;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{id} never reached the expected state: {:?}", info(flow, id).await);
}

#[tokio::test]
async fn test_rejected_reload_keeps_running_graph() {
    let flow = flow();
    flow.load_source(
        r#"
        testcomponents.passthrough "a" { input = 1 }
        testcomponents.summation "s" { input = testcomponents.passthrough.a.output }
        "#,
    )
    .await
    .unwrap();
    let before = info(&flow, "testcomponents.passthrough.a").await;

    let err = flow
        .load_source(
            r#"
            testcomponents.passthrough "a" { input = testcomponents.passthrough.b.output }
            testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
            testcomponents.summation "s" { input = 2 }
            "#,
        )
        .await
        .unwrap_err();
    let FlowError::Config(errors) = err else {
        panic!("expected config errors");
    };
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::DependencyCycle { members } if members.len() == 2)));

    let nodes = flow.list_nodes("").await.unwrap();
    assert_eq!(nodes.len(), 2);
    let after = info(&flow, "testcomponents.passthrough.a").await;
    assert_eq!(after.built_at, before.built_at);
    assert_eq!(after.arguments, before.arguments);
    let sum = flow.exports("", "testcomponents.summation.s").await.unwrap();
    assert_eq!(sum.get("sum"), Some(&Value::from(1)));
}

#[tokio::test]
async fn test_parse_error_is_reported() {
    let flow = flow();
    assert!(matches!(
        flow.load_source(r#"testcomponents.passthrough "a" { input = }"#).await,
        Err(FlowError::Parse(_))
    ));
}

#[tokio::test]
async fn test_failing_run_loops_are_isolated() {
    let flow = flow();
    flow.load_source(
        r#"
        testcomponents.fail "err" {
            fail_run  = true
            run_error = "exporter unreachable"
        }
        testcomponents.fail "panics" { panic_run = true }
        testcomponents.passthrough "ok" { input = 1 }
        "#,
    )
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let flow = flow.clone();
        let cancel = cancel.clone();
        async move { flow.run(cancel).await }
    });

    let failed = wait_for(&flow, "testcomponents.fail.err", |n| n.state == NodeState::Exited).await;
    assert_eq!(failed.health.kind(), Some(FailureKind::Run));
    let panicked = wait_for(&flow, "testcomponents.fail.panics", |n| n.state == NodeState::Exited).await;
    assert_eq!(panicked.health.kind(), Some(FailureKind::Run));

    let ok = info(&flow, "testcomponents.passthrough.ok").await;
    assert_eq!(ok.state, NodeState::Running);
    assert!(ok.health.is_healthy());

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_failure_is_terminal() {
    let flow = flow();
    let config = |input: i64| {
        format!(
            r#"
            testcomponents.passthrough "a" {{ input = {input} }}
            testcomponents.fail "f" {{
                fail_run = true
                value    = 10 / testcomponents.passthrough.a.output
            }}
            "#
        )
    };
    flow.load_source(&config(1)).await.unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let flow = flow.clone();
        let cancel = cancel.clone();
        async move { flow.run(cancel).await }
    });
    let f = wait_for(&flow, "testcomponents.fail.f", |n| n.state == NodeState::Exited).await;
    assert_eq!(f.health.kind(), Some(FailureKind::Run));

    // Division by zero, then back to the original arguments, then new ones.
    for input in [0, 1, 2] {
        flow.load_source(&config(input)).await.unwrap();
        let f = info(&flow, "testcomponents.fail.f").await;
        assert_eq!(f.state, NodeState::Exited, "input {input}");
        assert_eq!(f.health.kind(), Some(FailureKind::Run), "input {input}");
        assert_eq!(f.exports.get("value"), Some(&Value::from(10)), "input {input}");
    }

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_update_failure_keeps_previous_exports() {
    let flow = flow();
    let config = |value: i64| {
        format!(
            r#"
            testcomponents.fail "f" {{
                fail_update = true
                value       = {value}
            }}
            testcomponents.passthrough "p" {{ input = testcomponents.fail.f.value }}
            "#
        )
    };
    flow.load_source(&config(1)).await.unwrap();
    flow.load_source(&config(2)).await.unwrap();

    let f = info(&flow, "testcomponents.fail.f").await;
    assert_eq!(f.health.kind(), Some(FailureKind::Update));
    assert_eq!(f.exports.get("value"), Some(&Value::from(1)));
    assert_eq!(f.update_count, 0);

    let p = flow.exports("", "testcomponents.passthrough.p").await.unwrap();
    assert_eq!(p.get("output"), Some(&Value::from(1)));
}

#[tokio::test]
async fn test_evaluation_failure_recovers() {
    let flow = flow();
    let config = |input: &str| {
        format!(
            r#"
            testcomponents.passthrough "a" {{ input = {input} }}
            testcomponents.summation "s" {{ input = testcomponents.passthrough.a.output }}
            testcomponents.summation "other" {{ input = 7 }}
            "#
        )
    };
    flow.load_source(&config("1")).await.unwrap();

    flow.load_source(&config(r#""x""#)).await.unwrap();
    let s = info(&flow, "testcomponents.summation.s").await;
    assert_eq!(s.health.kind(), Some(FailureKind::Evaluation));
    assert_eq!(s.exports.get("sum"), Some(&Value::from(1)));

    let other = info(&flow, "testcomponents.summation.other").await;
    assert!(other.health.is_healthy());
    assert_eq!(other.exports.get("sum"), Some(&Value::from(7)));
    assert_eq!(other.update_count, 0);
    let a = info(&flow, "testcomponents.passthrough.a").await;
    assert!(a.health.is_healthy());

    flow.load_source(&config("5")).await.unwrap();
    let s = info(&flow, "testcomponents.summation.s").await;
    assert!(s.health.is_healthy());
    assert_eq!(s.exports.get("sum"), Some(&Value::from(6)));
    assert_eq!(s.update_count, 1);
}

#[tokio::test]
async fn test_node_info_reports_edges() {
    let flow = flow();
    flow.load_source(
        r#"
        testcomponents.passthrough "a" { input = 1 }
        testcomponents.passthrough "b" { input = testcomponents.passthrough.a.output }
        testcomponents.summation "s" { input = testcomponents.passthrough.b.output }
        "#,
    )
    .await
    .unwrap();

    let b = info(&flow, "testcomponents.passthrough.b").await;
    assert_eq!(b.node_type, "component");
    assert_eq!(b.kind, "testcomponents.passthrough");
    assert_eq!(b.state, NodeState::Built);
    assert_eq!(b.dependencies, vec!["testcomponents.passthrough.a"]);
    assert_eq!(b.dependents, vec!["testcomponents.summation.s"]);

    let json = serde_json::to_value(&b).unwrap();
    assert_eq!(json["state"], "built");
    assert_eq!(json["health"]["status"], "healthy");
}

#[tokio::test]
async fn test_removed_nodes_are_torn_down() {
    let flow = flow();
    flow.load_source(
        r#"
        testcomponents.count "c" {
            frequency = "1h"
            max       = 1
        }
        testcomponents.passthrough "p" { input = 1 }
        "#,
    )
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let flow = flow.clone();
        let cancel = cancel.clone();
        async move { flow.run(cancel).await }
    });
    wait_for(&flow, "testcomponents.count.c", |n| n.state == NodeState::Running).await;

    flow.load_source(r#"testcomponents.passthrough "p" { input = 1 }"#)
        .await
        .unwrap();
    assert!(matches!(
        flow.node_info("", "testcomponents.count.c").await,
        Err(FlowError::NodeNotFound(_))
    ));
    assert_eq!(info(&flow, "testcomponents.passthrough.p").await.state, NodeState::Running);

    cancel.cancel();
    task.await.unwrap().unwrap();
}
