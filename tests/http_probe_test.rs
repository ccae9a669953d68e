mod common;

use anyhow::Result;
use common::{topology, MemoryStore, RecordingRuntime};
use httpmock::prelude::*;
use small_compose::adapters::DefaultProbeProvider;
use small_compose::core::{Orchestrator, OrchestratorOptions, ProcessLauncher, ResolvedTopology};
use small_compose::domain::model::FinalState;
use std::sync::Arc;
use std::time::Duration;

fn compose(port: u16) -> String {
    format!(
        r#"
services:
  review:
    image: review:latest
    depends_on:
      experiment-config:
        condition: service_healthy
  experiment-config:
    image: experiment-config:latest
    healthcheck:
      http:
        path: /healthz
        port: {port}
      interval: 100ms
      timeout: 500ms
      retries: 3
"#
    )
}

fn orchestrator(
    topology: ResolvedTopology,
    runtime: RecordingRuntime,
) -> Orchestrator<RecordingRuntime, MemoryStore> {
    let launcher = ProcessLauncher::new(runtime, MemoryStore::default(), topology.volumes().clone());
    Orchestrator::new(
        Arc::new(topology),
        launcher,
        Arc::new(DefaultProbeProvider::new().with_host("127.0.0.1")),
        OrchestratorOptions {
            restart_limit: 0,
            stop_grace_period: Duration::from_millis(100),
        },
    )
}

#[tokio::test]
async fn test_http_probe_gates_dependent() -> Result<()> {
    let server = MockServer::start_async().await;
    let health = server
        .mock_async(|when, then| {
            when.method(GET).path("/healthz");
            then.status(200).body("ok");
        })
        .await;

    let runtime = RecordingRuntime::default();
    let orchestrator = orchestrator(topology(&compose(server.port()))?, runtime.clone());
    let report = orchestrator.up(&[]).await?;

    assert!(report.is_success(), "{}", report.render_table());
    assert_eq!(runtime.spawned(), vec!["experiment-config", "review"]);
    assert!(health.hits_async().await >= 1);

    let stopped = orchestrator.teardown().await;
    assert_eq!(stopped, vec!["review", "experiment-config"]);
    Ok(())
}

#[tokio::test]
async fn test_http_probe_failure_marks_unhealthy() -> Result<()> {
    let server = MockServer::start_async().await;
    let health = server
        .mock_async(|when, then| {
            when.method(GET).path("/healthz");
            then.status(503);
        })
        .await;

    let runtime = RecordingRuntime::default();
    let orchestrator = orchestrator(topology(&compose(server.port()))?, runtime.clone());
    let report = orchestrator.up(&[]).await?;

    let config = report.service("experiment-config").unwrap();
    assert_eq!(config.state, FinalState::Unhealthy);
    assert!(config.error.as_deref().unwrap().contains("503"));
    assert_eq!(report.service("review").unwrap().state, FinalState::NotStarted);
    assert_eq!(runtime.spawned(), vec!["experiment-config"]);
    assert_eq!(health.hits_async().await, 3);

    orchestrator.teardown().await;
    Ok(())
}
