//! Failure scenario tests
//!
//! Tests how the agent handles remote failures:
//! - 500/502 responses are retried exactly once
//! - 403/404 responses are logged and never retried
//! - a broken monitor does not affect its siblings

use std::sync::Arc;
use std::time::Duration;

use nemea_agent::actors::agent::AgentHandle;
use nemea_agent::actors::messages::{AgentState, TickOutcome};
use nemea_agent::actors::monitor::MonitorHandle;
use nemea_agent::client::ApiClient;
use nemea_agent::config::{MonitorDescriptor, MonitorId};
use nemea_agent::geo::GeoLocator;
use nemea_agent::reporter::Reporter;
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_config_server_error_retried_once_then_succeeds() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nemea/config"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_config(&mock_server, 30_000).await;
    mount_monitors(&mock_server, serde_json::json!([])).await;

    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    wait_for_state(&handle, AgentState::Monitoring).await;

    assert_eq!(request_count(&mock_server, "/v1/nemea/config").await, 2);
    assert_eq!(
        handle.status().await.unwrap().refresh_interval,
        Duration::from_secs(30)
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_config_bad_gateway_gives_up_after_one_retry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nemea/config"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    // next attempt only after config_retry_interval (10s)
    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(request_count(&mock_server, "/v1/nemea/config").await, 2);
    assert_eq!(handle.state(), AgentState::ConfigLoading);

    handle.shutdown().await.unwrap();
    assert_eq!(handle.state(), AgentState::Stopped);
}

#[tokio::test]
async fn test_forbidden_config_not_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nemea/config"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(request_count(&mock_server, "/v1/nemea/config").await, 1);
    assert_eq!(request_count(&mock_server, "/v1/nemea/monitors").await, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_drift_check_keeps_running_set() {
    let mock_server = MockServer::start().await;
    mount_config(&mock_server, 50).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([dns_monitor_json(1, "example.com", 60_000)]),
    )
    .await;

    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    wait_for_state(&handle, AgentState::Monitoring).await;

    let mut state_rx = handle.subscribe_state();
    state_rx.borrow_and_update();

    mock_server.reset().await;
    mount_config(&mock_server, 50).await;
    Mock::given(method("GET"))
        .and(path("/v1/nemea/monitors"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(request_count(&mock_server, "/v1/nemea/monitors").await >= 2);
    assert!(!state_rx.has_changed().unwrap());
    assert_eq!(
        handle.status().await.unwrap().monitors,
        vec![MonitorId::Number(1)]
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ingest_server_error_retried_exactly_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/nemea/ingest"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = ApiClient::new(mock_server.uri(), "test-key").unwrap();
    let reporter = Arc::new(Reporter::new(client, GeoLocator::disabled(), quick_retry()));
    let descriptor: MonitorDescriptor =
        serde_json::from_value(dns_monitor_json(7, "example.com", 60_000)).unwrap();

    let agent = create_test_agent(&mock_server);
    let monitor = MonitorHandle::spawn(descriptor, agent.executor, Arc::clone(&reporter));

    assert_eq!(monitor.run_now().await.unwrap(), TickOutcome::Reported);
    reporter.drain().await;
    monitor.stop().await;

    assert_eq!(request_count(&mock_server, "/v1/nemea/ingest").await, 2);
}

#[tokio::test]
async fn test_broken_monitor_does_not_stop_siblings() {
    let mock_server = MockServer::start().await;
    mount_config(&mock_server, 30_000).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([
            { "id": 1, "type": "HTTP", "url": "https://example.com", "interval": 40 },
            { "id": 2, "type": "DNS", "recordType": "TXT", "domain": "example.com", "interval": 40 },
            dns_monitor_json(3, "example.com", 40)
        ]),
    )
    .await;
    mount_ingest(&mock_server, 200).await;

    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    wait_for_state(&handle, AgentState::Monitoring).await;

    assert_eq!(
        handle.status().await.unwrap().monitors,
        vec![
            MonitorId::Number(1),
            MonitorId::Number(2),
            MonitorId::Number(3)
        ]
    );

    eventually("sibling keeps reporting", || async {
        ingest_bodies(&mock_server).await.len() >= 3
    })
    .await;

    let bodies = ingest_bodies(&mock_server).await;
    assert!(bodies.iter().all(|body| body["monitorId"] == 3));

    handle.shutdown().await.unwrap();
}
