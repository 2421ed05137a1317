//! Drift detection and reconciliation against a changing remote side

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use nemea_agent::actors::agent::AgentHandle;
use nemea_agent::actors::messages::AgentState;
use nemea_agent::config::MonitorId;
use pretty_assertions::assert_eq;
use wiremock::MockServer;

use crate::helpers::*;

#[tokio::test]
async fn test_empty_list_stops_monitors_but_not_drift_checks() {
    let mock_server = MockServer::start().await;
    mount_config(&mock_server, 60).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([dns_monitor_json(1, "example.com", 50)]),
    )
    .await;
    mount_ingest(&mock_server, 200).await;

    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    eventually("first result reported", || async {
        !ingest_bodies(&mock_server).await.is_empty()
    })
    .await;

    mock_server.reset().await;
    mount_config(&mock_server, 60).await;
    mount_monitors(&mock_server, serde_json::json!([])).await;
    mount_ingest(&mock_server, 200).await;

    eventually("monitor task stopped", || async {
        handle.status().await.unwrap().monitors.is_empty()
    })
    .await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, AgentState::Monitoring);
    assert_eq!(status.drift_tasks, 2);

    // drift checks keep running, nothing is reported any more
    let ingested = ingest_bodies(&mock_server).await.len();
    let checks = request_count(&mock_server, "/v1/nemea/monitors").await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(ingest_bodies(&mock_server).await.len(), ingested);
    assert!(request_count(&mock_server, "/v1/nemea/monitors").await > checks);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_replaced_set_leaves_no_old_tasks() {
    let mock_server = MockServer::start().await;
    mount_config(&mock_server, 60).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([
            dns_monitor_json(1, "example.com", 40),
            dns_monitor_json(2, "example.org", 40)
        ]),
    )
    .await;
    mount_ingest(&mock_server, 200).await;

    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    wait_for_state(&handle, AgentState::Monitoring).await;

    // monitor 2 changes its domain, monitor 1 goes away, monitor 3 is new
    mock_server.reset().await;
    mount_config(&mock_server, 60).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([
            dns_monitor_json(2, "example.net", 40),
            dns_monitor_json(3, "example.edu", 40)
        ]),
    )
    .await;
    mount_ingest(&mock_server, 200).await;

    eventually("new set running", || async {
        handle.status().await.unwrap().monitors == vec![MonitorId::Number(2), MonitorId::Number(3)]
    })
    .await;

    mock_server.reset().await;
    mount_config(&mock_server, 60).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([
            dns_monitor_json(2, "example.net", 40),
            dns_monitor_json(3, "example.edu", 40)
        ]),
    )
    .await;
    mount_ingest(&mock_server, 200).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let bodies = ingest_bodies(&mock_server).await;
    assert!(!bodies.is_empty());

    let reported: HashSet<(u64, String)> = bodies
        .iter()
        .map(|body| {
            (
                body["monitorId"].as_u64().unwrap(),
                body["result"]["domain"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    let expected: HashSet<(u64, String)> = [
        (2, "example.net".to_string()),
        (3, "example.edu".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(reported, expected);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unchanged_list_does_not_restart() {
    let mock_server = MockServer::start().await;
    mount_config(&mock_server, 40).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([dns_monitor_json(1, "example.com", 60_000)]),
    )
    .await;

    let handle = AgentHandle::spawn(create_test_agent(&mock_server));
    wait_for_state(&handle, AgentState::Monitoring).await;

    let mut state_rx = handle.subscribe_state();
    state_rx.borrow_and_update();
    let checks = request_count(&mock_server, "/v1/nemea/monitors").await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(request_count(&mock_server, "/v1/nemea/monitors").await >= checks + 3);
    assert!(
        !state_rx.has_changed().unwrap(),
        "an identical monitor list must not trigger a restart"
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refresh_interval_drift_applied_in_place() {
    let mock_server = MockServer::start().await;
    mount_config(&mock_server, 60).await;
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
    mount_config(&mock_server, 90).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([dns_monitor_json(1, "example.com", 60_000)]),
    )
    .await;

    eventually("new refresh interval active", || async {
        handle.status().await.unwrap().refresh_interval == Duration::from_millis(90)
    })
    .await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.monitors, vec![MonitorId::Number(1)]);
    assert!(
        !state_rx.has_changed().unwrap(),
        "an interval change must not restart monitor tasks"
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_waits_for_in_flight_ticks() {
    let mock_server = MockServer::start().await;
    mount_config(&mock_server, 60).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([
            ping_monitor_json(1, "10.0.0.1", 50),
            ping_monitor_json(2, "10.0.0.2", 50)
        ]),
    )
    .await;
    mount_ingest(&mock_server, 200).await;

    // one tick is five 30ms attempts, so a tick is running almost all the time
    let pinger = Arc::new(InFlightPinger::default());
    let handle =
        AgentHandle::spawn(create_test_agent_with_pinger(&mock_server, pinger.clone()));
    wait_for_state(&handle, AgentState::Monitoring).await;

    eventually("first generation probing", || async { pinger.finished() >= 3 }).await;

    let mut state_rx = handle.subscribe_state();
    state_rx.borrow_and_update();

    // same ids and hosts, only monitor 1's interval changes
    mock_server.reset().await;
    mount_config(&mock_server, 60).await;
    mount_monitors(
        &mock_server,
        serde_json::json!([
            ping_monitor_json(1, "10.0.0.1", 70),
            ping_monitor_json(2, "10.0.0.2", 50)
        ]),
    )
    .await;
    mount_ingest(&mock_server, 200).await;

    eventually("reconciliation started", || async {
        state_rx.has_changed().unwrap()
    })
    .await;
    wait_for_state(&handle, AgentState::Monitoring).await;

    let after_restart = pinger.finished();
    eventually("second generation probing", || async {
        pinger.finished() >= after_restart + 10
    })
    .await;

    handle.shutdown().await.unwrap();

    assert_eq!(handle.state(), AgentState::Stopped);
    assert!(
        !pinger.overlapped(),
        "two generations probed the same monitor at once"
    );
    assert!(ingest_bodies(&mock_server).await.len() >= 2);
}
