use std::sync::Arc;
use std::time::Duration;

use ric_alarm::{
    AlarmAction, AlarmConfig, AlarmError, AlarmMessage, BusStatus, LoopbackBus, RicAlarm,
    RouteTable, Severity, TcpBus,
};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const READY_TIMEOUT: Duration = Duration::from_secs(5);

fn config(dir: &TempDir, manager_url: &str) -> AlarmConfig {
    AlarmConfig::new("ricplt")
        .with_manager_url(manager_url)
        .with_route_table_path(dir.path().join("alarm.rt"))
        .with_test_mode(true)
}

async fn loopback_client(dir: &TempDir) -> RicAlarm {
    let alarmer = RicAlarm::with_runtime(
        "my-pod-lib",
        "my-app",
        config(dir, "http://127.0.0.1:1"),
        Arc::new(LoopbackBus::new()),
    );
    tokio::time::timeout(READY_TIMEOUT, alarmer.wait_bus_ready())
        .await
        .expect("bus should come up");
    alarmer
}

async fn next_message(alarmer: &RicAlarm) -> AlarmMessage {
    let mut received = None;
    tokio::time::timeout(READY_TIMEOUT, alarmer.receive_message(|m| received = Some(m)))
        .await
        .expect("message should arrive")
        .expect("receive should succeed");
    received.expect("callback should run")
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_init_and_raise() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;
    assert_eq!(alarmer.bus_endpoint(), "127.0.0.1:4588");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("alarm.rt")).unwrap(),
        "newrt|start\nrte|13111|127.0.0.1:4588\nnewrt|end\n"
    );

    let alarm = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");
    alarmer.raise(alarm).await.unwrap();

    let message = next_message(&alarmer).await;
    assert_eq!(message.action, AlarmAction::Raise);
    assert_eq!(message.alarm.specific_problem, 1234);
    assert_eq!(message.alarm.perceived_severity, Severity::Major);
}

#[tokio::test]
async fn test_clear() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;

    let alarm = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");
    alarmer.clear(alarm.clone()).await.unwrap();

    let message = next_message(&alarmer).await;
    assert_eq!(message.action, AlarmAction::Clear);
    assert_eq!(message.alarm, alarm);
}

#[tokio::test]
async fn test_clear_all() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;

    alarmer.clear_all().await.unwrap();

    let message = next_message(&alarmer).await;
    assert_eq!(message.action, AlarmAction::ClearAll);
    assert_eq!(message.alarm.specific_problem, 0);
    assert_eq!(message.alarm.perceived_severity, Severity::Default);
    assert!(message.alarm.identifying_info.is_empty());
    assert!(message.alarm.additional_info.is_empty());
}

#[tokio::test]
async fn test_large_additional_info() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;
    let info = "a".repeat(2024);

    let alarm = alarmer.new_alarm(1234, Severity::Major, &info, "eth 0 1");
    alarmer.raise(alarm.clone()).await.unwrap();
    alarmer.clear(alarm).await.unwrap();

    for action in [AlarmAction::Raise, AlarmAction::Clear] {
        let message = next_message(&alarmer).await;
        assert_eq!(message.action, action);
        assert_eq!(message.alarm.additional_info.len(), 2024);
        assert_eq!(message.alarm.additional_info, info);
    }
}

#[tokio::test]
async fn test_reraise_sends_clear_then_raise() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;

    let alarm = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");
    alarmer.reraise(alarm.clone()).await.unwrap();

    let clear = next_message(&alarmer).await;
    let raise = next_message(&alarmer).await;
    assert_eq!(clear.action, AlarmAction::Clear);
    assert_eq!(raise.action, AlarmAction::Raise);
    assert_eq!(clear.alarm, alarm);
    assert_eq!(raise.alarm, alarm);
    assert!(raise.alarm_time >= clear.alarm_time);
}

#[tokio::test]
async fn test_set_identity_affects_later_alarms() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;

    let before = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");
    alarmer.set_managed_object_id("new-pod");
    alarmer.set_application_id("new-app");
    let after = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");

    assert_eq!(after.managed_object_id, "new-pod");
    assert_eq!(after.application_id, "new-app");
    assert_eq!(before.managed_object_id, "my-pod-lib");
    assert_eq!(before.application_id, "my-app");
}

#[tokio::test]
async fn test_http_fallback_when_bus_not_ready() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ric/v1/alarms"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let alarmer = RicAlarm::with_runtime(
        "my-pod-lib",
        "my-app",
        config(&dir, &mock_server.uri()),
        Arc::new(LoopbackBus::new().unavailable()),
    );
    assert!(!alarmer.is_bus_ready());

    let alarm = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");
    alarmer.raise(alarm.clone()).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["managedObjectId"], "my-pod-lib");
    assert_eq!(body["applicationId"], "my-app");
    assert_eq!(body["specificProblem"], 1234);
    assert_eq!(body["perceivedSeverity"], "MAJOR");
    assert_eq!(body["identifyingInfo"], "eth 0 1");
    assert_eq!(body["additionalInfo"], "Some App data");
    assert_eq!(body["AlarmAction"], "RAISE");
    assert!(body["AlarmTime"].as_i64().unwrap() > 0);

    let decoded = AlarmMessage::from_json(&requests[0].body).unwrap();
    assert_eq!(decoded.alarm, alarm);
}

#[tokio::test]
async fn test_http_fallback_when_bus_rejects() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ric/v1/alarms"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let alarmer = RicAlarm::with_runtime(
        "my-pod-lib",
        "my-app",
        config(&dir, &mock_server.uri()),
        Arc::new(LoopbackBus::new().failing_with(BusStatus::SendFailed)),
    );
    tokio::time::timeout(READY_TIMEOUT, alarmer.wait_bus_ready())
        .await
        .unwrap();

    let alarm = alarmer.new_alarm(1234, Severity::Major, "", "");
    alarmer.reraise(alarm).await.unwrap();
}

#[tokio::test]
async fn test_both_transports_failing() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = RicAlarm::with_runtime(
        "my-pod-lib",
        "my-app",
        config(&dir, "http://127.0.0.1:1"),
        Arc::new(LoopbackBus::new().unavailable()),
    );

    let alarm = alarmer.new_alarm(1234, Severity::Major, "", "");
    let error = alarmer.raise(alarm).await.unwrap_err();

    assert!(matches!(error, AlarmError::Delivery(ref failures) if failures.len() == 2));
    assert!(error.to_string().contains(" and  "));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_strict_http_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ric/v1/alarms"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let alarmer = RicAlarm::with_runtime(
        "my-pod-lib",
        "my-app",
        config(&dir, &mock_server.uri()).with_strict_http_status(true),
        Arc::new(LoopbackBus::new().unavailable()),
    );

    let alarm = alarmer.new_alarm(1234, Severity::Major, "", "");
    let error = alarmer.raise(alarm).await.unwrap_err();
    assert!(error.to_string().contains("HTTP 503"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_operations_are_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;
    const TASKS: i32 = 16;

    let mut handles = Vec::new();
    for i in 0..TASKS {
        let alarmer = alarmer.clone();
        handles.push(tokio::spawn(async move {
            let raised = alarmer.new_alarm(2000 + i, Severity::Minor, "", "");
            let cleared = alarmer.new_alarm(3000 + i, Severity::Minor, "", "");
            let reraised = alarmer.new_alarm(1000 + i, Severity::Minor, "", "");
            alarmer.raise(raised).await.unwrap();
            alarmer.reraise(reraised).await.unwrap();
            alarmer.clear(cleared).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut messages = Vec::new();
    for _ in 0..TASKS * 4 {
        messages.push(next_message(&alarmer).await);
    }

    let mut index = 0;
    while index < messages.len() {
        let message = &messages[index];
        let sp = message.alarm.specific_problem;
        if (1000..2000).contains(&sp) {
            assert_eq!(message.action, AlarmAction::Clear);
            let next = &messages[index + 1];
            assert_eq!(next.action, AlarmAction::Raise);
            assert_eq!(next.alarm.specific_problem, sp);
            index += 2;
        } else {
            index += 1;
        }
    }
}

#[tokio::test]
async fn test_receive_round_trip_over_tcp() {
    let addr = format!("127.0.0.1:{}", free_port());
    let dir = tempfile::tempdir().unwrap();
    let bus = TcpBus::with_listen_addr(addr.clone()).with_route_table(RouteTable::alarm(&addr));

    let alarmer = RicAlarm::with_runtime(
        "my-pod",
        "my-app",
        config(&dir, "http://127.0.0.1:1")
            .with_test_mode(false)
            .with_bus_endpoint(addr.clone()),
        Arc::new(bus),
    );
    tokio::time::timeout(READY_TIMEOUT, alarmer.wait_bus_ready())
        .await
        .unwrap();

    let alarm = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");

    let receiver = {
        let alarmer = alarmer.clone();
        let expected = alarm.clone();
        tokio::spawn(async move {
            alarmer
                .receive_message(move |m| {
                    assert_eq!(m.alarm, expected);
                    assert_eq!(m.action, AlarmAction::Raise);
                })
                .await
        })
    };

    alarmer.raise(alarm).await.unwrap();

    tokio::time::timeout(READY_TIMEOUT, receiver)
        .await
        .expect("receiver should finish")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_receive_loop_delivers_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let alarmer = loopback_client(&dir).await;

    let alarm = alarmer.new_alarm(1234, Severity::Warning, "", "");
    alarmer.raise(alarm.clone()).await.unwrap();
    alarmer.clear(alarm).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let receiver = {
        let alarmer = alarmer.clone();
        tokio::spawn(async move {
            alarmer
                .receive_loop(move |m| {
                    let _ = tx.send(m.action);
                })
                .await
        })
    };

    assert_eq!(rx.recv().await, Some(AlarmAction::Raise));
    assert_eq!(rx.recv().await, Some(AlarmAction::Clear));
    receiver.abort();
}
