use std::time::Duration;

use mygren_smarthub::{Coordinator, Error, HvacAction, HvacMode, MygrenClient, PumpState};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn telemetry_body() -> serde_json::Value {
    json!({
        "program": "Manual_comfort",
        "available_programs": ["Off", "Manual_comfort"],
        "hp_enabled": 1,
        "tuv_set": 43,
        "tuv_enabled": 1,
        "Tint": 21.5,
        "Text": 4.0,
        "compressor": 1,
        "heating": 1,
        "cooling": 0,
        "heatneed": 1,
    })
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .mount(server)
        .await;
}

fn start_coordinator(server: &MockServer, interval: Duration) -> Coordinator {
    let client = MygrenClient::builder(server.uri())
        .credentials("admin", "secret")
        .build();
    Coordinator::builder(client).poll_interval(interval).start()
}

/// Wait up to five seconds for a published state matching the predicate.
async fn wait_for(
    coordinator: &Coordinator,
    mut pred: impl FnMut(&PumpState) -> bool,
) -> PumpState {
    let mut rx = coordinator.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if pred(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("coordinator dropped");
        }
    })
    .await
    .expect("expected state was never published")
}

#[tokio::test]
async fn first_poll_publishes_state() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_millis(50));
    let state = wait_for(&coordinator, |s| s.available).await;

    assert_eq!(state.mode(), Some(HvacMode::Heat));
    assert_eq!(state.action(), Some(HvacAction::Heating));
    assert_eq!(state.selectable_modes(), vec![HvacMode::Off, HvacMode::Heat]);
    let snapshot = state.snapshot().expect("telemetry should be present");
    assert_eq!(snapshot.hot_water_target(), Some(43.0));
    assert_eq!(snapshot.interior_temperature(), Some(21.5));
    assert!(state.last_success.is_some());
    assert!(state.last_error.is_none());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn write_is_visible_before_request_completes() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/tuv/set"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_secs(60));
    wait_for(&coordinator, |s| s.telemetry.is_some()).await;

    let writer = coordinator.clone();
    let handle = tokio::spawn(async move { writer.set_hot_water_target(45).await });

    let state = wait_for(&coordinator, |s| {
        s.snapshot().and_then(|t| t.hot_water_target()) == Some(45.0)
    })
    .await;
    assert!(
        !handle.is_finished(),
        "overlay value should be published while the PUT is still on the wire"
    );
    assert_eq!(state.snapshot().unwrap().hot_water_target(), Some(45.0));

    handle.await.unwrap().expect("write should succeed");
    coordinator.shutdown().await;
}

#[tokio::test]
async fn confirmed_write_converges() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    // Initial poll reports 43, every later poll echoes the accepted 45.
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let mut confirmed = telemetry_body();
    confirmed["tuv_set"] = json!(45);
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(confirmed))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/tuv/set"))
        .and(body_json(json!({"set": 45})))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_millis(50));
    wait_for(&coordinator, |s| {
        s.snapshot().and_then(|t| t.hot_water_target()) == Some(43.0)
    })
    .await;

    coordinator
        .set_hot_water_target(45)
        .await
        .expect("write should succeed");

    let state = wait_for(&coordinator, |s| {
        s.snapshot().and_then(|t| t.hot_water_target()) == Some(45.0) && s.available
    })
    .await;
    assert!(state.last_error.is_none());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn unconfirmed_write_expires_back_to_device_value() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    // The device never applies the write and keeps reporting 43.
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/tuv/set"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_millis(50));
    wait_for(&coordinator, |s| s.telemetry.is_some()).await;

    coordinator
        .set_hot_water_target(45)
        .await
        .expect("write should succeed");
    wait_for(&coordinator, |s| {
        s.snapshot().and_then(|t| t.hot_water_target()) == Some(45.0)
    })
    .await;

    // After the confirmation window passes the optimistic value gives
    // way to what the device actually reports.
    let state = wait_for(&coordinator, |s| {
        s.snapshot().and_then(|t| t.hot_water_target()) == Some(43.0)
    })
    .await;
    assert!(state.available);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn three_failures_mark_unavailable_and_recovery_clears() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(500).set_body_string("panic"))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_millis(50));
    wait_for(&coordinator, |s| s.available).await;

    let down = wait_for(&coordinator, |s| !s.available).await;
    assert_eq!(down.consecutive_failures, 3);
    assert!(down.last_error.is_some());
    assert!(
        down.telemetry.is_some(),
        "stale telemetry should be retained through the outage"
    );

    let up = wait_for(&coordinator, |s| s.available).await;
    assert_eq!(up.consecutive_failures, 0);
    assert!(up.last_error.is_none());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn refreshes_collapse_into_inflight_poll() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(telemetry_body())
                .set_delay(Duration::from_millis(800)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_secs(60));

    // Land both refresh requests while the initial poll is on the wire.
    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator.request_refresh();
    coordinator.request_refresh();

    wait_for(&coordinator, |s| s.telemetry.is_some()).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    coordinator.shutdown().await;
    // MockServer verifies on drop that exactly one fetch went out.
}

#[tokio::test]
async fn set_mode_writes_the_program_once() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/program/program"))
        .and(body_json(json!({"program": "Off"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;
    // Mode changes never touch the pump enable switch.
    Mock::given(method("PUT"))
        .and(path("/api/heatpump/enabled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_millis(50));
    wait_for(&coordinator, |s| s.telemetry.is_some()).await;

    coordinator
        .set_mode(HvacMode::Off)
        .await
        .expect("mode change should succeed");

    let err = coordinator.set_mode(HvacMode::Cool).await.unwrap_err();
    assert!(
        matches!(err, Error::UnsupportedMode(HvacMode::Cool)),
        "expected UnsupportedMode, got {err:?}"
    );

    coordinator.shutdown().await;
}

#[tokio::test]
async fn rejected_write_rolls_back() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/tuv/set"))
        .respond_with(ResponseTemplate::new(409).set_body_string("locked"))
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_secs(60));
    wait_for(&coordinator, |s| s.telemetry.is_some()).await;

    let err = coordinator.set_hot_water_target(45).await.unwrap_err();
    assert!(
        matches!(err, Error::Rejected { status: 409, .. }),
        "expected Rejected, got {err:?}"
    );

    let state = coordinator.state();
    assert_eq!(
        state.snapshot().unwrap().hot_water_target(),
        Some(43.0),
        "rejected write should leave the device value in place"
    );

    coordinator.shutdown().await;
}

#[tokio::test]
async fn unknown_program_is_rejected_locally() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/program/program"))
        .and(body_json(json!({"program": "Off"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_millis(50));
    wait_for(&coordinator, |s| s.telemetry.is_some()).await;

    let err = coordinator.set_program("Vacation").await.unwrap_err();
    match err {
        Error::UnknownProgram(program) => assert_eq!(program, "Vacation"),
        other => panic!("expected UnknownProgram, got {other:?}"),
    }

    coordinator
        .set_program("Off")
        .await
        .expect("offered program should be accepted");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn shutdown_discards_inflight_poll() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(telemetry_body())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_secs(60));
    coordinator.shutdown().await;

    assert!(
        coordinator.state().telemetry.is_none(),
        "a poll overtaken by shutdown must not publish"
    );

    let err = coordinator.set_hot_water_target(45).await.unwrap_err();
    assert!(matches!(err, Error::Detached));
    let err = coordinator.refresh().await.unwrap_err();
    assert!(matches!(err, Error::Detached));
}

#[tokio::test]
async fn refresh_waits_for_a_fresh_state() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_body()))
        .mount(&server)
        .await;

    let coordinator = start_coordinator(&server, Duration::from_secs(60));
    let state = coordinator.refresh().await.expect("refresh should succeed");
    assert!(state.telemetry.is_some());

    coordinator.shutdown().await;
}
