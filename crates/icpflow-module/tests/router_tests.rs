use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use icpflow_core::config::{Config, SharedConfig};
use icpflow_core::error::Error;
use icpflow_instrument::mock::MockRemoteControl;
use icpflow_instrument::{Notification, RemoteControl};
use icpflow_module::{router, AppState, IcpModule, ModuleStatus};

async fn start(mock: &Arc<MockRemoteControl>) -> (Arc<IcpModule>, AppState) {
    let mut config = Config::default();
    config.analysis.wait_for_completion = false;
    let client: Arc<dyn RemoteControl> = mock.clone();
    let module = Arc::new(
        IcpModule::startup(SharedConfig::new(config), client)
            .await
            .unwrap(),
    );
    let state = AppState::new(module.clone());
    (module, state)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[test_log::test(tokio::test)]
async fn test_startup_queries_status() {
    let mock = Arc::new(MockRemoteControl::new());
    let (_module, _state) = start(&mock).await;
    assert_eq!(
        mock.command_names(),
        vec!["GetPlasmaStatus", "GetInstrumentStatus", "GetAnalysisStatus"]
    );
}

#[tokio::test]
async fn test_startup_failure_after_connect_disconnects() {
    let mock = Arc::new(MockRemoteControl::new());
    mock.reject("GetInstrumentStatus");
    let client: Arc<dyn RemoteControl> = mock.clone();

    let err = IcpModule::startup(SharedConfig::new(Config::default()), client)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommandRejected { .. }));
    assert_eq!(mock.disconnects(), 1);
}

#[tokio::test]
async fn test_rejected_connect_aborts_startup() {
    let mock = Arc::new(MockRemoteControl::new());
    mock.reject_connect();
    let client: Arc<dyn RemoteControl> = mock.clone();

    let err = IcpModule::startup(SharedConfig::new(Config::default()), client)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure(_)));
    assert!(mock.commands().is_empty());
}

#[tokio::test]
async fn test_action_succeeds_with_vendor_response() {
    let mock = Arc::new(MockRemoteControl::new());
    let (_module, state) = start(&mock).await;

    let (status, body) = send(
        router(state),
        post_json("/action", json!({"action_handle": "move_autosampler", "action_vars": {"location": 7}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action_response"], json!("succeeded"));
    assert_eq!(body["action_msg"], json!("MoveAutosampler OK"));
}

#[tokio::test]
async fn test_unknown_and_malformed_actions_fail_as_steps() {
    let mock = Arc::new(MockRemoteControl::new());
    let (module, state) = start(&mock).await;
    mock.clear_commands();

    let (status, body) = send(
        router(state.clone()),
        post_json("/action", json!({"action_handle": "reboot", "action_vars": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action_response"], json!("failed"));
    assert!(body["action_log"].as_str().unwrap().contains("unknown action"));
    assert_eq!(module.status(), ModuleStatus::Error);

    let (status, body) = send(
        router(state.clone()),
        post_json("/action", json!({"action_handle": "start_manual_analysis", "action_vars": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action_response"], json!("failed"));

    let malformed = Request::post("/action")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(router(state.clone()), malformed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action_response"], json!("failed"));
    assert!(mock.commands().is_empty());

    send(router(state), post_json("/action", json!({"action_handle": "plasma_on"}))).await;
    assert_eq!(module.status(), ModuleStatus::Ready);
}

#[tokio::test]
async fn test_rejected_command_reports_response() {
    let mock = Arc::new(MockRemoteControl::new());
    let (_module, state) = start(&mock).await;
    mock.reject("LoadMethod");

    let (_, body) = send(
        router(state),
        post_json("/action", json!({"action_handle": "load_method", "action_vars": {"name": "Metals"}})),
    )
    .await;
    assert_eq!(body["action_response"], json!("failed"));
    assert_eq!(body["action_msg"], json!("LoadMethod failed"));
}

#[tokio::test]
async fn test_state_reports_cached_status() {
    let mock = Arc::new(MockRemoteControl::new());
    mock.set_plasma_status(1);
    mock.script_analysis([0, 1]);
    mock.set_methods(["Metals", "Soil"]);
    let (_module, state) = start(&mock).await;
    mock.notify(Notification::Error {
        code: 7,
        message: "Torch".into(),
        severity: 1,
    });

    let (status, body) = send(router(state), get("/state")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("READY"));
    assert_eq!(body["plasma_status"], json!("1: Plasma is Off"));
    assert_eq!(body["analysis_status"], json!("1: Analysis Running"));
    assert_eq!(body["connection_status"], json!(true));
    assert_eq!(body["methods"], json!(["Metals", "Soil"]));
}

#[tokio::test]
async fn test_admin_routes() {
    let mock = Arc::new(MockRemoteControl::new());
    let (module, state) = start(&mock).await;
    mock.clear_commands();

    let (status, body) = send(router(state.clone()), post_json("/admin/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action_response"], json!("succeeded"));
    assert_eq!(mock.command_names(), vec!["StopAnalysis", "ResetAnalysisSequence"]);

    mock.clear_commands();
    send(router(state.clone()), post_json("/admin/safety_stop", json!({}))).await;
    assert_eq!(mock.command_names(), vec!["StopAnalysis"]);

    let (status, _) = send(router(state.clone()), post_json("/admin/reboot", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(router(state.clone()), post_json("/admin/shutdown", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.shutdown.is_cancelled());

    module.shutdown().await.unwrap();
    module.shutdown().await.unwrap();
    assert_eq!(mock.disconnects(), 1);
}

#[tokio::test]
async fn test_about_and_health() {
    let mock = Arc::new(MockRemoteControl::new());
    let (module, state) = start(&mock).await;

    let (_, about) = send(router(state.clone()), get("/about")).await;
    assert_eq!(about["name"], json!("pe_icp_module"));
    assert_eq!(about["model"], json!("PerkinElmer Avio 550 Max"));
    let actions: Vec<&str> = about["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"start_auto_analysis"));
    assert!(actions.contains(&"load_sample_info"));

    let (status, health) = send(router(state.clone()), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["connected"], json!(true));

    module.shutdown().await.unwrap();
    let (status, _) = send(router(state), get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
