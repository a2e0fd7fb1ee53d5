//! Integration tests for the API server.
//!
//! The router runs against the in-memory saga log and a scripted gateway, so
//! every test drives real orchestration end to end through HTTP.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{CorrelationId, SagaId};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{GatewayError, HttpMethod, InMemoryServiceGateway, ServiceEndpoints};
use saga_log::{InMemorySagaLogStore, SagaLogStore, SagaStep};
use serde_json::json;
use tokio::time::Instant;
use tower::ServiceExt;

use api::routes::sagas::AppState;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

type TestState = Arc<AppState<InMemorySagaLogStore, InMemoryServiceGateway>>;

fn setup_with_state() -> (axum::Router, TestState) {
    let log = InMemorySagaLogStore::new();
    let gateway = InMemoryServiceGateway::new();
    let state = api::create_state(log, gateway, ServiceEndpoints::default());
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn setup() -> axum::Router {
    setup_with_state().0
}

/// Scripts successful responses for every step of the registration saga.
fn script_happy_path(gateway: &InMemoryServiceGateway) {
    gateway.respond_with("/contents", json!({"id": uuid::Uuid::new_v4().to_string()}));
    gateway.respond_with("/affiliates", json!({"id": uuid::Uuid::new_v4().to_string()}));
    gateway.respond_with(
        "/collaborations",
        json!({"id": uuid::Uuid::new_v4().to_string()}),
    );
}

fn registration_input() -> serde_json::Value {
    json!({
        "affiliate_name": "Dana",
        "affiliate_email": "dana@example.com",
    })
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn post_json(
    app: &axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Polls the status endpoint until the saga reaches COMPLETED or FAILED.
async fn wait_for_terminal(app: &axum::Router, saga_id: &str) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = get_json(app, &format!("/sagas/{saga_id}/status")).await;
        assert_eq!(status, StatusCode::OK);
        let saga_status = body["status"].as_str().unwrap().to_string();
        if saga_status == "COMPLETED" || saga_status == "FAILED" {
            return body;
        }
        if Instant::now() > deadline {
            panic!("saga {saga_id} never reached a terminal status ({saga_status})");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn step_names(status_body: &serde_json::Value) -> Vec<String> {
    status_body["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["step_name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_start_saga_and_track_to_completion() {
    let (app, state) = setup_with_state();
    script_happy_path(&state.gateway);

    let (status, body) = post_json(
        &app,
        "/sagas/CompleteAffiliateRegistration",
        registration_input(),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["saga_type"], "CompleteAffiliateRegistration");
    assert_eq!(body["status"], "STARTED");
    let saga_id = body["saga_id"].as_str().unwrap().to_string();
    assert_eq!(
        body["tracking_url"],
        format!("/sagas/{saga_id}/status")
    );

    let final_body = wait_for_terminal(&app, &saga_id).await;
    assert_eq!(final_body["status"], "COMPLETED");
    assert_eq!(
        step_names(&final_body),
        vec![
            "create_base_content",
            "create_affiliate",
            "create_collaboration",
            "register_metrics",
            "saga_completed_final",
        ]
    );
    assert!(final_body["correlation_id"].as_str().is_some());
    assert!(final_body["created_at"].as_str().is_some());
}

#[tokio::test]
async fn test_start_unknown_saga_type_returns_404() {
    let app = setup();

    let (status, body) = post_json(&app, "/sagas/NoSuchSaga", registration_input()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("NoSuchSaga"));
}

#[tokio::test]
async fn test_start_with_missing_required_field_returns_400() {
    let app = setup();

    let (status, body) = post_json(
        &app,
        "/sagas/CompleteAffiliateRegistration",
        json!({"affiliate_name": "Dana"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("affiliate_email")
    );
}

#[tokio::test]
async fn test_status_for_unknown_saga_returns_404() {
    let app = setup();
    let fake_id = uuid::Uuid::new_v4();

    let (status, _) = get_json(&app, &format!("/sagas/{fake_id}/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_with_malformed_id_returns_400() {
    let app = setup();

    let (status, _) = get_json(&app, "/sagas/not-a-uuid/status").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failed_saga_reports_compensation_steps() {
    let (app, state) = setup_with_state();
    script_happy_path(&state.gateway);
    state.gateway.fail_with(
        "/collaborations",
        GatewayError::Timeout {
            url: "http://localhost:8003/collaborations".to_string(),
        },
    );

    let (status, body) = post_json(
        &app,
        "/sagas/CompleteAffiliateRegistration",
        registration_input(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let saga_id = body["saga_id"].as_str().unwrap().to_string();

    let final_body = wait_for_terminal(&app, &saga_id).await;
    assert_eq!(final_body["status"], "FAILED");

    let names = step_names(&final_body);
    assert!(names.contains(&"saga_compensation_started".to_string()));
    assert!(names.contains(&"compensate_create_affiliate".to_string()));
    assert!(names.contains(&"compensate_create_content".to_string()));

    let failed_step = final_body["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["step_name"] == "create_collaboration")
        .unwrap();
    assert_eq!(failed_step["status"], "FAILED");
    assert!(failed_step["error_message"].as_str().is_some());
}

#[tokio::test]
async fn test_list_sagas_with_filters() {
    let (app, state) = setup_with_state();
    script_happy_path(&state.gateway);

    let (_, first) = post_json(
        &app,
        "/sagas/CompleteAffiliateRegistration",
        registration_input(),
    )
    .await;
    let first_id = first["saga_id"].as_str().unwrap().to_string();
    wait_for_terminal(&app, &first_id).await;

    state.gateway.fail_with(
        "/collaborations",
        GatewayError::Timeout {
            url: "http://localhost:8003/collaborations".to_string(),
        },
    );
    let (_, second) = post_json(
        &app,
        "/sagas/CompleteAffiliateRegistration",
        registration_input(),
    )
    .await;
    let second_id = second["saga_id"].as_str().unwrap().to_string();
    wait_for_terminal(&app, &second_id).await;

    let (status, body) = get_json(&app, "/sagas").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    // Newest first.
    assert_eq!(body["sagas"][0]["saga_id"], second_id.as_str());
    assert_eq!(body["sagas"][1]["saga_id"], first_id.as_str());

    let (_, completed_only) = get_json(&app, "/sagas?status=COMPLETED").await;
    assert_eq!(completed_only["total"], 1);
    assert_eq!(completed_only["sagas"][0]["saga_id"], first_id.as_str());

    let (_, limited) = get_json(&app, "/sagas?limit=1").await;
    assert_eq!(limited["total"], 1);

    let (status, _) = get_json(&app, "/sagas?status=NOT_A_STATUS").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_statistics_reflect_finished_sagas() {
    let (app, state) = setup_with_state();
    script_happy_path(&state.gateway);

    let (_, started) = post_json(
        &app,
        "/sagas/CompleteAffiliateRegistration",
        registration_input(),
    )
    .await;
    wait_for_terminal(&app, started["saga_id"].as_str().unwrap()).await;

    let (status, body) = get_json(&app, "/sagas/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_sagas"], 1);
    assert_eq!(body["by_status"]["COMPLETED"], 1);
    assert_eq!(body["by_type"]["CompleteAffiliateRegistration"], 1);
    assert!(body["generated_at"].as_str().is_some());
}

#[tokio::test]
async fn test_compensate_completed_saga_returns_409() {
    let (app, state) = setup_with_state();
    script_happy_path(&state.gateway);

    let (_, started) = post_json(
        &app,
        "/sagas/CompleteAffiliateRegistration",
        registration_input(),
    )
    .await;
    let saga_id = started["saga_id"].as_str().unwrap().to_string();
    wait_for_terminal(&app, &saga_id).await;

    let (status, body) = post_json(&app, &format!("/sagas/{saga_id}/compensate"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("COMPLETED"));
}

#[tokio::test]
async fn test_compensate_unknown_or_malformed_saga_id() {
    let app = setup();

    let fake_id = uuid::Uuid::new_v4();
    let (status, _) = post_json(&app, &format!("/sagas/{fake_id}/compensate"), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_json(&app, "/sagas/not-a-uuid/compensate", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_compensate_stuck_saga_undoes_completed_steps() {
    let (app, state) = setup_with_state();
    let content_id = uuid::Uuid::new_v4().to_string();

    // A saga that logged one completed step and then went silent, as if the
    // process died before the next step.
    let saga_id = SagaId::new();
    let mut metadata = serde_json::Map::new();
    metadata.insert("input".to_string(), registration_input());
    state
        .log
        .start(
            saga_id,
            "CompleteAffiliateRegistration",
            CorrelationId::new(),
            metadata,
        )
        .await
        .unwrap();
    state
        .log
        .append_step(
            saga_id,
            SagaStep::completed("create_base_content", json!({"id": content_id}))
                .with_compensation_data(json!({"content_id": content_id})),
        )
        .await
        .unwrap();

    let (status, body) = post_json(&app, &format!("/sagas/{saga_id}/compensate"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saga_id"], saga_id.to_string());
    assert_eq!(
        body["compensated_steps"],
        json!(["compensate_create_content"])
    );

    let undo = state
        .gateway
        .calls()
        .into_iter()
        .find(|c| c.method == HttpMethod::Delete)
        .expect("no delete call recorded");
    assert!(undo.url.ends_with(&format!("/contents/{content_id}")));

    // Compensating again finds nothing left to undo.
    let (status, body) = post_json(&app, &format!("/sagas/{saga_id}/compensate"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["compensated_steps"], json!([]));

    let (_, final_body) = get_json(&app, &format!("/sagas/{saga_id}/status")).await;
    assert_eq!(final_body["status"], "FAILED");
}

#[tokio::test]
async fn test_services_status_reports_probed_services() {
    let (app, _state) = setup_with_state();

    let (status, body) = get_json(&app, "/services/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    for name in ["content", "affiliate", "collaboration", "monitoring"] {
        assert_eq!(body["services"][name]["healthy"], true);
    }
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    let app = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}
