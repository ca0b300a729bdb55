//! Remote verification backend tests against a local request handler

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use integrity_shield::admission::{
    ConstraintResult, FailurePolicy, RemoteBackend, VerificationDispatcher,
};
use integrity_shield::config::CommonProfile;

use crate::common::*;

type Captured = Arc<Mutex<Option<Value>>>;

/// Serve `router` on an ephemeral port and return the handler URL
async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/api/request", addr)
}

fn dispatcher(url: &str, timeout: Duration, policy: FailurePolicy) -> VerificationDispatcher {
    install_crypto_provider();
    let backend = RemoteBackend::new(url, timeout).unwrap();
    VerificationDispatcher::new(Arc::new(backend), policy)
}

async fn answering(status: StatusCode, body: &'static str) -> String {
    let router = Router::new().route(
        "/api/request",
        post(move || async move { (status, body).into_response() }),
    );
    serve(router).await
}

#[tokio::test]
async fn test_remote_result_is_returned() {
    let captured: Captured = Arc::new(Mutex::new(None));
    let router = Router::new()
        .route(
            "/api/request",
            post(
                |State(captured): State<Captured>, Json(body): Json<Value>| async move {
                    *captured.lock().unwrap() = Some(body);
                    Json(json!({
                        "Allow": true,
                        "Message": "signed by a valid signer: alice@example.com",
                    }))
                },
            ),
        )
        .with_state(captured.clone());
    let url = serve(router).await;

    let parameters = ConstraintBuilder::new()
        .image_ref("registry.example.com/manifests:v1")
        .signers(&["alice@example.com"])
        .build()
        .parameters;
    let request = create_request(configmap("default", "app"));

    let result = dispatcher(&url, Duration::from_secs(5), FailurePolicy::Closed)
        .dispatch(&request, &parameters, &CommonProfile::default())
        .await;

    assert_eq!(
        result,
        ConstraintResult::allow("signed by a valid signer: alice@example.com")
    );

    let body = captured.lock().unwrap().clone().expect("handler was called");
    assert_eq!(body["request"]["uid"], request.uid.as_str());
    assert_eq!(body["request"]["operation"], "CREATE");
    assert_eq!(body["request"]["kind"]["kind"], "ConfigMap");
    assert_eq!(body["request"]["object"]["metadata"]["name"], "app");
    assert_eq!(
        body["parameters"]["imageRef"],
        "registry.example.com/manifests:v1"
    );
    assert_eq!(body["parameters"]["signers"][0], "alice@example.com");
}

#[tokio::test]
async fn test_remote_denial_is_returned() {
    let url = answering(
        StatusCode::OK,
        r#"{"Allow": false, "Message": "no signature found"}"#,
    )
    .await;

    let result = dispatcher(&url, Duration::from_secs(5), FailurePolicy::Open)
        .dispatch(
            &create_request(configmap("default", "app")),
            &empty_parameters(),
            &CommonProfile::default(),
        )
        .await;

    assert_eq!(result, ConstraintResult::deny("no signature found"));
}

#[tokio::test]
async fn test_non_ok_status_is_allowed_when_open() {
    let url = answering(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;

    let result = dispatcher(&url, Duration::from_secs(5), FailurePolicy::Open)
        .dispatch(
            &create_request(configmap("default", "app")),
            &empty_parameters(),
            &CommonProfile::default(),
        )
        .await;

    assert_eq!(
        result,
        ConstraintResult::allow("error but allow for development")
    );
}

#[tokio::test]
async fn test_non_ok_status_is_denied_when_closed() {
    let url = answering(StatusCode::BAD_GATEWAY, "").await;

    let result = dispatcher(&url, Duration::from_secs(5), FailurePolicy::Closed)
        .dispatch(
            &create_request(configmap("default", "app")),
            &empty_parameters(),
            &CommonProfile::default(),
        )
        .await;

    assert_eq!(
        result,
        ConstraintResult::deny("error and deny: remote request handler returned status 502")
    );
}

#[tokio::test]
async fn test_malformed_body_is_allowed_when_open() {
    let url = answering(StatusCode::OK, "not json").await;

    let result = dispatcher(&url, Duration::from_secs(5), FailurePolicy::Open)
        .dispatch(
            &create_request(configmap("default", "app")),
            &empty_parameters(),
            &CommonProfile::default(),
        )
        .await;

    assert_eq!(
        result,
        ConstraintResult::allow("error but allow for development")
    );
}

#[tokio::test]
async fn test_unreachable_handler_is_allowed_when_open() {
    // Reserve a port, then close it so nothing is listening
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = format!("http://{}/api/request", addr);

    let result = dispatcher(&url, Duration::from_secs(5), FailurePolicy::Open)
        .dispatch(
            &create_request(configmap("default", "app")),
            &empty_parameters(),
            &CommonProfile::default(),
        )
        .await;

    assert_eq!(
        result,
        ConstraintResult::allow("error but allow for development")
    );
}

#[tokio::test]
async fn test_slow_handler_times_out() {
    let router = Router::new().route(
        "/api/request",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"Allow": false, "Message": "too late"}))
        }),
    );
    let url = serve(router).await;

    let result = dispatcher(&url, Duration::from_millis(100), FailurePolicy::Closed)
        .dispatch(
            &create_request(configmap("default", "app")),
            &empty_parameters(),
            &CommonProfile::default(),
        )
        .await;

    assert!(!result.allow);
    assert!(result.message.starts_with("error and deny: remote request handler unreachable"));
}
