//! Webhook HTTP server handlers
//!
//! Implements the ValidatingAdmissionWebhook endpoint that runs every
//! create/update request through the admission decision engine.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::admission::{AdmissionDecision, AdmissionDecisionOrchestrator, Operation, Request};

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub request: Option<Request>,
}

/// AdmissionReview response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared state for webhook handlers
pub(crate) struct WebhookState {
    pub orchestrator: AdmissionDecisionOrchestrator,
}

impl WebhookState {
    pub fn new(orchestrator: AdmissionDecisionOrchestrator) -> Self {
        Self { orchestrator }
    }
}

/// Create the webhook router
pub fn create_webhook_router(orchestrator: AdmissionDecisionOrchestrator) -> Router {
    let state = Arc::new(WebhookState::new(orchestrator));
    Router::new()
        .route("/validate-resource", post(validate_resource))
        .with_state(state)
}

/// Admission webhook handler for signed resources
pub(crate) async fn validate_resource(
    State(state): State<Arc<WebhookState>>,
    payload: Result<Json<AdmissionReview>, JsonRejection>,
) -> impl IntoResponse {
    let review = match payload {
        Ok(Json(review)) => review,
        Err(e) => {
            error!(error = %e, "Failed to parse admission review");
            return (
                StatusCode::BAD_REQUEST,
                Json(create_response(
                    "",
                    &AdmissionDecision::Denied(format!("Invalid AdmissionReview: {}", e.body_text())),
                )),
            );
        }
    };

    let request = match review.request {
        Some(req) => req,
        None => {
            error!("Admission review missing request");
            return (
                StatusCode::BAD_REQUEST,
                Json(create_response(
                    "",
                    &AdmissionDecision::Denied("Missing request in AdmissionReview".to_string()),
                )),
            );
        }
    };

    let uid = request.uid.clone();
    info!(
        uid = %uid,
        kind = %request.kind.kind,
        operation = %request.operation,
        namespace = %request.namespace(),
        name = %request.name(),
        user = %request.username(),
        "Processing admission request"
    );

    // Only CREATE and UPDATE carry a manifest to verify
    if matches!(request.operation, Operation::Delete | Operation::Connect) {
        debug!(uid = %uid, "Operation is not verified, allowing");
        return (
            StatusCode::OK,
            Json(create_response(
                &uid,
                &AdmissionDecision::Allowed(String::new()),
            )),
        );
    }

    let decision = state.orchestrator.decide(&request).await;
    (StatusCode::OK, Json(create_response(&uid, &decision)))
}

/// Create an AdmissionReview response
pub(crate) fn create_response(uid: &str, decision: &AdmissionDecision) -> AdmissionReviewResponse {
    let (allowed, code, reason) = match decision {
        AdmissionDecision::Allowed(_) => (true, 200, None),
        AdmissionDecision::Denied(_) => (false, 403, Some("Forbidden".to_string())),
    };

    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed,
            status: Some(AdmissionStatus {
                code,
                message: decision.message().to_string(),
                reason,
            }),
        },
    }
}

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/run/secrets/tls/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/run/secrets/tls/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8443;

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:8443 and serves the /validate-resource endpoint.
///
/// # Arguments
/// * `orchestrator` - Decision engine for admission requests
/// * `cert_path` - Path to TLS certificate file (PEM format)
/// * `key_path` - Path to TLS private key file (PEM format)
pub async fn run_webhook_server(
    orchestrator: AdmissionDecisionOrchestrator,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router(orchestrator);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Webhook server error: {0}")]
    Server(String),
}
