//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the webhook ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Port of the health server
pub const HEALTH_PORT: u16 = 8080;

/// Labels for admission decision metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    pub decision: String,
}

/// Labels for verification error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub reason: String,
}

/// Shared metrics state
pub struct Metrics {
    /// Admission requests by final decision
    pub admission_requests_total: Family<DecisionLabels, Counter>,
    /// Per-constraint results by decision
    pub constraint_results_total: Family<DecisionLabels, Counter>,
    /// Verification backend failures by reason
    pub verification_errors_total: Family<ErrorLabels, Counter>,
    /// Time to reach an admission decision
    pub decision_duration_seconds: Histogram,

    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let admission_requests_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "integrity_shield_admission_requests",
            "Total number of admission requests by decision",
            admission_requests_total.clone(),
        );

        let constraint_results_total = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "integrity_shield_constraint_results",
            "Total number of per-constraint results by decision",
            constraint_results_total.clone(),
        );

        let verification_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "integrity_shield_verification_errors",
            "Total number of verification backend errors",
            verification_errors_total.clone(),
        );

        let decision_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 15));
        registry.register(
            "integrity_shield_decision_duration_seconds",
            "Duration of admission decisions in seconds",
            decision_duration_seconds.clone(),
        );

        Self {
            admission_requests_total,
            constraint_results_total,
            verification_errors_total,
            decision_duration_seconds,
            registry,
        }
    }

    /// Record a final admission decision
    pub fn record_decision(&self, allowed: bool, duration_secs: f64) {
        self.admission_requests_total
            .get_or_create(&decision_labels(allowed))
            .inc();
        self.decision_duration_seconds.observe(duration_secs);
    }

    /// Record the result of one constraint
    pub fn record_constraint_result(&self, allowed: bool) {
        self.constraint_results_total
            .get_or_create(&decision_labels(allowed))
            .inc();
    }

    /// Record a verification backend failure
    pub fn record_verification_error(&self, reason: &str) {
        let labels = ErrorLabels {
            reason: reason.to_string(),
        };
        self.verification_errors_total.get_or_create(&labels).inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails (should never happen with valid metrics).
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

fn decision_labels(allowed: bool) -> DecisionLabels {
    DecisionLabels {
        decision: if allowed { "allow" } else { "deny" }.to_string(),
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the webhook is ready to serve admission requests
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Arc<Metrics>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Mark the webhook as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if ready, 503 Service Unavailable otherwise.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:8080 and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", HEALTH_PORT);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
