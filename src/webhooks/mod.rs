//! Admission webhook for signed-manifest enforcement
//!
//! Exposes a ValidatingAdmissionWebhook endpoint over TLS. Every CREATE and
//! UPDATE request is decided by the [`AdmissionDecisionOrchestrator`].
//!
//! [`AdmissionDecisionOrchestrator`]: crate::admission::AdmissionDecisionOrchestrator

mod server;

pub use server::{
    AdmissionResponse, AdmissionReview, AdmissionReviewResponse, AdmissionStatus,
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, create_webhook_router,
    run_webhook_server,
};
