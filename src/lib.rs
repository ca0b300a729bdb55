pub mod admission;
pub mod config;
pub mod crd;
pub mod health;
pub mod webhooks;

pub use admission::{
    AdmissionDecision, AdmissionDecisionOrchestrator, ConstraintResult, DispatchError,
    FailurePolicy, Request, VerificationDispatcher,
};
pub use config::{ConfigError, Settings, ShieldConfig};
pub use crd::{ManifestIntegrityProfile, ManifestIntegrityProfileSpec};
pub use health::{HealthState, Metrics};
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::sync::Arc;

use kube::Client;

use admission::{
    KubeConfigStore, KubeConstraintStore, LocalBackend, RemoteBackend, SecretKeyLoader,
    UnconfiguredVerifier, VerificationBackend,
};

/// Build the admission decision engine backed by the cluster.
///
/// Verification is delegated to the remote request handler when
/// `settings.use_remote` is set. Otherwise a local backend is used, which
/// has no signature verifier wired in and therefore fails every verification
/// through the failure policy.
pub fn build_orchestrator(
    client: Client,
    settings: &Settings,
    metrics: Arc<Metrics>,
) -> Result<AdmissionDecisionOrchestrator, DispatchError> {
    let backend: Arc<dyn VerificationBackend> = if settings.use_remote {
        tracing::info!(url = %settings.remote_url, "Using remote verification backend");
        Arc::new(RemoteBackend::new(
            &settings.remote_url,
            settings.remote_timeout,
        )?)
    } else {
        tracing::info!("Using local verification backend");
        let keys = SecretKeyLoader::new(
            client.clone(),
            settings.key_dir.clone(),
            &settings.pod_namespace,
        );
        Arc::new(LocalBackend::new(
            Arc::new(UnconfiguredVerifier),
            Arc::new(keys),
        ))
    };

    let dispatcher = VerificationDispatcher::new(backend, settings.failure_policy)
        .with_metrics(metrics.clone());
    let constraints = Arc::new(KubeConstraintStore::new(client.clone()));
    let config = Arc::new(KubeConfigStore::new(
        client,
        &settings.pod_namespace,
        &settings.config_name,
        &settings.config_key,
    ));

    Ok(
        AdmissionDecisionOrchestrator::new(constraints, config, dispatcher)
            .with_max_concurrent_constraints(settings.max_concurrent_constraints)
            .with_metrics(metrics),
    )
}
