//! Verification dispatch
//!
//! A matched constraint is verified by one of two backends:
//! - [`LocalBackend`]: applies skip rules and calls the [`Verifier`] in-process
//! - [`RemoteBackend`]: posts the request and parameters to the remote request handler
//!
//! [`VerificationDispatcher`] wraps the selected backend and turns every backend
//! error into a decision through the [`FailurePolicy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info};

use super::accumulate::{ConstraintResult, ERROR_ALLOW_MESSAGE};
use super::error::{DispatchError, FailurePolicy};
use super::mutation::{mask_diff, mutation_diff, should_suppress};
use super::request::Request;
use super::store::KeyLoader;
use super::verifier::{VerificationResult, Verifier};
use crate::config::CommonProfile;
use crate::crd::{ParameterObject, VerifyOption, references_match, users_match};
use crate::health::Metrics;

pub const IGNORE_USER_MESSAGE: &str = "ignore user config matched";
pub const OUT_OF_SCOPE_MESSAGE: &str = "this resource is not in scope of verification";
pub const NO_MUTATION_MESSAGE: &str = "no mutation found";
pub const NO_SIGNATURE_MESSAGE: &str = "no signature found";

/// A strategy for verifying one matched constraint
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    async fn handle(
        &self,
        request: &Request,
        parameters: &ParameterObject,
        profile: &CommonProfile,
    ) -> Result<ConstraintResult, DispatchError>;

    /// Backend name used in logs
    fn name(&self) -> &'static str;
}

/// Applies the failure policy around a verification backend
#[derive(Clone)]
pub struct VerificationDispatcher {
    backend: Arc<dyn VerificationBackend>,
    failure_policy: FailurePolicy,
    metrics: Option<Arc<Metrics>>,
}

impl VerificationDispatcher {
    pub fn new(backend: Arc<dyn VerificationBackend>, failure_policy: FailurePolicy) -> Self {
        Self {
            backend,
            failure_policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Verify one constraint. Never fails: backend errors follow the failure policy.
    pub async fn dispatch(
        &self,
        request: &Request,
        parameters: &ParameterObject,
        profile: &CommonProfile,
    ) -> ConstraintResult {
        match self.backend.handle(request, parameters, profile).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    uid = %request.uid,
                    backend = self.backend.name(),
                    error = %e,
                    "Verification failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_verification_error(e.kind());
                }
                failure_result(self.failure_policy, &e)
            }
        }
    }
}

/// Decision reported when an internal failure prevents verification
pub fn failure_result(policy: FailurePolicy, error: &dyn std::fmt::Display) -> ConstraintResult {
    match policy {
        FailurePolicy::Open => ConstraintResult::allow(ERROR_ALLOW_MESSAGE),
        FailurePolicy::Closed => ConstraintResult::deny(format!("error and deny: {}", error)),
    }
}

/// Map a verification outcome to a constraint decision
pub fn decide(result: &VerificationResult) -> ConstraintResult {
    if !result.in_scope {
        return ConstraintResult::not_protected();
    }
    if result.verified {
        return ConstraintResult::allow(format!(
            "signed by a valid signer: {}",
            result.signer
        ));
    }
    if let Some(diff) = result.non_empty_diff() {
        return ConstraintResult::deny(format!("diff found: {}", diff));
    }
    if !result.signer.is_empty() {
        return ConstraintResult::deny(format!(
            "signer config not matched, this is signed by {}",
            result.signer
        ));
    }
    ConstraintResult::deny(NO_SIGNATURE_MESSAGE)
}

/// Verify option with the common profile's ignore fields appended
pub fn merged_verify_option(option: &VerifyOption, profile: &CommonProfile) -> VerifyOption {
    let mut merged = option.clone();
    merged
        .ignore_fields
        .extend(profile.ignore_fields.iter().cloned());
    merged
}

/// Verifies in-process
pub struct LocalBackend {
    verifier: Arc<dyn Verifier>,
    keys: Arc<dyn KeyLoader>,
}

impl LocalBackend {
    pub fn new(verifier: Arc<dyn Verifier>, keys: Arc<dyn KeyLoader>) -> Self {
        Self { verifier, keys }
    }
}

#[async_trait]
impl VerificationBackend for LocalBackend {
    async fn handle(
        &self,
        request: &Request,
        parameters: &ParameterObject,
        profile: &CommonProfile,
    ) -> Result<ConstraintResult, DispatchError> {
        let resource = request
            .object
            .as_ref()
            .filter(|o| o.is_object())
            .ok_or_else(|| DispatchError::InvalidObject("object is not a JSON object".into()))?;

        // Skip rules, in priority order
        let username = request.username();
        if users_match(&parameters.skip_users, resource, username)
            || users_match(&profile.skip_users, resource, username)
        {
            return Ok(ConstraintResult::allow(IGNORE_USER_MESSAGE));
        }
        if !parameters.in_scope_objects.is_empty()
            && !references_match(&parameters.in_scope_objects, resource)
        {
            return Ok(ConstraintResult::allow(OUT_OF_SCOPE_MESSAGE));
        }
        if references_match(&profile.skip_objects, resource) {
            return Ok(ConstraintResult::allow(OUT_OF_SCOPE_MESSAGE));
        }

        let key_path = if parameters.key_secret_name.is_empty() {
            None
        } else {
            Some(
                self.keys
                    .load_key(&parameters.key_secret_namespace, &parameters.key_secret_name)
                    .await?,
            )
        };

        let option = merged_verify_option(&parameters.verify_option, profile);
        let verification = self
            .verifier
            .verify(resource, &parameters.image_ref, key_path.as_deref(), &option)
            .await?;
        debug!(
            uid = %request.uid,
            in_scope = verification.in_scope,
            verified = verification.verified,
            signer = %verification.signer,
            "Verifier result"
        );

        let decision = decide(&verification);

        // An UPDATE that changes nothing significant is allowed even when unsigned.
        // A diff against the signed manifest takes precedence over the old object.
        if !decision.allow && request.is_update() {
            let mutation = match verification.non_empty_diff() {
                Some(diff) => Some(mask_diff(diff)),
                None => request
                    .old_object
                    .as_ref()
                    .map(|old| mutation_diff(old, resource)),
            };
            if let Some(diff) = mutation
                && should_suppress(&diff, &option.ignore_fields, resource)
            {
                info!(uid = %request.uid, "No significant mutation, allowing update");
                return Ok(ConstraintResult::allow(NO_MUTATION_MESSAGE));
            }
        }

        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Body posted to the remote request handler
#[derive(Serialize)]
struct RemoteHandlerInput<'a> {
    request: &'a Request,
    parameters: &'a ParameterObject,
}

/// Delegates verification to the remote request handler over HTTPS
pub struct RemoteBackend {
    client: reqwest::Client,
    url: String,
}

impl RemoteBackend {
    /// The handler's certificate is not validated; the cluster network is the trust boundary.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl VerificationBackend for RemoteBackend {
    async fn handle(
        &self,
        request: &Request,
        parameters: &ParameterObject,
        _profile: &CommonProfile,
    ) -> Result<ConstraintResult, DispatchError> {
        debug!(uid = %request.uid, url = %self.url, "Calling remote request handler");

        let response = self
            .client
            .post(&self.url)
            .json(&RemoteHandlerInput {
                request,
                parameters,
            })
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DispatchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let result: ConstraintResult = serde_json::from_slice(&body)?;
        debug!(uid = %request.uid, allow = result.allow, message = %result.message, "Remote request handler result");
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
