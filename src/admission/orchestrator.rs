//! Admission decision orchestration
//!
//! Sequences one admission request through config loading, constraint
//! matching, verification and accumulation.

use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, stream};
use tracing::{error, info};

use super::accumulate::{ConstraintResult, accumulate};
use super::dispatch::{VerificationDispatcher, failure_result};
use super::matcher::{matches, resolve};
use super::request::Request;
use super::store::{ConfigStore, ConstraintStore};
use crate::config::{CommonProfile, DEFAULT_MAX_CONCURRENT_CONSTRAINTS, ShieldConfig};
use crate::crd::ManifestIntegrityProfileSpec;
use crate::health::Metrics;

pub const NAMESPACE_OUT_OF_SCOPE_MESSAGE: &str = "this namespace is out of scope";
pub const KIND_OUT_OF_SCOPE_MESSAGE: &str = "this kind is out of scope";

/// Final admission decision with its message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed(String),
    Denied(String),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed(_))
    }

    pub fn message(&self) -> &str {
        match self {
            AdmissionDecision::Allowed(m) | AdmissionDecision::Denied(m) => m,
        }
    }

    fn from_result(result: ConstraintResult) -> Self {
        if result.allow {
            AdmissionDecision::Allowed(result.message)
        } else {
            AdmissionDecision::Denied(result.message)
        }
    }
}

/// Decides admission requests against the current constraint set
#[derive(Clone)]
pub struct AdmissionDecisionOrchestrator {
    constraints: Arc<dyn ConstraintStore>,
    config: Arc<dyn ConfigStore>,
    dispatcher: VerificationDispatcher,
    max_concurrent_constraints: usize,
    metrics: Option<Arc<Metrics>>,
}

impl AdmissionDecisionOrchestrator {
    pub fn new(
        constraints: Arc<dyn ConstraintStore>,
        config: Arc<dyn ConfigStore>,
        dispatcher: VerificationDispatcher,
    ) -> Self {
        Self {
            constraints,
            config,
            dispatcher,
            max_concurrent_constraints: DEFAULT_MAX_CONCURRENT_CONSTRAINTS,
            metrics: None,
        }
    }

    pub fn with_max_concurrent_constraints(mut self, limit: usize) -> Self {
        self.max_concurrent_constraints = limit.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Decide one admission request. Never fails.
    ///
    /// Dropping the returned future abandons in-flight verifications for the request.
    pub async fn decide(&self, request: &Request) -> AdmissionDecision {
        let start = Instant::now();
        let decision = self.evaluate(request).await;

        info!(
            uid = %request.uid,
            kind = %request.kind.kind,
            name = %request.name(),
            namespace = %request.namespace(),
            operation = %request.operation,
            allowed = decision.is_allowed(),
            message = %decision.message(),
            "Admission decision"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(decision.is_allowed(), start.elapsed().as_secs_f64());
        }

        decision
    }

    async fn evaluate(&self, request: &Request) -> AdmissionDecision {
        let policy = self.dispatcher.failure_policy();

        let config = match self.config.load().await {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                error!(uid = %request.uid, error = %e, "Failed to load shield config");
                return AdmissionDecision::from_result(failure_result(policy, &e));
            }
        };

        if let Some(decision) = gate(&config, request) {
            return decision;
        }

        let constraints = match self.constraints.list().await {
            Ok(constraints) => constraints,
            Err(e) => {
                error!(uid = %request.uid, error = %e, "Failed to load constraints");
                return AdmissionDecision::from_result(failure_result(policy, &e));
            }
        };

        let profile = &config.common_profile;
        let pending: Vec<_> = constraints
            .iter()
            .map(|constraint| self.evaluate_constraint(request, constraint, profile))
            .collect();
        // `buffered` keeps results in constraint order
        let results: Vec<ConstraintResult> = stream::iter(pending)
            .buffered(self.max_concurrent_constraints)
            .collect()
            .await;

        if let Some(metrics) = &self.metrics {
            for result in &results {
                metrics.record_constraint_result(result.allow);
            }
        }

        let accumulated = accumulate(&results);
        if accumulated.allow {
            AdmissionDecision::Allowed(accumulated.message)
        } else {
            AdmissionDecision::Denied(accumulated.message)
        }
    }

    /// Result of one constraint; unmatched constraints are not protected
    async fn evaluate_constraint(
        &self,
        request: &Request,
        constraint: &ManifestIntegrityProfileSpec,
        profile: &CommonProfile,
    ) -> ConstraintResult {
        if !matches(request, &constraint.match_condition) {
            return ConstraintResult::not_protected();
        }
        let parameters = resolve(constraint);
        self.dispatcher.dispatch(request, parameters, profile).await
    }
}

/// Namespace and kind gates from the shield config
fn gate(config: &ShieldConfig, request: &Request) -> Option<AdmissionDecision> {
    if !config
        .in_scope_namespace_selector
        .matches(request.namespace())
    {
        return Some(AdmissionDecision::Allowed(
            NAMESPACE_OUT_OF_SCOPE_MESSAGE.to_string(),
        ));
    }
    if config.is_kind_allowed(&request.kind.kind) {
        return Some(AdmissionDecision::Allowed(
            KIND_OUT_OF_SCOPE_MESSAGE.to_string(),
        ));
    }
    None
}
