//! Signature verification capability
//!
//! The cryptographic check itself lives outside this crate. The engine only
//! needs the outcome: whether the object is protected, whether it verified,
//! who signed it and how it differs from the signed manifest.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::mutation::ObjectDiff;
use crate::crd::VerifyOption;

/// Outcome of verifying one resource
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub in_scope: bool,
    pub verified: bool,
    #[serde(default)]
    pub signer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<ObjectDiff>,
}

impl VerificationResult {
    /// Diff against the signed manifest, if it reports any change
    pub fn non_empty_diff(&self) -> Option<&ObjectDiff> {
        self.diff.as_ref().filter(|d| !d.is_empty())
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("verifier is not configured")]
    NotConfigured,

    #[error("verification failed: {0}")]
    Internal(String),
}

/// Verifies a resource against its signed manifest
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        resource: &Value,
        image_ref: &str,
        key_path: Option<&Path>,
        option: &VerifyOption,
    ) -> Result<VerificationResult, VerifyError>;
}

/// Verifier used when no in-process verification routine is linked in.
///
/// Every call errors, so requests follow the configured failure policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredVerifier;

#[async_trait]
impl Verifier for UnconfiguredVerifier {
    async fn verify(
        &self,
        _resource: &Value,
        _image_ref: &str,
        _key_path: Option<&Path>,
        _option: &VerifyOption,
    ) -> Result<VerificationResult, VerifyError> {
        Err(VerifyError::NotConfigured)
    }
}
