//! Constraint-based admission decision engine
//!
//! For each admission request:
//! 1. Load the shield config and the ManifestIntegrityProfile constraints
//! 2. Match every constraint against the request (`matcher`)
//! 3. Verify matched constraints through the selected backend (`dispatch`),
//!    suppressing insignificant UPDATE mutations (`mutation`)
//! 4. Fold the per-constraint results into one decision (`accumulate`)
//!
//! Internal failures never propagate to the API server; they are converted
//! into decisions by the [`FailurePolicy`].

pub mod accumulate;
pub mod dispatch;
pub mod error;
pub mod glob;
pub mod matcher;
pub mod mutation;
pub mod orchestrator;
pub mod request;
pub mod store;
pub mod verifier;

pub use accumulate::{AccumulatedResult, ConstraintResult, ERROR_ALLOW_MESSAGE, accumulate};
pub use dispatch::{LocalBackend, RemoteBackend, VerificationBackend, VerificationDispatcher};
pub use error::{DispatchError, FailurePolicy, KeyError, StoreError};
pub use orchestrator::{AdmissionDecision, AdmissionDecisionOrchestrator};
pub use request::{GroupVersionKind, Operation, Request};
pub use store::{
    ConfigStore, ConstraintStore, KeyLoader, KubeConfigStore, KubeConstraintStore,
    SecretKeyLoader, StaticConfigStore, StaticConstraintStore,
};
pub use verifier::{UnconfiguredVerifier, VerificationResult, Verifier, VerifyError};
