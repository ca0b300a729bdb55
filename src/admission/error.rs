//! Error types for the admission decision engine
//!
//! None of these reach the API server: every error is converted into an
//! admission decision according to the [`FailurePolicy`].

use std::str::FromStr;

use thiserror::Error;

use super::verifier::VerifyError;

/// Errors raised while loading constraints or configuration
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("`{key}` is not found in configmap `{namespace}/{name}`")]
    MissingConfigKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("failed to parse shield config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Errors raised while materializing a verification key
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("failed to get secret `{namespace}/{name}`: {source}")]
    Secret {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("no key files are found in the secret `{namespace}/{name}`")]
    Empty { namespace: String, name: String },

    #[error("failed to save secret data as a file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a verification backend
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("requested object is missing or malformed: {0}")]
    InvalidObject(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("remote request handler unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote request handler returned status {0}")]
    Status(u16),

    #[error("remote request handler returned a malformed body: {0}")]
    Body(#[from] serde_json::Error),
}

impl DispatchError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidObject(_) => "invalid_object",
            DispatchError::Key(_) => "key",
            DispatchError::Verify(_) => "verifier",
            DispatchError::Transport(_) => "transport",
            DispatchError::Status(_) => "status",
            DispatchError::Body(_) => "body",
        }
    }
}

/// How internal failures translate into admission decisions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Allow the request with the development sentinel message
    #[default]
    Open,
    /// Deny the request and report the error
    Closed,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "ignore" => Ok(FailurePolicy::Open),
            "closed" | "fail" => Ok(FailurePolicy::Closed),
            other => Err(format!("unknown failure policy `{}`", other)),
        }
    }
}
