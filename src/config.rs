//! Runtime configuration
//!
//! Two layers:
//! - [`Settings`]: process settings read once from the environment at startup
//! - [`ShieldConfig`]: the shield ConfigMap, re-read for every admission request

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admission::FailurePolicy;
use crate::admission::glob::match_any;
use crate::crd::{ObjectFieldBindingList, ObjectReferenceList, ObjectUserBindingList};

/// Namespace the webhook runs in when `POD_NAMESPACE` is unset
pub const DEFAULT_POD_NAMESPACE: &str = "k8s-manifest-sigstore";
/// ConfigMap holding the shield config
pub const DEFAULT_CONFIG_NAME: &str = "shield-config";
/// Key of the shield config inside the ConfigMap
pub const DEFAULT_CONFIG_KEY: &str = "config.yaml";
/// Remote request handler endpoint
pub const DEFAULT_REMOTE_HANDLER_URL: &str =
    "https://integrity-shield-api.k8s-manifest-sigstore.svc:8123/api/request";
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENT_CONSTRAINTS: usize = 4;
/// Directory where verification keys are written
pub const DEFAULT_KEY_DIR: &str = "/tmp";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Process settings
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub pod_namespace: String,
    pub config_name: String,
    pub config_key: String,
    /// Delegate verification to the remote request handler
    pub use_remote: bool,
    pub remote_url: String,
    pub remote_timeout: Duration,
    pub failure_policy: FailurePolicy,
    /// Upper bound on constraints verified concurrently for one request
    pub max_concurrent_constraints: usize,
    pub key_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pod_namespace: DEFAULT_POD_NAMESPACE.to_string(),
            config_name: DEFAULT_CONFIG_NAME.to_string(),
            config_key: DEFAULT_CONFIG_KEY.to_string(),
            use_remote: true,
            remote_url: DEFAULT_REMOTE_HANDLER_URL.to_string(),
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            failure_policy: FailurePolicy::Open,
            max_concurrent_constraints: DEFAULT_MAX_CONCURRENT_CONSTRAINTS,
            key_dir: PathBuf::from(DEFAULT_KEY_DIR),
        }
    }
}

impl Settings {
    /// Read settings from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        // Empty values count as unset
        let get = |var: &str| lookup(var).filter(|v| !v.is_empty());

        let use_remote = match get("USE_REMOTE_HANDLER") {
            Some(v) => parse_bool("USE_REMOTE_HANDLER", &v)?,
            None => defaults.use_remote,
        };

        let remote_timeout = match get("REMOTE_HANDLER_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("REMOTE_HANDLER_TIMEOUT_SECS", &v)?),
            None => defaults.remote_timeout,
        };

        let failure_policy = match get("FAILURE_POLICY") {
            Some(v) => v
                .parse::<FailurePolicy>()
                .map_err(|reason| ConfigError::InvalidValue {
                    var: "FAILURE_POLICY",
                    value: v.clone(),
                    reason,
                })?,
            None => defaults.failure_policy,
        };

        let max_concurrent_constraints = match get("MAX_CONCURRENT_CONSTRAINTS") {
            Some(v) => {
                let n: usize = parse_number("MAX_CONCURRENT_CONSTRAINTS", &v)?;
                if n == 0 {
                    return Err(ConfigError::InvalidValue {
                        var: "MAX_CONCURRENT_CONSTRAINTS",
                        value: v,
                        reason: "must be at least 1".to_string(),
                    });
                }
                n
            }
            None => defaults.max_concurrent_constraints,
        };

        Ok(Self {
            pod_namespace: get("POD_NAMESPACE").unwrap_or(defaults.pod_namespace),
            config_name: get("SHIELD_CONFIG_NAME").unwrap_or(defaults.config_name),
            config_key: get("SHIELD_CONFIG_KEY").unwrap_or(defaults.config_key),
            use_remote,
            remote_url: get("REMOTE_HANDLER_URL").unwrap_or(defaults.remote_url),
            remote_timeout,
            failure_policy,
            max_concurrent_constraints,
            key_dir: get("KEY_DIR").map(PathBuf::from).unwrap_or(defaults.key_dir),
        })
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Ok(true),
        "0" | "f" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Shield config stored in the shield ConfigMap
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShieldConfig {
    /// Skip and ignore rules shared by every constraint
    #[serde(default)]
    pub common_profile: CommonProfile,

    /// Namespaces the webhook enforces at all
    #[serde(default)]
    pub in_scope_namespace_selector: NamespaceSelector,

    /// Kind patterns that are never enforced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
}

/// Rules applied on top of every constraint's parameters
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonProfile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_objects: ObjectReferenceList,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_users: ObjectUserBindingList,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_fields: ObjectFieldBindingList,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Included namespace patterns (empty includes every namespace)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Excluded namespace patterns, evaluated first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl NamespaceSelector {
    /// Cluster-scoped requests (empty namespace) are always in scope
    pub fn matches(&self, namespace: &str) -> bool {
        if namespace.is_empty() {
            return true;
        }
        if match_any(&self.exclude, namespace) {
            return false;
        }
        self.include.is_empty() || match_any(&self.include, namespace)
    }
}

impl ShieldConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn is_kind_allowed(&self, kind: &str) -> bool {
        match_any(&self.allow, kind)
    }
}
