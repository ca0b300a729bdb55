//! Test fixtures and fakes for the admission decision engine
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let request = create_request(configmap("prod-payments", "app-config"));
//! let constraint = ConstraintBuilder::new().namespaces(&["prod-*"]).build();
//! let verifier = Arc::new(FakeVerifier::returning(VerificationResult::default()));
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::UserInfo;
use serde_json::{Value, json};

use integrity_shield::admission::{
    ConfigStore, ConstraintResult, ConstraintStore, DispatchError, GroupVersionKind, KeyError,
    KeyLoader, Operation, Request, StoreError, VerificationBackend, VerificationResult, Verifier,
    VerifyError,
};
use integrity_shield::config::{CommonProfile, ShieldConfig};
use integrity_shield::crd::{
    KindSelector, ManifestIntegrityProfileSpec, ObjectFieldBinding, ObjectReference,
    ObjectUserBinding, ParameterObject, VerifyOption,
};

// =============================================================================
// Resources and requests
// =============================================================================

/// A ConfigMap as it arrives in an admission request
pub fn configmap(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "1",
            "uid": "6a1c0f1e-0000-0000-0000-000000000001",
        },
        "data": {
            "key": "value",
        },
    })
}

/// A cluster-scoped ClusterRole
pub fn cluster_role(name: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRole",
        "metadata": {
            "name": name,
        },
        "rules": [],
    })
}

/// Build a request for `object`, reading kind, group, namespace and name from it
pub fn request_for(operation: Operation, object: Value, old_object: Option<Value>) -> Request {
    let str_at = |pointer: &str| {
        object
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let api_version = str_at("/apiVersion").unwrap_or_default();
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.clone()),
    };

    Request {
        uid: "705ab4f5-6393-11e8-b7cc-42010a800002".to_string(),
        kind: GroupVersionKind {
            group,
            version,
            kind: str_at("/kind").unwrap_or_default(),
        },
        namespace: str_at("/metadata/namespace"),
        name: str_at("/metadata/name"),
        operation,
        user_info: UserInfo {
            username: Some("alice@example.com".to_string()),
            ..Default::default()
        },
        object: Some(object),
        old_object,
    }
}

pub fn create_request(object: Value) -> Request {
    request_for(Operation::Create, object, None)
}

pub fn update_request(old_object: Value, object: Value) -> Request {
    request_for(Operation::Update, object, Some(old_object))
}

/// Same request issued by another user
pub fn as_user(mut request: Request, username: &str) -> Request {
    request.user_info.username = Some(username.to_string());
    request
}

// =============================================================================
// Constraints
// =============================================================================

/// Builder for ManifestIntegrityProfile specs
#[derive(Default)]
pub struct ConstraintBuilder {
    spec: ManifestIntegrityProfileSpec,
}

impl ConstraintBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespaces(mut self, patterns: &[&str]) -> Self {
        self.spec.match_condition.namespaces = strings(patterns);
        self
    }

    pub fn excluded_namespaces(mut self, patterns: &[&str]) -> Self {
        self.spec.match_condition.excluded_namespaces = strings(patterns);
        self
    }

    pub fn kinds(mut self, kinds: &[&str], api_groups: &[&str]) -> Self {
        self.spec.match_condition.kinds.push(KindSelector {
            kinds: strings(kinds),
            api_groups: strings(api_groups),
        });
        self
    }

    /// Distinguishes constraints in fake backends
    pub fn image_ref(mut self, image_ref: &str) -> Self {
        self.spec.parameters.image_ref = image_ref.to_string();
        self
    }

    pub fn key_secret(mut self, namespace: &str, name: &str) -> Self {
        self.spec.parameters.key_secret_namespace = namespace.to_string();
        self.spec.parameters.key_secret_name = name.to_string();
        self
    }

    pub fn signers(mut self, signers: &[&str]) -> Self {
        self.spec.parameters.verify_option.signers = strings(signers);
        self
    }

    pub fn ignore_fields(mut self, fields: &[&str]) -> Self {
        self.spec
            .parameters
            .verify_option
            .ignore_fields
            .push(field_binding(fields, vec![]));
        self
    }

    pub fn in_scope(mut self, reference: ObjectReference) -> Self {
        self.spec.parameters.in_scope_objects.push(reference);
        self
    }

    pub fn skip_users(mut self, users: &[&str]) -> Self {
        self.spec.parameters.skip_users.push(ObjectUserBinding {
            objects: vec![],
            users: strings(users),
        });
        self
    }

    pub fn build(self) -> ManifestIntegrityProfileSpec {
        self.spec
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn object_ref(kind: &str, namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        group: String::new(),
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

pub fn field_binding(fields: &[&str], objects: Vec<ObjectReference>) -> ObjectFieldBinding {
    ObjectFieldBinding {
        fields: strings(fields),
        objects,
    }
}

pub fn empty_parameters() -> ParameterObject {
    ParameterObject::default()
}

// =============================================================================
// Verification outcomes
// =============================================================================

pub fn verified(signer: &str) -> VerificationResult {
    VerificationResult {
        in_scope: true,
        verified: true,
        signer: signer.to_string(),
        diff: None,
    }
}

pub fn unsigned() -> VerificationResult {
    VerificationResult {
        in_scope: true,
        ..Default::default()
    }
}

// =============================================================================
// Fakes
// =============================================================================

/// Verifier returning a fixed outcome and recording what it was called with
pub struct FakeVerifier {
    outcome: Option<VerificationResult>,
    calls: AtomicUsize,
    last_key_path: Mutex<Option<PathBuf>>,
    last_option: Mutex<Option<VerifyOption>>,
}

impl FakeVerifier {
    pub fn returning(result: VerificationResult) -> Self {
        Self {
            outcome: Some(result),
            calls: AtomicUsize::new(0),
            last_key_path: Mutex::new(None),
            last_option: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: None,
            calls: AtomicUsize::new(0),
            last_key_path: Mutex::new(None),
            last_option: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_key_path(&self) -> Option<PathBuf> {
        self.last_key_path.lock().unwrap().clone()
    }

    pub fn last_option(&self) -> Option<VerifyOption> {
        self.last_option.lock().unwrap().clone()
    }
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn verify(
        &self,
        _resource: &Value,
        _image_ref: &str,
        key_path: Option<&Path>,
        option: &VerifyOption,
    ) -> Result<VerificationResult, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_key_path.lock().unwrap() = key_path.map(Path::to_path_buf);
        *self.last_option.lock().unwrap() = Some(option.clone());
        self.outcome
            .clone()
            .ok_or_else(|| VerifyError::Internal("signature backend unavailable".to_string()))
    }
}

/// Key loader that hands out a fixed path
pub struct FakeKeyLoader {
    path: Option<PathBuf>,
    requested: Mutex<Vec<(String, String)>>,
}

impl FakeKeyLoader {
    pub fn at(path: &str) -> Self {
        Self {
            path: Some(PathBuf::from(path)),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Every load fails as if the secret had no data
    pub fn empty() -> Self {
        Self {
            path: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<(String, String)> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyLoader for FakeKeyLoader {
    async fn load_key(&self, namespace: &str, name: &str) -> Result<PathBuf, KeyError> {
        self.requested
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string()));
        self.path.clone().ok_or_else(|| KeyError::Empty {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

/// Constraint store that always fails
pub struct FailingConstraintStore;

#[async_trait]
impl ConstraintStore for FailingConstraintStore {
    async fn list(&self) -> Result<Vec<ManifestIntegrityProfileSpec>, StoreError> {
        Err(missing_config_key())
    }
}

/// Config store that always fails
pub struct FailingConfigStore;

#[async_trait]
impl ConfigStore for FailingConfigStore {
    async fn load(&self) -> Result<Option<ShieldConfig>, StoreError> {
        Err(missing_config_key())
    }
}

fn missing_config_key() -> StoreError {
    StoreError::MissingConfigKey {
        namespace: "k8s-manifest-sigstore".to_string(),
        name: "shield-config".to_string(),
        key: "config.yaml".to_string(),
    }
}

/// Backend answering per constraint, keyed by the constraint's image ref.
///
/// Unknown image refs fail with a transport-like status error. An optional
/// per-key delay lets tests finish constraints out of order.
#[derive(Default)]
pub struct ScriptedBackend {
    results: HashMap<String, ConstraintResult>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, image_ref: &str, result: ConstraintResult) -> Self {
        self.results.insert(image_ref.to_string(), result);
        self
    }

    pub fn delay(mut self, image_ref: &str, delay: Duration) -> Self {
        self.delays.insert(image_ref.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationBackend for ScriptedBackend {
    async fn handle(
        &self,
        _request: &Request,
        parameters: &ParameterObject,
        _profile: &CommonProfile,
    ) -> Result<ConstraintResult, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&parameters.image_ref) {
            tokio::time::sleep(*delay).await;
        }
        self.results
            .get(&parameters.image_ref)
            .cloned()
            .ok_or(DispatchError::Status(503))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Install the process-wide rustls crypto provider, tolerating repeat calls
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
