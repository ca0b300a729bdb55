use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::admission::glob::{match_any, match_pattern};

/// ManifestIntegrityProfile binds a match condition to signature verification parameters.
///
/// Each profile is one constraint evaluated by the admission webhook.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "apis.integrityshield.io",
    version = "v1alpha1",
    kind = "ManifestIntegrityProfile",
    plural = "manifestintegrityprofiles",
    shortname = "mip",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIntegrityProfileSpec {
    /// Which requests this profile applies to
    #[serde(default, rename = "match")]
    pub match_condition: MatchCondition,

    /// Verification options for matched requests
    #[serde(default)]
    pub parameters: ParameterObject,
}

/// Namespace and kind selectors of a constraint
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchCondition {
    /// Kind/group selectors (empty matches every kind)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<KindSelector>,

    /// Namespace patterns (empty matches every namespace)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Namespace patterns that always veto a match
    #[serde(
        default,
        alias = "excludednamespaces",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub excluded_namespaces: Vec<String>,
}

/// One kind selector entry. Both lists default to "match everything" when empty.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
}

/// Verification parameters of a constraint
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterObject {
    #[serde(flatten)]
    pub verify_option: VerifyOption,

    /// Objects selected for verification (empty selects every object)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_scope_objects: ObjectReferenceList,

    /// Users whose requests bypass verification
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_users: ObjectUserBindingList,

    /// Secret holding the verification key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_secret_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_secret_namespace: String,

    /// OCI image reference holding the signed manifest
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_ref: String,
}

/// Options handed to the verifier
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOption {
    /// Fields that are not significant when comparing against the signed manifest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_fields: ObjectFieldBindingList,

    /// Accepted signer identities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signers: Vec<String>,
}

/// Selector over a resource's group, kind, namespace and name.
///
/// Every field is a wildcard pattern; an empty field matches anything.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ObjectReference {
    pub fn matches(&self, resource: &Value) -> bool {
        let id = ResourceIdentity::from_object(resource);
        field_matches(&self.group, &id.group)
            && field_matches(&self.kind, &id.kind)
            && field_matches(&self.namespace, &id.namespace)
            && field_matches(&self.name, &id.name)
    }
}

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern.is_empty() || match_pattern(pattern, value)
}

pub type ObjectReferenceList = Vec<ObjectReference>;

/// True if any reference in the list selects the resource. An empty list selects nothing.
pub fn references_match(references: &[ObjectReference], resource: &Value) -> bool {
    references.iter().any(|r| r.matches(resource))
}

/// Field patterns that apply to the selected objects
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFieldBinding {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,

    /// Objects this binding applies to (empty applies to every object)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: ObjectReferenceList,
}

impl ObjectFieldBinding {
    pub fn applies_to(&self, resource: &Value) -> bool {
        self.objects.is_empty() || references_match(&self.objects, resource)
    }
}

pub type ObjectFieldBindingList = Vec<ObjectFieldBinding>;

/// Union of the field patterns of every binding that applies to the resource.
///
/// Returns `None` when no binding applies.
pub fn matched_fields(bindings: &[ObjectFieldBinding], resource: &Value) -> Option<Vec<String>> {
    let mut matched = false;
    let mut fields = Vec::new();
    for binding in bindings.iter().filter(|b| b.applies_to(resource)) {
        matched = true;
        fields.extend(binding.fields.iter().cloned());
    }
    matched.then_some(fields)
}

/// Users exempted from verification for the selected objects
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUserBinding {
    /// Objects this binding applies to (empty applies to every object)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: ObjectReferenceList,

    /// Username patterns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
}

impl ObjectUserBinding {
    pub fn matches(&self, resource: &Value, username: &str) -> bool {
        (self.objects.is_empty() || references_match(&self.objects, resource))
            && match_any(&self.users, username)
    }
}

pub type ObjectUserBindingList = Vec<ObjectUserBinding>;

pub fn users_match(bindings: &[ObjectUserBinding], resource: &Value, username: &str) -> bool {
    bindings.iter().any(|b| b.matches(resource, username))
}

/// Group, kind, namespace and name read from a raw Kubernetes object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn from_object(resource: &Value) -> Self {
        let str_at = |pointer: &str| {
            resource
                .pointer(pointer)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let api_version = str_at("/apiVersion");
        // Core resources use a bare version ("v1") and belong to the empty group
        let group = match api_version.split_once('/') {
            Some((group, _)) => group.to_string(),
            None => String::new(),
        };

        Self {
            group,
            kind: str_at("/kind"),
            namespace: str_at("/metadata/namespace"),
            name: str_at("/metadata/name"),
        }
    }
}
