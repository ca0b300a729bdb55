//! Mutation detection for UPDATE requests
//!
//! Kubernetes rewrites bookkeeping fields on every write, so a raw old/new
//! comparison would report changes nobody made. Both objects are masked with
//! [`MUTATION_MASK`] before diffing, and the remaining changes can be ignored
//! through ignore-field bindings.
//!
//! Field paths are dotted (`spec.template.metadata.labels`). Object keys that
//! contain a dot are double-quoted (`metadata.annotations."app.kubernetes.io/name"`)
//! and array elements use their index (`spec.containers.0.image`).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::glob::match_any;
use crate::crd::{ObjectFieldBinding, matched_fields};

/// Paths removed from both objects before they are compared
pub const MUTATION_MASK: &[&str] = &[
    "metadata.annotations.namespace",
    "metadata.annotations.\"kubectl.kubernetes.io/last-applied-configuration\"",
    "metadata.annotations.\"deprecated.daemonset.template.generation\"",
    "metadata.creationTimestamp",
    "metadata.uid",
    "metadata.generation",
    "metadata.managedFields",
    "metadata.selfLink",
    "metadata.resourceVersion",
    "status",
];

/// One changed field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DiffItem {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

/// Structural difference between two object states, ordered by field path
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectDiff {
    #[serde(default)]
    pub items: Vec<DiffItem>,
}

impl ObjectDiff {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.key.as_str())
    }
}

impl fmt::Display for ObjectDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

/// Masked diff between the old and new state of an object
pub fn mutation_diff(old: &Value, new: &Value) -> ObjectDiff {
    let old = masked_fields(old);
    let new = masked_fields(new);

    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();

    let items = keys
        .into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            (before != after).then(|| DiffItem {
                key: key.clone(),
                before: before.cloned(),
                after: after.cloned(),
            })
        })
        .collect();

    ObjectDiff { items }
}

/// `diff` without the items under [`MUTATION_MASK`] paths
pub fn mask_diff(diff: &ObjectDiff) -> ObjectDiff {
    ObjectDiff {
        items: diff
            .items
            .iter()
            .filter(|item| !is_masked(&item.key))
            .cloned()
            .collect(),
    }
}

/// Check whether the changes in `diff` can be ignored for `resource`
///
/// An empty diff is always suppressible. Otherwise every changed path must be
/// covered by a field pattern of at least one binding that applies to the
/// resource. The caller concatenates per-constraint and common bindings.
pub fn should_suppress(
    diff: &ObjectDiff,
    ignore_fields: &[ObjectFieldBinding],
    resource: &Value,
) -> bool {
    if diff.is_empty() {
        return true;
    }

    let Some(fields) = matched_fields(ignore_fields, resource) else {
        return false;
    };

    diff.keys().all(|key| match_any(&fields, key))
}

fn masked_fields(object: &Value) -> BTreeMap<String, Value> {
    let mut fields = BTreeMap::new();
    flatten_into(object, String::new(), &mut fields);
    fields.retain(|path, _| !is_masked(path));
    fields
}

fn is_masked(path: &str) -> bool {
    MUTATION_MASK.iter().any(|mask| {
        path == *mask
            || path
                .strip_prefix(mask)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

fn flatten_into(value: &Value, prefix: String, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(child, join_path(&prefix, &quote_segment(key)), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, join_path(&prefix, &index.to_string()), out);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}

fn quote_segment(key: &str) -> String {
    if key.contains('.') {
        format!("\"{}\"", key)
    } else {
        key.to_string()
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}
