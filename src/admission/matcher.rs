//! Constraint matching
//!
//! Decides whether a constraint applies to a request based on its namespace and
//! kind/group selectors.

use super::glob::match_any;
use super::request::Request;
use crate::crd::{KindSelector, ManifestIntegrityProfileSpec, MatchCondition, ParameterObject};

/// Check whether a match condition selects the request
///
/// Rules:
/// - An excluded namespace always vetoes the match
/// - Namespaces match when the list is empty, the request is cluster-scoped,
///   or any pattern matches
/// - Kinds match when the list is empty or any selector matches both kind and group
pub fn matches(request: &Request, condition: &MatchCondition) -> bool {
    let namespace = request.namespace();

    if match_any(&condition.excluded_namespaces, namespace) {
        return false;
    }

    let namespace_matched = condition.namespaces.is_empty()
        || namespace.is_empty()
        || match_any(&condition.namespaces, namespace);

    let kind_matched = condition.kinds.is_empty()
        || condition
            .kinds
            .iter()
            .any(|selector| selector_matches(selector, request));

    namespace_matched && kind_matched
}

fn selector_matches(selector: &KindSelector, request: &Request) -> bool {
    let kind = selector.kinds.is_empty() || match_any(&selector.kinds, &request.kind.kind);
    let group =
        selector.api_groups.is_empty() || match_any(&selector.api_groups, &request.kind.group);
    kind && group
}

/// Verification parameters of a constraint
pub fn resolve(constraint: &ManifestIntegrityProfileSpec) -> &ParameterObject {
    &constraint.parameters
}
