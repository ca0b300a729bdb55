//! Folding per-constraint results into one admission decision

use serde::{Deserialize, Serialize};

/// Sentinel message returned whenever an internal failure is allowed through
pub const ERROR_ALLOW_MESSAGE: &str = "error but allow for development";
/// Message for constraints that do not apply to the request
pub const NOT_PROTECTED_MESSAGE: &str = "not protected";

/// Decision of a single constraint
///
/// Field names on the wire are `Allow` and `Message`, as produced by the
/// remote request handler.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintResult {
    #[serde(rename = "Allow", alias = "allow")]
    pub allow: bool,
    #[serde(rename = "Message", alias = "message", default)]
    pub message: String,
}

impl ConstraintResult {
    pub fn allow(message: impl Into<String>) -> Self {
        Self {
            allow: true,
            message: message.into(),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allow: false,
            message: message.into(),
        }
    }

    pub fn not_protected() -> Self {
        Self::allow(NOT_PROTECTED_MESSAGE)
    }
}

/// Final decision over every constraint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccumulatedResult {
    pub allow: bool,
    pub message: String,
}

/// Merge constraint results in evaluation order
///
/// Any denial denies the request and only deny messages are reported.
/// Otherwise the request is allowed with every allow message. Messages are
/// joined with `;`.
pub fn accumulate(results: &[ConstraintResult]) -> AccumulatedResult {
    let (denied, allowed): (Vec<&ConstraintResult>, Vec<&ConstraintResult>) =
        results.iter().partition(|r| !r.allow);

    let join = |results: Vec<&ConstraintResult>| {
        results
            .iter()
            .map(|r| r.message.as_str())
            .collect::<Vec<_>>()
            .join(";")
    };

    if denied.is_empty() {
        AccumulatedResult {
            allow: true,
            message: join(allowed),
        }
    } else {
        AccumulatedResult {
            allow: false,
            message: join(denied),
        }
    }
}
