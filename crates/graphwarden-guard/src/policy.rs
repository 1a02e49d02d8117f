//! Permission tiers and their allow-lists.
//!
//! Each level owns the fragments of every level below it plus its own, so
//! allow-lists only ever grow with the level. The containment check is
//! textual: a fragment inside a string literal still counts.

use serde::Serialize;

use graphwarden_core::{OperationKind, PermissionLevel};

/// Read clauses and bare node creation.
const READ_FRAGMENTS: &[&str] = &[
    "MATCH",
    "OPTIONAL MATCH",
    "RETURN",
    "WITH",
    "UNWIND",
    "CREATE (",
];

/// Relationship creation and upsert.
const CONNECT_FRAGMENTS: &[&str] = &["CREATE", "MERGE", "-[", "]->"];

/// Property mutation.
const MUTATE_FRAGMENTS: &[&str] = &["SET"];

/// Outcome of checking one operation against a caller's level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub required_level: PermissionLevel,
    pub reason: String,
}

/// Every fragment a caller at `level` may use.
pub fn allow_list(level: PermissionLevel) -> Vec<&'static str> {
    let tiers: &[&[&str]] = match level {
        PermissionLevel::ReadOnly => &[READ_FRAGMENTS],
        PermissionLevel::Authenticated => &[READ_FRAGMENTS, CONNECT_FRAGMENTS],
        // Admin is reserved for schema operations and currently equals Elevated.
        PermissionLevel::Elevated | PermissionLevel::Admin => {
            &[READ_FRAGMENTS, CONNECT_FRAGMENTS, MUTATE_FRAGMENTS]
        }
    };
    tiers.iter().flat_map(|t| t.iter().copied()).collect()
}

/// Decide whether a caller at `level` may run `operation` with this text.
pub fn evaluate(
    operation: OperationKind,
    sanitized: &str,
    level: PermissionLevel,
) -> PolicyDecision {
    let required_level = operation.required_level();

    if operation == OperationKind::Forbidden {
        return PolicyDecision {
            allowed: false,
            required_level,
            reason: "forbidden operations are refused at every permission level".to_string(),
        };
    }

    if level < required_level {
        return PolicyDecision {
            allowed: false,
            required_level,
            reason: format!(
                "{operation} requires permission level {required_level}, caller has level {level}"
            ),
        };
    }

    let upper = sanitized.to_uppercase();
    match allow_list(level).into_iter().find(|f| upper.contains(f)) {
        Some(fragment) => PolicyDecision {
            allowed: true,
            required_level,
            reason: format!("allowed by '{fragment}' at level {level}"),
        },
        None => PolicyDecision {
            allowed: false,
            required_level,
            reason: format!("query contains no operation allowed at level {level}"),
        },
    }
}
