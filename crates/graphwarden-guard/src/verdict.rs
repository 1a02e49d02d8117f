//! Pre-execution checks as values.
//!
//! Validation, policy, and complexity outcomes are returned as a
//! [`Verdict`] rather than raised, so a rejection is always seen by the
//! caller that asked.

use graphwarden_core::{OperationKind, PermissionLevel};

use crate::classifier::{classify, Classification};
use crate::error::GuardError;
use crate::policy::{self, PolicyDecision};

/// Why a query was refused before reaching the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    /// Empty text or a danger keyword.
    Blocked,
    /// Caller's level is too low or no allow-list fragment matched.
    Policy(PolicyDecision),
    /// A write scored above the complexity ceiling.
    Complexity { score: u8, ceiling: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub classification: Classification,
    pub level: PermissionLevel,
    pub reason: String,
}

impl From<Rejection> for GuardError {
    fn from(rejection: Rejection) -> Self {
        match rejection.kind {
            RejectionKind::Blocked => GuardError::Validation {
                reason: rejection.reason,
            },
            RejectionKind::Policy(decision) => GuardError::Policy {
                required: decision.required_level,
                current: rejection.level,
                reason: rejection.reason,
            },
            RejectionKind::Complexity { score, ceiling } => GuardError::Complexity { score, ceiling },
        }
    }
}

/// A query that passed every pre-execution check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub classification: Classification,
    pub decision: PolicyDecision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Accepted),
    Rejected(Rejection),
}

impl Verdict {
    pub fn classification(&self) -> &Classification {
        match self {
            Self::Accepted(a) => &a.classification,
            Self::Rejected(r) => &r.classification,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Classify, check policy, then check complexity.
pub fn assess(text: &str, level: PermissionLevel, complexity_ceiling: u8) -> Verdict {
    let classification = classify(text);

    if let Some(reason) = classification.blocked_reason.clone() {
        return Verdict::Rejected(Rejection {
            kind: RejectionKind::Blocked,
            classification,
            level,
            reason,
        });
    }

    let decision = policy::evaluate(classification.operation, &classification.sanitized, level);
    if !decision.allowed {
        return Verdict::Rejected(Rejection {
            reason: decision.reason.clone(),
            kind: RejectionKind::Policy(decision),
            classification,
            level,
        });
    }

    let score = classification.complexity_score;
    if classification.operation != OperationKind::Read && score > complexity_ceiling {
        return Verdict::Rejected(Rejection {
            kind: RejectionKind::Complexity {
                score,
                ceiling: complexity_ceiling,
            },
            reason: format!("complexity too high: {score} > {complexity_ceiling}"),
            classification,
            level,
        });
    }

    Verdict::Accepted(Accepted {
        classification,
        decision,
    })
}
