//! Core domain types shared by every graphwarden crate.
//!
//! A [`Query`] is the unit a caller submits; everything else here describes
//! how that query is classified, who may run it, and how risky it was.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Named query parameters. Ordered so that hashing and logging are stable.
pub type Params = BTreeMap<String, serde_json::Value>;

/// One result row, column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

// ── Query ─────────────────────────────────────────────────────────

/// An immutable query submitted for execution.
///
/// Built once with [`Query::new`] and [`Query::param`], then only read.
/// Trust decisions are never cached on it: every execution attempt
/// re-classifies the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    #[serde(default)]
    params: Params,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
        }
    }

    pub fn with_params(text: impl Into<String>, params: Params) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    /// Bind a named parameter.
    pub fn param(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

// ── Operation classes ─────────────────────────────────────────────

/// Lexical class of a query, in ascending order of risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Read,
    Create,
    Merge,
    Set,
    Forbidden,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Create => "CREATE",
            Self::Merge => "MERGE",
            Self::Set => "SET",
            Self::Forbidden => "FORBIDDEN",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Lowest permission level that may request this class of operation.
    pub fn required_level(&self) -> PermissionLevel {
        match self {
            Self::Read => PermissionLevel::ReadOnly,
            Self::Create | Self::Merge => PermissionLevel::Authenticated,
            Self::Set => PermissionLevel::Elevated,
            Self::Forbidden => PermissionLevel::Admin,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READ" => Ok(Self::Read),
            "CREATE" => Ok(Self::Create),
            "MERGE" => Ok(Self::Merge),
            "SET" => Ok(Self::Set),
            "FORBIDDEN" => Ok(Self::Forbidden),
            other => Err(CoreError::InvalidValue {
                field: "operation_type",
                value: other.to_string(),
            }),
        }
    }
}

// ── Permission levels ─────────────────────────────────────────────

/// Caller permission tier, 1 through 4.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum PermissionLevel {
    ReadOnly = 1,
    Authenticated = 2,
    Elevated = 3,
    Admin = 4,
}

impl PermissionLevel {
    pub const ALL: [PermissionLevel; 4] = [
        Self::ReadOnly,
        Self::Authenticated,
        Self::Elevated,
        Self::Admin,
    ];

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Authenticated => "authenticated",
            Self::Elevated => "elevated",
            Self::Admin => "admin",
        }
    }
}

impl TryFrom<u8> for PermissionLevel {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ReadOnly),
            2 => Ok(Self::Authenticated),
            3 => Ok(Self::Elevated),
            4 => Ok(Self::Admin),
            other => Err(CoreError::InvalidPermissionLevel(other)),
        }
    }
}

impl From<PermissionLevel> for u8 {
    fn from(level: PermissionLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.name())
    }
}

// ── Audit vocabulary ──────────────────────────────────────────────

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Warning,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Warning => "warning",
        }
    }
}

impl std::str::FromStr for AuditResult {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "warning" => Ok(Self::Warning),
            other => Err(CoreError::InvalidValue {
                field: "result",
                value: other.to_string(),
            }),
        }
    }
}

/// Risk rating recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(CoreError::InvalidValue {
                field: "risk_level",
                value: other.to_string(),
            }),
        }
    }
}

/// Which backend family a connection speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Neo4j,
    Postgres,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neo4j => "neo4j",
            Self::Postgres => "postgres",
        }
    }
}

impl std::str::FromStr for DatabaseKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neo4j" => Ok(Self::Neo4j),
            "postgres" => Ok(Self::Postgres),
            other => Err(CoreError::InvalidValue {
                field: "database_type",
                value: other.to_string(),
            }),
        }
    }
}
