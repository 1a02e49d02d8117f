//! Lexical query classification.
//!
//! Classification never parses Cypher. It strips comments, collapses
//! whitespace outside literals, then looks for keywords:
//!
//! 1. Any danger keyword (deletion, schema mutation, procedure calls into
//!    the DBMS, file loading) makes the query FORBIDDEN, whatever else it says.
//!    The raw text is scanned too, so a keyword inside a comment or a string
//!    literal still forbids the query.
//! 2. Otherwise the highest-risk mutation keyword outside literals wins:
//!    SET > MERGE > CREATE.
//! 3. Anything else is READ.

use once_cell::sync::Lazy;
use regex::Regex;

use graphwarden_core::OperationKind;

use crate::complexity;
use crate::lexer;

/// Danger keywords in match order. Multi-word forms come before their
/// single-word prefixes so the reason names the more specific one.
const DANGER_KEYWORDS: &[(&str, &str)] = &[
    ("DETACH DELETE", r"(?i)\bDETACH\s+DELETE\b"),
    ("DELETE", r"(?i)\bDELETE\b"),
    ("REMOVE", r"(?i)\bREMOVE\b"),
    ("DROP", r"(?i)\bDROP\b"),
    ("CREATE INDEX", r"(?i)\bCREATE\s+INDEX\b"),
    ("CREATE CONSTRAINT", r"(?i)\bCREATE\s+CONSTRAINT\b"),
    ("CREATE DATABASE", r"(?i)\bCREATE\s+DATABASE\b"),
    ("ALTER", r"(?i)\bALTER\b"),
    ("CALL DBMS", r"(?i)\bCALL\s+DBMS\b"),
    ("CALL APOC", r"(?i)\bCALL\s+APOC\b"),
    ("LOAD CSV", r"(?i)\bLOAD\s+CSV\b"),
];

/// Result of classifying one query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub operation: OperationKind,
    pub complexity_score: u8,
    /// Comment-free, whitespace-collapsed text.
    pub sanitized: String,
    /// Why the query is FORBIDDEN, if it is.
    pub blocked_reason: Option<String>,
}

impl Classification {
    pub fn is_forbidden(&self) -> bool {
        self.operation == OperationKind::Forbidden
    }
}

/// Classify a query. Pure: the same text always yields the same result.
pub fn classify(text: &str) -> Classification {
    let sanitized = sanitize(text);

    if sanitized.is_empty() {
        return forbidden(sanitized, "empty query".to_string());
    }

    if let Some(keyword) = danger_keyword(&sanitized).or_else(|| danger_keyword(text)) {
        return forbidden(sanitized, format!("forbidden keyword: {keyword}"));
    }

    let code = lexer::code_only(&sanitized);
    let operation = if SET.is_match(&code) {
        OperationKind::Set
    } else if MERGE.is_match(&code) {
        OperationKind::Merge
    } else if CREATE.is_match(&code) {
        OperationKind::Create
    } else {
        OperationKind::Read
    };

    Classification {
        operation,
        complexity_score: complexity::score(&sanitized),
        sanitized,
        blocked_reason: None,
    }
}

/// Strip comments and collapse whitespace, leaving literals intact.
pub fn sanitize(text: &str) -> String {
    lexer::sanitize(text)
}

/// First danger keyword found anywhere in `text`.
pub fn danger_keyword(text: &str) -> Option<&'static str> {
    DANGER
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
}

fn forbidden(sanitized: String, reason: String) -> Classification {
    Classification {
        operation: OperationKind::Forbidden,
        complexity_score: complexity::score(&sanitized),
        sanitized,
        blocked_reason: Some(reason),
    }
}

static DANGER: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DANGER_KEYWORDS
        .iter()
        .map(|(name, pattern)| (*name, pattern_regex(pattern)))
        .collect()
});
static SET: Lazy<Regex> = Lazy::new(|| pattern_regex(r"(?i)\bSET\b"));
static MERGE: Lazy<Regex> = Lazy::new(|| pattern_regex(r"(?i)\bMERGE\b"));
static CREATE: Lazy<Regex> = Lazy::new(|| pattern_regex(r"(?i)\bCREATE\b"));

/// Compile one of the crate's constant patterns.
pub(crate) fn pattern_regex(pattern: &str) -> Regex {
    // Only called with literal patterns; each is compiled by a unit test.
    Regex::new(pattern).expect("constant pattern should compile")
}
