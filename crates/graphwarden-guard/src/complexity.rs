//! Query complexity scoring and read-side row limits.
//!
//! Score: `Σ keyword weights + 5·traversals + 5·(len / 100) + 15·optional
//! + 20·bounded variable-length patterns`, capped at 100.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use graphwarden_core::Params;

use crate::classifier::pattern_regex;
use crate::lexer;

pub const MAX_SCORE: u8 = 100;

/// Per-occurrence weight of each clause keyword.
const KEYWORD_WEIGHTS: &[(&str, u32)] = &[
    (r"(?i)\bMATCH\b", 10),
    (r"(?i)\bCREATE\b", 20),
    (r"(?i)\bMERGE\b", 30),
    (r"(?i)\bSET\b", 15),
];

const TRAVERSAL_WEIGHT: u32 = 5;
const LENGTH_WEIGHT: u32 = 5;
const LENGTH_STEP: usize = 100;
const OPTIONAL_MATCH_WEIGHT: u32 = 15;
const VAR_LENGTH_WEIGHT: u32 = 20;

static WEIGHTS: Lazy<Vec<(Regex, u32)>> = Lazy::new(|| {
    KEYWORD_WEIGHTS
        .iter()
        .map(|(pattern, weight)| (pattern_regex(pattern), *weight))
        .collect()
});
static TRAVERSAL: Lazy<Regex> = Lazy::new(|| pattern_regex(r"<?-\[[^\]]*\]->?|<?-->?"));
static OPTIONAL_MATCH: Lazy<Regex> = Lazy::new(|| pattern_regex(r"(?i)\bOPTIONAL\s+MATCH\b"));
static VAR_LENGTH: Lazy<Regex> = Lazy::new(|| pattern_regex(r"\*\s*\d+\s*\.\.\s*\d+"));
static LIMIT_CLAUSE: Lazy<Regex> = Lazy::new(|| pattern_regex(r"(?i)\bLIMIT\s+(\$\w+|\d+)"));
static RETURN_CLAUSE: Lazy<Regex> = Lazy::new(|| pattern_regex(r"(?i)\bRETURN\b"));

/// Complexity score of sanitized query text, 0 to 100.
pub fn score(sanitized: &str) -> u8 {
    let mut total: u32 = WEIGHTS
        .iter()
        .map(|(re, weight)| re.find_iter(sanitized).count() as u32 * weight)
        .sum();

    let traversals = TRAVERSAL.find_iter(sanitized).count() as u32;
    total += traversals * TRAVERSAL_WEIGHT;

    total += (sanitized.len() / LENGTH_STEP) as u32 * LENGTH_WEIGHT;

    if OPTIONAL_MATCH.is_match(sanitized) {
        total += OPTIONAL_MATCH_WEIGHT;
    }

    let var_length = VAR_LENGTH.find_iter(sanitized).count() as u32;
    total += var_length * VAR_LENGTH_WEIGHT;

    total.min(MAX_SCORE as u32) as u8
}

/// Bound the rows a read may return.
///
/// Only a LIMIT in code after the last RETURN counts; one inside a
/// literal, a comment, or an earlier WITH does not bound the result. A
/// literal `LIMIT n` above `cap` is rewritten to `cap`; a `LIMIT $p`
/// parameter above `cap` is clamped in `params`; otherwise a LIMIT is
/// appended on its own line, using the caller's limit when it is below `cap`.
pub fn enforce_limit(text: &str, params: &mut Params, requested: Option<u32>, cap: u32) -> String {
    let body = text.trim_end().trim_end_matches(';').trim_end();
    let code = lexer::code_only(body);
    let final_clause = RETURN_CLAUSE.find_iter(&code).last().map_or(0, |m| m.end());

    let Some(found) = LIMIT_CLAUSE
        .captures_iter(&code)
        .filter(|c| c.get(0).is_some_and(|m| m.start() >= final_clause))
        .last()
    else {
        let limit = requested.map_or(cap, |r| r.min(cap));
        return format!("{body}\nLIMIT {limit}");
    };

    let value = &found[1];
    if let Some(name) = value.strip_prefix('$') {
        if let Some(current) = params.get(name).and_then(Value::as_u64) {
            if current > cap as u64 {
                params.insert(name.to_string(), Value::from(cap));
            }
        }
        return body.to_string();
    }

    match value.parse::<u64>() {
        Ok(n) if n > cap as u64 => {
            let range = found.get(0).map_or(0..0, |m| m.range());
            format!("{}LIMIT {cap}{}", &body[..range.start], &body[range.end..])
        }
        _ => body.to_string(),
    }
}
