//! Retention windows per audit event category.
//!
//! Patterns use SQL `LIKE` syntax with a trailing `%` wildcard so the same
//! rows can drive cleanup jobs running inside the database.

use serde::{Deserialize, Serialize};

/// How long events matching a pattern are kept, and when they age out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub event_type_pattern: String,
    pub retention_days: u32,
    pub archive_after_days: u32,
    pub delete_after_days: u32,
    pub compress_after_days: u32,
}

/// Lifecycle stage of an event of a given age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RetentionStage {
    Active,
    Compress,
    Archive,
    Delete,
}

impl RetentionPolicy {
    fn new(pattern: &str, retention: u32, archive: u32, delete: u32, compress: u32) -> Self {
        Self {
            event_type_pattern: pattern.to_string(),
            retention_days: retention,
            archive_after_days: archive,
            delete_after_days: delete,
            compress_after_days: compress,
        }
    }

    /// Policies seeded at bootstrap. Graph database events are kept longest,
    /// then security, OAuth, auth, system, and a catch-all default.
    pub fn defaults() -> Vec<RetentionPolicy> {
        vec![
            Self::new("neo4j_%", 2555, 365, 2555, 90),
            Self::new("security_%", 2190, 365, 2190, 90),
            Self::new("oauth_%", 1095, 180, 1095, 60),
            Self::new("auth_%", 730, 180, 730, 30),
            Self::new("system_%", 365, 90, 365, 30),
            Self::new("%", 365, 90, 365, 30),
        ]
    }

    /// Whether the pattern covers the event type.
    pub fn covers(&self, event_type: &str) -> bool {
        match self.event_type_pattern.strip_suffix('%') {
            Some(prefix) => event_type.starts_with(prefix),
            None => event_type == self.event_type_pattern,
        }
    }

    /// The most specific policy covering `event_type` (longest pattern wins).
    pub fn matching<'a>(
        policies: &'a [RetentionPolicy],
        event_type: &str,
    ) -> Option<&'a RetentionPolicy> {
        policies
            .iter()
            .filter(|p| p.covers(event_type))
            .max_by_key(|p| p.event_type_pattern.trim_end_matches('%').len())
    }

    /// Stage an event of `age_days` has reached under this policy.
    pub fn stage(&self, age_days: u32) -> RetentionStage {
        if age_days >= self.delete_after_days {
            RetentionStage::Delete
        } else if age_days >= self.archive_after_days {
            RetentionStage::Archive
        } else if age_days >= self.compress_after_days {
            RetentionStage::Compress
        } else {
            RetentionStage::Active
        }
    }

    pub fn is_expired(&self, age_days: u32) -> bool {
        age_days >= self.retention_days
    }
}
