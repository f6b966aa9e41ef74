//! # Change Detector
//!
//! Classifies the relationship between two consecutive snapshots. Pure and
//! deterministic: the result depends only on the two inputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::connections::Snapshot;

/// Outcome of comparing the current snapshot with the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeResult {
    /// First fetch of the session.
    NoBaseline,
    Unchanged,
    /// `current.len() - previous.len()`; negative when rows were deleted, zero
    /// when only content changed (content mode).
    Changed(i64),
}

impl ChangeResult {
    pub fn is_changed(&self) -> bool {
        matches!(self, ChangeResult::Changed(_))
    }
}

impl fmt::Display for ChangeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeResult::NoBaseline => write!(f, "no baseline"),
            ChangeResult::Unchanged => write!(f, "unchanged"),
            ChangeResult::Changed(delta) => write!(f, "changed ({:+})", delta),
        }
    }
}

/// Count-based detection.
pub fn detect(previous: Option<&Snapshot>, current: &Snapshot) -> ChangeResult {
    match previous {
        None => ChangeResult::NoBaseline,
        Some(prev) if prev.len() == current.len() => ChangeResult::Unchanged,
        Some(prev) => ChangeResult::Changed(current.len() as i64 - prev.len() as i64),
    }
}

/// How two snapshots are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Cardinality only. Misses in-place edits of existing rows.
    #[default]
    Count,
    /// Cardinality first, then the content signature; an edit with an
    /// unchanged row count reports `Changed(0)`.
    Content,
}

impl DetectionMode {
    pub fn detect(self, previous: Option<&Snapshot>, current: &Snapshot) -> ChangeResult {
        let by_count = detect(previous, current);
        match (self, by_count, previous) {
            (DetectionMode::Content, ChangeResult::Unchanged, Some(prev)) if prev.signature() != current.signature() => {
                ChangeResult::Changed(0)
            }
            _ => by_count,
        }
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(DetectionMode::Count),
            "content" => Ok(DetectionMode::Content),
            other => Err(format!("unknown detection mode '{}' (expected count or content)", other)),
        }
    }
}
