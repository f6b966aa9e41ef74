use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::change_detector::{ChangeResult, DetectionMode};
use super::interval::PollInterval;
use crate::connections::{DbError, Snapshot};

/// Which side of the gateway failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    Connection,
    /// Schema mismatch or missing table. Likely a permanent misconfiguration.
    Query,
}

impl From<&DbError> for WarningKind {
    fn from(err: &DbError) -> Self {
        match err {
            DbError::ConnectionError(_) => WarningKind::Connection,
            DbError::QueryError(_) => WarningKind::Query,
        }
    }
}

/// Non-blocking warning shown next to the last good snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchWarning {
    pub kind: WarningKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl FetchWarning {
    pub fn is_prominent(&self) -> bool {
        self.kind == WarningKind::Query
    }
}

/// Per-session polling state. Owned by exactly one scheduler.
#[derive(Debug, Clone)]
pub struct PollState {
    latest: Option<Arc<Snapshot>>,
    interval: PollInterval,
    new_data: bool,
    last_change: Option<ChangeResult>,
    last_warning: Option<FetchWarning>,
    last_checked: Option<DateTime<Utc>>,
    ticks: u64,
}

impl PollState {
    pub fn new(interval: PollInterval) -> Self {
        Self {
            latest: None,
            interval,
            new_data: false,
            last_change: None,
            last_warning: None,
            last_checked: None,
            ticks: 0,
        }
    }

    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.latest.as_ref()
    }

    pub fn interval(&self) -> PollInterval {
        self.interval
    }

    pub fn set_interval(&mut self, interval: PollInterval) {
        self.interval = interval;
    }

    pub fn has_new_data(&self) -> bool {
        self.new_data
    }

    pub fn last_change(&self) -> Option<ChangeResult> {
        self.last_change
    }

    pub fn last_warning(&self) -> Option<&FetchWarning> {
        self.last_warning.as_ref()
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.last_checked
    }

    /// Completed fetch cycles, successful or not.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Replaces the latest snapshot and returns how it relates to the previous one.
    ///
    /// A change raises the new-data flag; nothing here lowers it.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot, mode: DetectionMode) -> ChangeResult {
        let change = mode.detect(self.latest.as_deref(), &snapshot);
        if change.is_changed() {
            self.new_data = true;
        }
        self.last_checked = Some(snapshot.captured_at());
        self.latest = Some(Arc::new(snapshot));
        self.last_change = Some(change);
        self.last_warning = None;
        self.ticks += 1;
        change
    }

    /// Records a failed fetch. The latest snapshot is kept as is.
    pub fn record_failure(&mut self, err: &DbError) -> FetchWarning {
        let warning = FetchWarning {
            kind: WarningKind::from(err),
            message: err.to_string(),
            at: Utc::now(),
        };
        self.last_checked = Some(warning.at);
        self.last_warning = Some(warning.clone());
        self.ticks += 1;
        warning
    }

    /// Clears the new-data flag. Returns whether it was set.
    pub fn acknowledge(&mut self) -> bool {
        std::mem::replace(&mut self.new_data, false)
    }
}
