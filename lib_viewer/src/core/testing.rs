//! Fake gateways for scheduler and session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::connections::{DbError, Gateway, Record, Snapshot};

pub(crate) fn rows(ids: std::ops::RangeInclusive<u32>) -> Vec<Record> {
    ids.map(|i| Record::new(i.to_string(), Some(format!("PL-{i}").as_str()), Some("Alpha"))).collect()
}

/// Plays back a fixed list of results. The last entry repeats forever.
pub(crate) struct ScriptedGateway {
    script: Mutex<VecDeque<Result<Vec<Record>, DbError>>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub(crate) fn new(script: Vec<Result<Vec<Record>, DbError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Gateway for ScriptedGateway {
    async fn fetch_all(&self, _table: &str) -> Result<Snapshot, DbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };
        next.unwrap_or_else(|| Err(DbError::ConnectionError("empty script".into())))
            .map(Snapshot::new)
    }
}

/// Blocks every fetch until the test opens the gate.
pub(crate) struct GatedGateway {
    pub(crate) started: Notify,
    pub(crate) gate: Notify,
    records: Vec<Record>,
    calls: AtomicUsize,
}

impl GatedGateway {
    pub(crate) fn new(records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            gate: Notify::new(),
            records,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Gateway for GatedGateway {
    async fn fetch_all(&self, _table: &str) -> Result<Snapshot, DbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.gate.notified().await;
        Ok(Snapshot::new(self.records.clone()))
    }
}
