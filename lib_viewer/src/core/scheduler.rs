//! # Poll Scheduler
//!
//! A single-owner state machine that decides when to re-fetch the table and
//! what to tell the presentation layer afterwards.
//!
//! ```text
//!   Idle --enable--> Waiting --timer--> Fetching --ok--> Notifying --> Waiting
//!                       ^                   |
//!                       +------error--------+   (no Notifying on failure)
//!   any --disable--> Idle   (an in-flight fetch finishes, its result is dropped)
//! ```
//!
//! ## Key Design Principles:
//! - **Step operations**: `enable`, `disable`, `begin_fetch`, `finish_fetch`,
//!   `tick` and `acknowledge` move the machine one transition at a time, so
//!   every transition can be exercised without a timer.
//! - **Self-scheduling**: `run` drives those steps from a tokio timer and a
//!   command channel. Each tick is armed only after the previous one settled,
//!   so there is never more than one fetch in flight and never a tick backlog.
//! - **Failure isolation**: a gateway error is recorded as a warning and the
//!   machine returns to `Waiting`. No backoff and no retry cap.
//! - **Cooperative stop**: disabling polling never aborts I/O. The stop is
//!   checked when the fetch completes and when the next fire would be armed.

use std::future::pending;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::change_detector::{ChangeResult, DetectionMode};
use super::interval::{ConfigError, PollInterval};
use super::poll_state::{FetchWarning, PollState, WarningKind};
use crate::connections::{DbError, Gateway, Snapshot};

const EVENT_CAPACITY: usize = 64;

/// Scheduler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Waiting,
    Fetching,
    Notifying,
}

/// What started a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    Timer,
    /// "Refresh now" and the initial load. Allowed in any phase.
    Manual,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// First snapshot of the session.
    Loaded { count: usize },
    NewData { delta: i64, count: usize },
    Unchanged { count: usize },
    FetchFailed(FetchWarning),
    /// A fetch finished after polling was disabled; its rows were dropped.
    Discarded,
    PhaseChanged(Phase),
}

/// Consistent read-only picture of a session, published after every change.
#[derive(Debug, Clone)]
pub struct PollView {
    pub phase: Phase,
    pub polling_enabled: bool,
    pub interval: PollInterval,
    pub snapshot: Option<Arc<Snapshot>>,
    pub new_data: bool,
    pub last_change: Option<ChangeResult>,
    pub warning: Option<FetchWarning>,
    pub last_checked: Option<DateTime<Utc>>,
    pub ticks: u64,
}

/// Control messages accepted by [`PollScheduler::run`]. Intervals arrive
/// already validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCommand {
    Enable(PollInterval),
    Disable,
    RefreshNow,
    Acknowledge,
}

/// Result of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Notified(ChangeResult),
    Failed(WarningKind),
    Discarded,
    /// Nothing was fetched: wrong phase, or a fetch is already in flight.
    Skipped,
}

/// Session-level scheduling options.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub table: String,
    pub interval: PollInterval,
    /// Start in `Waiting` instead of `Idle`.
    pub auto_update: bool,
    pub detection: DetectionMode,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            table: "alpha".to_string(),
            interval: PollInterval::default(),
            auto_update: true,
            detection: DetectionMode::default(),
        }
    }
}

struct InFlight {
    origin: FetchOrigin,
    discard: bool,
}

enum Wake {
    Timer,
    Command(PollCommand),
    Shutdown,
}

/// The poll state machine of one session.
pub struct PollScheduler<G> {
    gateway: Arc<G>,
    table: String,
    detection: DetectionMode,
    start_enabled: bool,
    state: PollState,
    phase: Phase,
    polling_enabled: bool,
    in_flight: Option<InFlight>,
    events: broadcast::Sender<PollEvent>,
    view_tx: watch::Sender<PollView>,
}

impl<G: Gateway + 'static> PollScheduler<G> {
    pub fn new(gateway: Arc<G>, settings: SchedulerSettings) -> Self {
        let state = PollState::new(settings.interval);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (view_tx, _) = watch::channel(PollView {
            phase: Phase::Idle,
            polling_enabled: false,
            interval: settings.interval,
            snapshot: None,
            new_data: false,
            last_change: None,
            warning: None,
            last_checked: None,
            ticks: 0,
        });

        Self {
            gateway,
            table: settings.table,
            detection: settings.detection,
            start_enabled: settings.auto_update,
            state,
            phase: Phase::Idle,
            polling_enabled: false,
            in_flight: None,
            events,
            view_tx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_polling(&self) -> bool {
        self.polling_enabled
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<PollView> {
        self.view_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<PollEvent> {
        self.events.clone()
    }

    pub fn view(&self) -> PollView {
        PollView {
            phase: self.phase,
            polling_enabled: self.polling_enabled,
            interval: self.state.interval(),
            snapshot: self.state.latest().cloned(),
            new_data: self.state.has_new_data(),
            last_change: self.state.last_change(),
            warning: self.state.last_warning().cloned(),
            last_checked: self.state.last_checked(),
            ticks: self.state.ticks(),
        }
    }

    /// Validates `seconds` and starts polling. On error nothing changes.
    pub fn enable(&mut self, seconds: u64) -> Result<(), ConfigError> {
        let interval = PollInterval::try_from(seconds)?;
        self.enable_with(interval);
        Ok(())
    }

    /// Starts polling, or changes the cadence when already polling.
    pub fn enable_with(&mut self, interval: PollInterval) {
        self.state.set_interval(interval);
        if !self.polling_enabled {
            log::info!("Polling '{}' every {}", self.table, interval);
        }
        self.polling_enabled = true;
        if self.phase == Phase::Idle {
            self.set_phase(Phase::Waiting);
        } else {
            self.publish();
        }
    }

    /// Stops polling. A fetch still in flight completes but is discarded.
    pub fn disable(&mut self) {
        if !self.polling_enabled {
            return;
        }
        self.polling_enabled = false;
        if let Some(flight) = self.in_flight.as_mut() {
            flight.discard = true;
        }
        log::info!("Polling '{}' disabled", self.table);
        self.set_phase(Phase::Idle);
    }

    /// Enters `Fetching`. Timer fetches need `Waiting`; manual ones run from
    /// any phase. Returns `false` when a fetch is already outstanding.
    pub fn begin_fetch(&mut self, origin: FetchOrigin) -> bool {
        if self.in_flight.is_some() {
            log::debug!("{:?} fetch skipped: another fetch is in flight", origin);
            return false;
        }
        if origin == FetchOrigin::Timer && (!self.polling_enabled || self.phase != Phase::Waiting) {
            return false;
        }
        self.in_flight = Some(InFlight { origin, discard: false });
        self.set_phase(Phase::Fetching);
        true
    }

    /// Feeds a gateway result back into the machine.
    pub fn finish_fetch(&mut self, result: Result<Snapshot, DbError>) -> TickOutcome {
        let Some(flight) = self.in_flight.take() else {
            return TickOutcome::Skipped;
        };
        if flight.discard {
            log::debug!("Discarding {:?} fetch result: polling was disabled mid-flight", flight.origin);
            self.emit(PollEvent::Discarded);
            self.publish();
            return TickOutcome::Discarded;
        }

        let outcome = match result {
            Ok(snapshot) => {
                self.set_phase(Phase::Notifying);
                let count = snapshot.len();
                let change = self.state.apply_snapshot(snapshot, self.detection);
                let event = match change {
                    ChangeResult::NoBaseline => {
                        log::info!("Loaded {} records from '{}'", count, self.table);
                        PollEvent::Loaded { count }
                    }
                    ChangeResult::Unchanged => PollEvent::Unchanged { count },
                    ChangeResult::Changed(delta) => {
                        log::info!("New data in '{}': {:+} rows, {} total", self.table, delta, count);
                        PollEvent::NewData { delta, count }
                    }
                };
                self.emit(event);
                TickOutcome::Notified(change)
            }
            Err(err) => {
                let warning = self.state.record_failure(&err);
                if warning.is_prominent() {
                    log::error!("Fetch from '{}' failed: {}", self.table, err);
                } else {
                    log::warn!("Fetch from '{}' failed: {}", self.table, err);
                }
                let kind = warning.kind;
                self.emit(PollEvent::FetchFailed(warning));
                TickOutcome::Failed(kind)
            }
        };

        let resume = if self.polling_enabled { Phase::Waiting } else { Phase::Idle };
        self.set_phase(resume);
        outcome
    }

    /// One complete fetch-and-compare cycle without concurrent commands.
    pub async fn tick(&mut self, origin: FetchOrigin) -> TickOutcome {
        if !self.begin_fetch(origin) {
            return TickOutcome::Skipped;
        }
        let result = self.gateway.fetch_all(&self.table).await;
        self.finish_fetch(result)
    }

    /// Ad-hoc fetch outside the timer cadence.
    pub async fn refresh_now(&mut self) -> TickOutcome {
        self.tick(FetchOrigin::Manual).await
    }

    /// The user has seen the refreshed data.
    pub fn acknowledge(&mut self) -> bool {
        let was_set = self.state.acknowledge();
        self.publish();
        was_set
    }

    /// Drives the machine until `shutdown` fires or every command sender is gone.
    ///
    /// The first action is an initial load, so the view has rows before the
    /// first timer fire.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PollCommand>, shutdown: CancellationToken) {
        log::info!("Poll scheduler started for '{}'", self.table);
        if self.start_enabled {
            self.enable_with(self.state.interval());
        }

        let mut next_fire: Option<Instant> = None;
        let mut queued = Some(FetchOrigin::Manual);

        loop {
            if let Some(origin) = queued.take() {
                if self.begin_fetch(origin) && !self.drive_fetch(&mut commands, &shutdown).await {
                    break;
                }
                next_fire = self.next_fire();
            }

            let deadline = next_fire;
            let wake = tokio::select! {
                _ = shutdown.cancelled() => Wake::Shutdown,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Wake::Command(cmd),
                    None => Wake::Shutdown,
                },
                _ = async move {
                    match deadline {
                        Some(at) => sleep_until(at).await,
                        None => pending::<()>().await,
                    }
                } => Wake::Timer,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Timer => queued = Some(FetchOrigin::Timer),
                Wake::Command(PollCommand::RefreshNow) => queued = Some(FetchOrigin::Manual),
                Wake::Command(PollCommand::Enable(interval)) => {
                    let rearm = !self.polling_enabled || interval != self.state.interval();
                    self.enable_with(interval);
                    if rearm {
                        next_fire = self.next_fire();
                    }
                }
                Wake::Command(PollCommand::Disable) => {
                    self.disable();
                    next_fire = None;
                }
                Wake::Command(PollCommand::Acknowledge) => {
                    self.acknowledge();
                }
            }
        }

        log::info!("Poll scheduler for '{}' stopped", self.table);
    }

    /// Awaits the gateway while still serving commands. Returns `false` on shutdown.
    async fn drive_fetch(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<PollCommand>,
        shutdown: &CancellationToken,
    ) -> bool {
        let gateway = Arc::clone(&self.gateway);
        let table = self.table.clone();
        let fetch = async move { gateway.fetch_all(&table).await };
        tokio::pin!(fetch);

        let mut commands_open = true;
        let result = loop {
            tokio::select! {
                result = &mut fetch => break result,
                _ = shutdown.cancelled() => return false,
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(PollCommand::Enable(interval)) => self.enable_with(interval),
                    Some(PollCommand::Disable) => self.disable(),
                    Some(PollCommand::Acknowledge) => {
                        self.acknowledge();
                    }
                    Some(PollCommand::RefreshNow) => {
                        log::debug!("Refresh ignored: a fetch is already in flight");
                    }
                    None => commands_open = false,
                },
            }
        };

        self.finish_fetch(result);
        true
    }

    fn next_fire(&self) -> Option<Instant> {
        self.polling_enabled
            .then(|| Instant::now() + self.state.interval().as_duration())
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!("Scheduler '{}': {:?} -> {:?}", self.table, self.phase, phase);
            self.phase = phase;
            self.emit(PollEvent::PhaseChanged(phase));
        }
        self.publish();
    }

    fn emit(&self, event: PollEvent) {
        // No subscribers is fine; the view channel still carries the state.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{rows, ScriptedGateway};

    fn scheduler(gateway: Arc<ScriptedGateway>) -> PollScheduler<ScriptedGateway> {
        PollScheduler::new(
            gateway,
            SchedulerSettings {
                auto_update: false,
                ..SchedulerSettings::default()
            },
        )
    }

    #[test]
    fn invalid_interval_keeps_scheduler_idle() {
        let mut s = scheduler(ScriptedGateway::new(vec![]));
        for bad in [0, 2, 4, 10] {
            assert_eq!(s.enable(bad), Err(ConfigError::InvalidInterval(bad)));
            assert_eq!(s.phase(), Phase::Idle);
            assert!(!s.is_polling());
        }
        assert_eq!(s.enable(5), Ok(()));
        assert_eq!(s.phase(), Phase::Waiting);
        assert_eq!(s.state().interval(), PollInterval::SLOW);
    }

    #[tokio::test]
    async fn timer_tick_is_skipped_while_idle() {
        let gw = ScriptedGateway::new(vec![Ok(rows(1..=3))]);
        let mut s = scheduler(Arc::clone(&gw));
        assert_eq!(s.tick(FetchOrigin::Timer).await, TickOutcome::Skipped);
        assert_eq!(gw.calls(), 0);
    }

    #[tokio::test]
    async fn growth_raises_new_data_flag() {
        let gw = ScriptedGateway::new(vec![Ok(rows(1..=5)), Ok(rows(1..=7))]);
        let mut s = scheduler(gw);
        s.enable(3).unwrap();

        assert_eq!(s.tick(FetchOrigin::Timer).await, TickOutcome::Notified(ChangeResult::NoBaseline));
        assert!(!s.view().new_data);
        assert_eq!(s.tick(FetchOrigin::Timer).await, TickOutcome::Notified(ChangeResult::Changed(2)));
        assert!(s.view().new_data);
        assert_eq!(s.phase(), Phase::Waiting);

        assert!(s.acknowledge());
        assert!(!s.view().new_data);
    }

    #[tokio::test]
    async fn failed_tick_does_not_disturb_later_ticks() {
        let gw = ScriptedGateway::new(vec![
            Ok(rows(1..=5)),
            Err(DbError::ConnectionError("timeout".into())),
            Ok(rows(1..=6)),
        ]);
        let mut s = scheduler(gw);
        s.enable(1).unwrap();

        s.tick(FetchOrigin::Timer).await;
        assert_eq!(s.tick(FetchOrigin::Timer).await, TickOutcome::Failed(WarningKind::Connection));
        let view = s.view();
        assert_eq!(view.phase, Phase::Waiting);
        assert_eq!(view.snapshot.as_ref().map(|snap| snap.len()), Some(5));
        assert!(view.warning.is_some());

        assert_eq!(s.tick(FetchOrigin::Timer).await, TickOutcome::Notified(ChangeResult::Changed(1)));
        let view = s.view();
        assert_eq!(view.snapshot.unwrap().records(), rows(1..=6).as_slice());
        assert!(view.warning.is_none());
        assert_eq!(view.ticks, 3);
    }

    #[tokio::test]
    async fn repeated_manual_refresh_without_changes_is_unchanged() {
        let gw = ScriptedGateway::new(vec![Ok(rows(1..=4))]);
        let mut s = scheduler(gw);

        assert_eq!(s.refresh_now().await, TickOutcome::Notified(ChangeResult::NoBaseline));
        assert_eq!(s.refresh_now().await, TickOutcome::Notified(ChangeResult::Unchanged));
        assert_eq!(s.refresh_now().await, TickOutcome::Notified(ChangeResult::Unchanged));
        assert!(!s.view().new_data);
        assert_eq!(s.phase(), Phase::Idle, "manual refresh returns to idle when polling is off");
    }

    #[test]
    fn disable_mid_flight_discards_result_and_settles_idle() {
        let mut s = scheduler(ScriptedGateway::new(vec![]));
        s.enable(3).unwrap();

        assert!(s.begin_fetch(FetchOrigin::Timer));
        assert_eq!(s.phase(), Phase::Fetching);
        s.disable();
        assert_eq!(s.phase(), Phase::Idle);

        let outcome = s.finish_fetch(Ok(Snapshot::new(rows(1..=3))));
        assert_eq!(outcome, TickOutcome::Discarded);
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.state().latest().is_none());
    }

    #[test]
    fn only_one_fetch_in_flight() {
        let mut s = scheduler(ScriptedGateway::new(vec![]));
        s.enable(1).unwrap();
        assert!(s.begin_fetch(FetchOrigin::Timer));
        assert!(!s.begin_fetch(FetchOrigin::Manual));
        assert!(!s.begin_fetch(FetchOrigin::Timer));
    }

    #[tokio::test]
    async fn events_follow_the_transitions() {
        let gw = ScriptedGateway::new(vec![Ok(rows(1..=2))]);
        let mut s = scheduler(gw);
        let mut rx = s.subscribe();

        s.enable(1).unwrap();
        s.tick(FetchOrigin::Timer).await;

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert_eq!(
            seen,
            vec![
                PollEvent::PhaseChanged(Phase::Waiting),
                PollEvent::PhaseChanged(Phase::Fetching),
                PollEvent::PhaseChanged(Phase::Notifying),
                PollEvent::Loaded { count: 2 },
                PollEvent::PhaseChanged(Phase::Waiting),
            ]
        );
    }

    #[tokio::test]
    async fn failed_tick_goes_straight_back_without_notifying() {
        let gw = ScriptedGateway::new(vec![Ok(rows(1..=2)), Err(DbError::QueryError("relation missing".into()))]);
        let mut s = scheduler(gw);
        s.enable(1).unwrap();
        s.tick(FetchOrigin::Timer).await;

        let mut rx = s.subscribe();
        assert_eq!(s.tick(FetchOrigin::Timer).await, TickOutcome::Failed(WarningKind::Query));

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert_eq!(seen.len(), 3, "unexpected events: {:?}", seen);
        assert_eq!(seen[0], PollEvent::PhaseChanged(Phase::Fetching));
        assert!(matches!(&seen[1], PollEvent::FetchFailed(w) if w.kind == WarningKind::Query));
        assert_eq!(seen[2], PollEvent::PhaseChanged(Phase::Waiting));

        // With polling off a failed manual refresh settles in Idle, again skipping Notifying.
        s.disable();
        let mut rx = s.subscribe();
        assert_eq!(s.refresh_now().await, TickOutcome::Failed(WarningKind::Query));
        let phases: Vec<Phase> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|ev| match ev {
                PollEvent::PhaseChanged(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![Phase::Fetching, Phase::Idle]);
    }

    #[test]
    fn watch_channel_tracks_view() {
        let mut s = scheduler(ScriptedGateway::new(vec![]));
        let rx = s.watch();
        s.enable(5).unwrap();
        let view = rx.borrow().clone();
        assert_eq!(view.phase, Phase::Waiting);
        assert!(view.polling_enabled);
        assert_eq!(view.interval, PollInterval::SLOW);
    }
}
