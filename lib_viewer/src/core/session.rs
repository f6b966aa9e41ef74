//! # Poll Session
//!
//! One user's isolated polling context: a [`PollScheduler`] running as its own
//! task, plus a cheap handle the presentation layer uses to steer it and read
//! its state. Dropping every handle, or calling [`SessionHandle::shutdown`],
//! tears the session down.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::interval::{ConfigError, PollInterval};
use super::scheduler::{PollCommand, PollEvent, PollScheduler, PollView, SchedulerSettings};
use crate::connections::Gateway;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("poll session has stopped")]
    Closed,
}

/// Control handle of a running session.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<PollCommand>,
    view: watch::Receiver<PollView>,
    events: broadcast::Sender<PollEvent>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Spawns a scheduler for `gateway` on the current tokio runtime.
pub fn spawn_session<G: Gateway + 'static>(gateway: Arc<G>, settings: SchedulerSettings) -> SessionHandle {
    let scheduler = PollScheduler::new(gateway, settings);
    let view = scheduler.watch();
    let events = scheduler.event_sender();
    let (commands, rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(scheduler.run(rx, shutdown.clone()));

    SessionHandle {
        commands,
        view,
        events,
        shutdown,
        task,
    }
}

impl SessionHandle {
    /// Starts polling every `seconds`. Invalid values are rejected here,
    /// before the scheduler sees them.
    pub fn enable(&self, seconds: u64) -> Result<(), SessionError> {
        let interval = PollInterval::try_from(seconds)?;
        self.send(PollCommand::Enable(interval))
    }

    pub fn disable(&self) -> Result<(), SessionError> {
        self.send(PollCommand::Disable)
    }

    pub fn refresh_now(&self) -> Result<(), SessionError> {
        self.send(PollCommand::RefreshNow)
    }

    /// Clears the new-data flag.
    pub fn acknowledge(&self) -> Result<(), SessionError> {
        self.send(PollCommand::Acknowledge)
    }

    /// Latest published view.
    pub fn view(&self) -> PollView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PollView> {
        self.view.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    /// Stops the scheduler and waits for its task to end.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            log::error!("Poll session task ended abnormally: {}", e);
        }
    }

    fn send(&self, command: PollCommand) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}
