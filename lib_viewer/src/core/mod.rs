//! # Core Polling Module
//!
//! The polling-and-change-detection loop of one viewer session.
//!
//! - **`change_detector`**: pure classification of two consecutive snapshots.
//! - **`interval`**: the validated 1 / 3 / 5 second poll cadence.
//! - **`poll_state`**: per-session state (latest snapshot, new-data flag, last warning).
//! - **`scheduler`**: the `Idle -> Waiting -> Fetching -> Notifying` state machine
//!   and its timer-driven run loop.
//! - **`session`**: spawns a scheduler on the runtime and hands back a control handle.
//!
//! Sessions share nothing: each one owns its `PollState` and talks to the
//! outside only through channels.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Pure snapshot comparison.
pub mod change_detector;
/// Poll cadence validation.
pub mod interval;
/// Per-session polling state.
pub mod poll_state;
/// The poll state machine and its run loop.
pub mod scheduler;
/// Session spawning and the control handle.
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use change_detector::{detect, ChangeResult, DetectionMode};
pub use interval::{ConfigError, PollInterval};
pub use poll_state::{FetchWarning, PollState, WarningKind};
pub use scheduler::{FetchOrigin, Phase, PollCommand, PollEvent, PollScheduler, PollView, SchedulerSettings, TickOutcome};
pub use session::{spawn_session, SessionError, SessionHandle};
