//! # lib_viewer
//!
//! Library half of the alpha vehicle registry viewer. Modules are gated by
//! cargo features the same way across the workspace:
//!
//! - **`retrieve`**: generic HTTP `ApiClient`.
//! - **`connections`**: the read-only table gateway and the `Record` / `Snapshot` model.
//! - **`core`**: change detection, per-session poll state and the poll scheduler.
//! - **`views`**: search/filter, statistics and exports over a snapshot.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "views")]
pub mod views;
