//! # Views Module
//!
//! What the dashboard does with a snapshot once it has one: narrow it down
//! with a search term, summarize it, or serialize it for download.

/// Case-insensitive search over the displayed columns.
pub mod filter;
/// Totals and per-call-sign counts.
pub mod stats;
/// CSV, XLSX and JSON export.
pub mod export;

pub use export::{export, write_export, ExportError, ExportFormat};
pub use filter::{filter_records, FilterColumn};
pub use stats::{statistics, CallSignCount, Statistics, DEFAULT_TOP_N};
