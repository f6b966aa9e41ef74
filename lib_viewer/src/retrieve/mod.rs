//! # Data Retrieval Module
//!
//! Generic HTTP plumbing shared by the gateways. Request building, header
//! injection, optional transient retries and JSON decoding live here so the
//! gateway only has to map responses onto its own error taxonomy.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with optional retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse, ClientOptions, RetrieveError};
