//! # Connections Module
//!
//! Read-only access to the hosted `alpha` table. The [`Gateway`] trait is the
//! seam the poll scheduler depends on; [`SupabaseGateway`] is the production
//! implementation over the PostgREST endpoint.

/// Record and snapshot model returned by every gateway.
pub mod model;

/// The PostgREST-backed table gateway.
pub mod db_supabase;

use std::future::Future;

pub use db_supabase::{DbError, GatewayConfig, SupabaseGateway};
pub use model::{Record, Snapshot};

/// Fetches every row of a table in one request.
///
/// Implementations must not mutate remote state.
pub trait Gateway: Send + Sync {
    /// Returns every row visible to the configured credentials, in server order.
    fn fetch_all(&self, table: &str) -> impl Future<Output = Result<Snapshot, DbError>> + Send;
}
