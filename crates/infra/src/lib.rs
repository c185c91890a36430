//! Infrastructure layer: settings, Postgres, Redis and the destination service.

pub mod config;
pub mod db;
pub mod election;
pub mod resyncer;
pub mod tenants;

pub use config::{ElectionBackend, Settings};
pub use election::PostgresLeaseElector;
#[cfg(feature = "redis")]
pub use election::RedisLeaseElector;
pub use resyncer::HttpDestinationResyncer;
pub use tenants::PostgresTenantFetcher;
