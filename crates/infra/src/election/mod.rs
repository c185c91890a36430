//! Lease electors backed by shared storage.
//!
//! Both backends store one lease row/key per lock key holding the leader's
//! identity, an opaque token and an expiry. Renewal and release are
//! compare-and-set on the token, so a replica whose lease was taken over can
//! never extend or drop the new leader's lease.

pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

pub use postgres::PostgresLeaseElector;
#[cfg(feature = "redis")]
pub use redis::RedisLeaseElector;

/// Lease length in the unit the backends expire keys with.
pub(crate) fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}
