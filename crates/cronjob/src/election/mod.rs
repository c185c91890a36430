//! Leader election for multi-replica job scheduling.
//!
//! The [`LeaderElector`] trait is the integration point with a distributed
//! lock backend; this crate never implements a distributed lock itself.
//!
//! - **Leases, not locks**: leaders hold time-bounded leases identified by a token
//! - **Renewal in the background**: a held lease is renewed every
//!   `renew_interval` for the whole life of the runner, not only during ticks
//! - **Fail-safe**: an unreachable backend means "not leader"

pub mod guard;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use compass_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

pub use guard::{LeaderElectionGuard, LeadershipState};
pub use memory::InMemoryLeaderElector;

/// Election settings of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub election_enabled: bool,
    /// Scope of the lock (e.g. the deployment namespace).
    pub lock_namespace: String,
    pub lock_name: String,
    /// Identity of this replica as recorded by the backend.
    pub identity: String,
    pub lease_duration: Duration,
    /// How often the lease is renewed (or, by a follower, retried).
    pub renew_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ElectionConfig {
    /// Election switched off: every tick runs locally.
    pub fn disabled() -> Self {
        Self {
            election_enabled: false,
            lock_namespace: String::new(),
            lock_name: String::new(),
            identity: String::new(),
            lease_duration: Duration::from_secs(60),
            renew_interval: Duration::from_secs(15),
        }
    }

    pub fn enabled(
        lock_namespace: impl Into<String>,
        lock_name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            election_enabled: true,
            lock_namespace: lock_namespace.into(),
            lock_name: lock_name.into(),
            identity: identity.into(),
            ..Self::disabled()
        }
    }

    pub fn with_lease(mut self, lease_duration: Duration, renew_interval: Duration) -> Self {
        self.lease_duration = lease_duration;
        self.renew_interval = renew_interval;
        self
    }

    /// Backend key of the lock, `"{namespace}/{name}"`.
    pub fn lock_key(&self) -> String {
        format!("{}/{}", self.lock_namespace, self.lock_name)
    }

    /// Check the settings; a disabled config is always valid.
    ///
    /// The error names the offending field, e.g. `renew_interval`.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.election_enabled {
            return Ok(());
        }
        if self.lock_namespace.trim().is_empty() {
            return Err(CoreError::invalid_setting("lock_namespace", "must not be empty"));
        }
        if self.lock_name.trim().is_empty() {
            return Err(CoreError::invalid_setting("lock_name", "must not be empty"));
        }
        if self.identity.trim().is_empty() {
            return Err(CoreError::invalid_setting("identity", "must not be empty"));
        }
        if self.lease_duration.is_zero() {
            return Err(CoreError::invalid_setting("lease_duration", "must be positive"));
        }
        if self.renew_interval.is_zero() || self.renew_interval >= self.lease_duration {
            return Err(CoreError::invalid_setting(
                "renew_interval",
                "must be positive and shorter than the lease duration",
            ));
        }
        Ok(())
    }
}

/// Result of a leadership acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipResult {
    Acquired {
        /// Token that must be presented for renewal and release.
        lease_token: String,
        /// Lease length granted by the backend.
        lease_duration: Duration,
    },
    NotLeader {
        /// Identity of the current leader, if known.
        current_leader: Option<String>,
    },
}

impl LeadershipResult {
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }

    #[must_use]
    pub fn lease_token(&self) -> Option<&str> {
        match self {
            Self::Acquired { lease_token, .. } => Some(lease_token),
            Self::NotLeader { .. } => None,
        }
    }
}

/// Result of a lease renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalResult {
    Renewed { lease_duration: Duration },
    /// The lease expired or was taken by another replica.
    Lost,
    InvalidToken,
}

impl RenewalResult {
    #[must_use]
    pub const fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed { .. })
    }
}

/// Election backend failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElectionError {
    #[error("election backend error: {0}")]
    Backend(String),

    #[error("election state lock poisoned")]
    Poisoned,
}

impl ElectionError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Lease-based leader election backend.
#[async_trait]
pub trait LeaderElector: Send + Sync {
    /// Attempt to take (or refresh our own) lease on `lock_key` for
    /// `lease_duration`.
    async fn try_acquire(
        &self,
        lock_key: &str,
        identity: &str,
        lease_duration: Duration,
    ) -> Result<LeadershipResult, ElectionError>;

    /// Extend a held lease by `lease_duration`. Must be called before it
    /// expires.
    async fn renew(
        &self,
        lock_key: &str,
        lease_token: &str,
        lease_duration: Duration,
    ) -> Result<RenewalResult, ElectionError>;

    /// Give up a held lease. Returns `false` if it was no longer ours.
    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool, ElectionError>;

    /// Identity of the current leader, if any.
    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>, ElectionError>;
}
