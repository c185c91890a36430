//! In-memory leader elector.
//!
//! Process-local only: leadership is not shared across process boundaries and
//! nothing survives a restart. Suitable for tests and single-replica runs.
//! Expiry follows the tokio clock, so paused-time tests see leases lapse.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ElectionError, LeaderElector, LeadershipResult, RenewalResult};

#[derive(Debug, Clone)]
struct Lease {
    identity: String,
    token: String,
    expires_at: Instant,
}

/// In-memory lease table guarded by an `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryLeaderElector {
    leases: RwLock<HashMap<String, Lease>>,
}

fn poison_err<T>(_: PoisonError<T>) -> ElectionError {
    ElectionError::Poisoned
}

impl InMemoryLeaderElector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a lease regardless of its holder, as if it expired in the backend.
    pub fn revoke(&self, lock_key: &str) {
        if let Ok(mut leases) = self.leases.write() {
            leases.remove(lock_key);
        }
    }
}

#[async_trait]
impl LeaderElector for InMemoryLeaderElector {
    async fn try_acquire(
        &self,
        lock_key: &str,
        identity: &str,
        lease_duration: Duration,
    ) -> Result<LeadershipResult, ElectionError> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Instant::now();

        if let Some(lease) = leases.get_mut(lock_key) {
            if lease.expires_at > now {
                if lease.identity == identity {
                    // Already ours: extend and hand back the same token.
                    lease.expires_at = now + lease_duration;
                    return Ok(LeadershipResult::Acquired {
                        lease_token: lease.token.clone(),
                        lease_duration,
                    });
                }

                return Ok(LeadershipResult::NotLeader {
                    current_leader: Some(lease.identity.clone()),
                });
            }
        }

        let token = Uuid::new_v4().to_string();
        leases.insert(
            lock_key.to_string(),
            Lease {
                identity: identity.to_string(),
                token: token.clone(),
                expires_at: now + lease_duration,
            },
        );

        Ok(LeadershipResult::Acquired {
            lease_token: token,
            lease_duration,
        })
    }

    async fn renew(
        &self,
        lock_key: &str,
        lease_token: &str,
        lease_duration: Duration,
    ) -> Result<RenewalResult, ElectionError> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Instant::now();

        let Some(lease) = leases.get_mut(lock_key) else {
            return Ok(RenewalResult::Lost);
        };

        if lease.token != lease_token {
            return Ok(RenewalResult::InvalidToken);
        }

        if lease.expires_at <= now {
            return Ok(RenewalResult::Lost);
        }

        lease.expires_at = now + lease_duration;

        Ok(RenewalResult::Renewed { lease_duration })
    }

    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool, ElectionError> {
        let mut leases = self.leases.write().map_err(poison_err)?;

        match leases.get(lock_key) {
            Some(lease) if lease.token == lease_token => {
                leases.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>, ElectionError> {
        let leases = self.leases.read().map_err(poison_err)?;
        let now = Instant::now();

        Ok(leases
            .get(lock_key)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.identity.clone()))
    }
}
