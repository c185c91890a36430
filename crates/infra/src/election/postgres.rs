//! Postgres lease elector.
//!
//! ## Table
//!
//! `leader_leases(lock_key text primary key, holder text, lease_token text,
//! expires_at timestamptz, acquired_at timestamptz)`, created by
//! [`PostgresLeaseElector::ensure_schema`].
//!
//! ## Statements
//!
//! | Operation | Statement | Guard |
//! |-----------|-----------|-------|
//! | acquire | `INSERT .. ON CONFLICT DO UPDATE` | existing lease expired or held by the same identity |
//! | renew | `UPDATE .. SET expires_at` | token matches and lease not expired |
//! | release | `DELETE` | token matches |
//!
//! Expiry is evaluated with the database clock, so replica clock skew does
//! not matter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use compass_cronjob::{ElectionError, LeaderElector, LeadershipResult, RenewalResult};

use super::lease_millis;
use crate::db::describe_sqlx_error;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS leader_leases (
        lock_key    TEXT PRIMARY KEY,
        holder      TEXT NOT NULL,
        lease_token TEXT NOT NULL,
        expires_at  TIMESTAMPTZ NOT NULL,
        acquired_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

/// Same holder on a live lease keeps its token; anyone else takes an expired lease.
const ACQUIRE: &str = r#"
    INSERT INTO leader_leases (lock_key, holder, lease_token, expires_at)
    VALUES ($1, $2, $3, now() + make_interval(secs => $4))
    ON CONFLICT (lock_key) DO UPDATE SET
        lease_token = CASE
            WHEN leader_leases.holder = EXCLUDED.holder AND leader_leases.expires_at > now()
                THEN leader_leases.lease_token
            ELSE EXCLUDED.lease_token
        END,
        acquired_at = CASE
            WHEN leader_leases.holder = EXCLUDED.holder AND leader_leases.expires_at > now()
                THEN leader_leases.acquired_at
            ELSE now()
        END,
        holder = EXCLUDED.holder,
        expires_at = EXCLUDED.expires_at
    WHERE leader_leases.expires_at <= now() OR leader_leases.holder = EXCLUDED.holder
    RETURNING lease_token
"#;

const RENEW: &str = r#"
    UPDATE leader_leases
    SET expires_at = now() + make_interval(secs => $3)
    WHERE lock_key = $1 AND lease_token = $2 AND expires_at > now()
"#;

const RELEASE: &str = "DELETE FROM leader_leases WHERE lock_key = $1 AND lease_token = $2";

const CURRENT_TOKEN: &str = "SELECT lease_token FROM leader_leases WHERE lock_key = $1";

const CURRENT_LEADER: &str =
    "SELECT holder FROM leader_leases WHERE lock_key = $1 AND expires_at > now()";

fn backend_err(operation: &str, err: sqlx::Error) -> ElectionError {
    ElectionError::backend(describe_sqlx_error(operation, &err))
}

/// Leader elector storing leases in the service database.
#[derive(Debug, Clone)]
pub struct PostgresLeaseElector {
    pool: Arc<PgPool>,
}

impl PostgresLeaseElector {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the lease table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), ElectionError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| backend_err("ensure_schema", e))?;
        Ok(())
    }
}

fn lease_secs(lease_duration: Duration) -> f64 {
    lease_millis(lease_duration) as f64 / 1000.0
}

#[async_trait]
impl LeaderElector for PostgresLeaseElector {
    #[instrument(skip(self))]
    async fn try_acquire(
        &self,
        lock_key: &str,
        identity: &str,
        lease_duration: Duration,
    ) -> Result<LeadershipResult, ElectionError> {
        let candidate = Uuid::new_v4().to_string();

        let row = sqlx::query(ACQUIRE)
            .bind(lock_key)
            .bind(identity)
            .bind(&candidate)
            .bind(lease_secs(lease_duration))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend_err("try_acquire", e))?;

        match row {
            Some(row) => {
                let lease_token: String = row
                    .try_get("lease_token")
                    .map_err(|e| backend_err("try_acquire", e))?;
                debug!(refreshed = lease_token != candidate, "lease held");
                Ok(LeadershipResult::Acquired {
                    lease_token,
                    lease_duration,
                })
            }
            None => Ok(LeadershipResult::NotLeader {
                current_leader: self.current_leader(lock_key).await?,
            }),
        }
    }

    #[instrument(skip(self, lease_token))]
    async fn renew(
        &self,
        lock_key: &str,
        lease_token: &str,
        lease_duration: Duration,
    ) -> Result<RenewalResult, ElectionError> {
        let updated = sqlx::query(RENEW)
            .bind(lock_key)
            .bind(lease_token)
            .bind(lease_secs(lease_duration))
            .execute(&*self.pool)
            .await
            .map_err(|e| backend_err("renew", e))?
            .rows_affected();

        if updated == 1 {
            return Ok(RenewalResult::Renewed { lease_duration });
        }

        let current: Option<String> = sqlx::query_scalar(CURRENT_TOKEN)
            .bind(lock_key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend_err("renew", e))?;

        Ok(match current {
            Some(token) if token != lease_token => RenewalResult::InvalidToken,
            _ => RenewalResult::Lost,
        })
    }

    #[instrument(skip(self, lease_token))]
    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool, ElectionError> {
        let deleted = sqlx::query(RELEASE)
            .bind(lock_key)
            .bind(lease_token)
            .execute(&*self.pool)
            .await
            .map_err(|e| backend_err("release", e))?
            .rows_affected();

        Ok(deleted == 1)
    }

    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>, ElectionError> {
        sqlx::query_scalar(CURRENT_LEADER)
            .bind(lock_key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend_err("current_leader", e))
    }
}
