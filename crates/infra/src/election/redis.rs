//! Redis lease elector.
//!
//! One key per lock, `compass:lease:{lock_key}`, holding `"{token}|{identity}"`
//! with a `PX` expiry. Acquisition is `SET NX PX`; renewal and release run as
//! Lua scripts that compare the stored token before touching the key.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, instrument};
use uuid::Uuid;

use compass_cronjob::{ElectionError, LeaderElector, LeadershipResult, RenewalResult};

use super::lease_millis;

const KEY_PREFIX: &str = "compass:lease:";

/// Returns 1 when renewed, 0 when the key is gone, -1 on a token mismatch.
const RENEW_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return 0
end
if string.sub(current, 1, string.len(ARGV[1]) + 1) ~= ARGV[1] .. '|' then
  return -1
end
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and string.sub(current, 1, string.len(ARGV[1]) + 1) == ARGV[1] .. '|' then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn redis_err(operation: &str, err: redis::RedisError) -> ElectionError {
    ElectionError::backend(format!("redis error in {operation}: {err}"))
}

fn lease_key(lock_key: &str) -> String {
    format!("{KEY_PREFIX}{lock_key}")
}

fn encode(token: &str, identity: &str) -> String {
    format!("{token}|{identity}")
}

/// Split a stored value into `(token, identity)`.
fn decode(value: &str) -> Option<(&str, &str)> {
    value.split_once('|')
}

/// Leader elector storing leases as expiring Redis keys.
#[derive(Clone)]
pub struct RedisLeaseElector {
    conn: MultiplexedConnection,
    renew: Script,
    release: Script,
}

impl std::fmt::Debug for RedisLeaseElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLeaseElector").finish_non_exhaustive()
    }
}

impl RedisLeaseElector {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, ElectionError> {
        let client =
            redis::Client::open(redis_url.as_ref()).map_err(|e| redis_err("connect", e))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| redis_err("connect", e))?;

        Ok(Self {
            conn,
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    async fn renew_key(
        &self,
        key: &str,
        lease_token: &str,
        lease_duration: Duration,
    ) -> Result<i64, ElectionError> {
        let mut conn = self.conn.clone();
        self.renew
            .key(key)
            .arg(lease_token)
            .arg(lease_millis(lease_duration))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("renew", e))
    }
}

#[async_trait]
impl LeaderElector for RedisLeaseElector {
    #[instrument(skip(self))]
    async fn try_acquire(
        &self,
        lock_key: &str,
        identity: &str,
        lease_duration: Duration,
    ) -> Result<LeadershipResult, ElectionError> {
        let key = lease_key(lock_key);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(encode(&token, identity))
            .arg("NX")
            .arg("PX")
            .arg(lease_millis(lease_duration))
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("try_acquire", e))?;

        if set.is_some() {
            return Ok(LeadershipResult::Acquired {
                lease_token: token,
                lease_duration,
            });
        }

        let current: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| redis_err("try_acquire", e))?;
        let Some((held_token, holder)) = current.as_deref().and_then(decode) else {
            // Expired between SET and GET; the next attempt retries.
            return Ok(LeadershipResult::NotLeader {
                current_leader: None,
            });
        };

        if holder == identity && self.renew_key(&key, held_token, lease_duration).await? == 1 {
            debug!("refreshed own lease");
            return Ok(LeadershipResult::Acquired {
                lease_token: held_token.to_string(),
                lease_duration,
            });
        }

        Ok(LeadershipResult::NotLeader {
            current_leader: Some(holder.to_string()),
        })
    }

    #[instrument(skip(self, lease_token))]
    async fn renew(
        &self,
        lock_key: &str,
        lease_token: &str,
        lease_duration: Duration,
    ) -> Result<RenewalResult, ElectionError> {
        let renewed = self
            .renew_key(&lease_key(lock_key), lease_token, lease_duration)
            .await?;
        Ok(match renewed {
            1 => RenewalResult::Renewed { lease_duration },
            -1 => RenewalResult::InvalidToken,
            _ => RenewalResult::Lost,
        })
    }

    #[instrument(skip(self, lease_token))]
    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool, ElectionError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(lease_key(lock_key))
            .arg(lease_token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("release", e))?;

        Ok(deleted == 1)
    }

    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>, ElectionError> {
        let mut conn = self.conn.clone();
        let current: Option<String> = conn
            .get(lease_key(lock_key))
            .await
            .map_err(|e| redis_err("current_leader", e))?;

        Ok(current
            .as_deref()
            .and_then(decode)
            .map(|(_, holder)| holder.to_string()))
    }
}
