//! Process settings read from `APP_*` environment variables.
//!
//! Durations accept `ms`/`s`/`m`/`h` groups (`"1m30s"`); a bare integer is
//! seconds. Every setting except the database and fetcher URLs has a default.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use compass_core::{CoreError, CoreResult, parse_duration};
use compass_cronjob::{ElectionConfig, OverlapPolicy};
use compass_destinations::SyncJobConfig;
use compass_observability::LogFormat;

pub const LOG_FORMAT: &str = "APP_LOG_FORMAT";
pub const HEALTH_ADDRESS: &str = "APP_HEALTH_ADDRESS";
pub const DB_URL: &str = "APP_DB_URL";
pub const DB_MAX_CONNECTIONS: &str = "APP_DB_MAX_CONNECTIONS";
pub const FETCHER_URL: &str = "APP_DESTINATION_FETCHER_URL";
pub const FETCHER_TENANT_HEADER: &str = "APP_DESTINATION_FETCHER_TENANT_HEADER";
pub const FETCHER_REQUEST_TIMEOUT: &str = "APP_DESTINATION_FETCHER_REQUEST_TIMEOUT";
pub const FETCHER_JOB_SCHEDULE_PERIOD: &str = "APP_DESTINATION_FETCHER_JOB_SCHEDULE_PERIOD";
pub const FETCHER_PARALLEL_TENANTS: &str = "APP_DESTINATION_FETCHER_PARALLEL_TENANTS";
pub const ELECTION_ENABLED: &str = "APP_ELECTION_ENABLED";
pub const ELECTION_BACKEND: &str = "APP_ELECTION_BACKEND";
pub const ELECTION_LOCK_NAMESPACE: &str = "APP_ELECTION_LOCK_NAMESPACE";
pub const ELECTION_LOCK_NAME: &str = "APP_ELECTION_LOCK_NAME";
pub const ELECTION_IDENTITY: &str = "APP_ELECTION_IDENTITY";
pub const ELECTION_LEASE_DURATION: &str = "APP_ELECTION_LEASE_DURATION";
pub const ELECTION_RENEW_INTERVAL: &str = "APP_ELECTION_RENEW_INTERVAL";
pub const REDIS_URL: &str = "APP_REDIS_URL";

/// Fallback for the election identity (set by Kubernetes to the pod name).
const HOSTNAME: &str = "HOSTNAME";

/// Where the election lease lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionBackend {
    #[default]
    Postgres,
    Redis,
}

impl FromStr for ElectionBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => Err(CoreError::invalid_setting(
                ELECTION_BACKEND,
                format!("unknown backend '{other}' (expected 'postgres' or 'redis')"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

/// On-demand fetch endpoint of the destination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationFetcherSettings {
    pub url: String,
    /// Header carrying the external tenant id.
    pub tenant_header: String,
    pub request_timeout: Duration,
}

/// Everything the destination fetcher process needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub log_format: LogFormat,
    pub health_address: SocketAddr,
    pub database: DatabaseSettings,
    pub destination_fetcher: DestinationFetcherSettings,
    pub job: SyncJobConfig,
    pub election_backend: ElectionBackend,
    /// Required when election runs on the redis backend.
    pub redis_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let log_format = match vars.get(LOG_FORMAT) {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| CoreError::invalid_setting(LOG_FORMAT, e.to_string()))?,
            None => LogFormat::default(),
        };

        let health_address =
            vars.parse_or(HEALTH_ADDRESS, SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let database = DatabaseSettings {
            url: vars.required(DB_URL)?,
            max_connections: vars.parse_or(DB_MAX_CONNECTIONS, 5)?,
        };
        if database.max_connections == 0 {
            return Err(CoreError::invalid_setting(
                DB_MAX_CONNECTIONS,
                "must be positive",
            ));
        }

        let url = vars.required(FETCHER_URL)?;
        reqwest::Url::parse(&url)
            .map_err(|e| CoreError::invalid_setting(FETCHER_URL, e.to_string()))?;
        let destination_fetcher = DestinationFetcherSettings {
            url,
            tenant_header: vars
                .get(FETCHER_TENANT_HEADER)
                .unwrap_or_else(|| "Tenant".to_string()),
            request_timeout: vars.duration_or(FETCHER_REQUEST_TIMEOUT, Duration::from_secs(30))?,
        };
        if destination_fetcher.request_timeout.is_zero() {
            return Err(CoreError::invalid_setting(
                FETCHER_REQUEST_TIMEOUT,
                "must be positive",
            ));
        }

        let election = vars.election()?;
        let election_backend = match vars.get(ELECTION_BACKEND) {
            Some(raw) => raw.parse()?,
            None => ElectionBackend::default(),
        };
        let redis_url = vars.get(REDIS_URL);
        if election.election_enabled
            && election_backend == ElectionBackend::Redis
            && redis_url.is_none()
        {
            return Err(CoreError::missing_setting(REDIS_URL));
        }

        let job = SyncJobConfig {
            job_schedule_period: vars
                .duration_or(FETCHER_JOB_SCHEDULE_PERIOD, Duration::from_secs(300))?,
            parallel_tenants: vars.parse_or(FETCHER_PARALLEL_TENANTS, 10)?,
            election,
            overlap: OverlapPolicy::Skip,
        };
        job.validate().map_err(with_env_key)?;

        Ok(Self {
            log_format,
            health_address,
            database,
            destination_fetcher,
            job,
            election_backend,
            redis_url,
        })
    }
}

/// Environment name of a [`SyncJobConfig`] or [`ElectionConfig`] field.
fn env_key(field: &str) -> &str {
    match field {
        "job_schedule_period" => FETCHER_JOB_SCHEDULE_PERIOD,
        "parallel_tenants" => FETCHER_PARALLEL_TENANTS,
        "lock_namespace" => ELECTION_LOCK_NAMESPACE,
        "lock_name" => ELECTION_LOCK_NAME,
        "identity" => ELECTION_IDENTITY,
        "lease_duration" => ELECTION_LEASE_DURATION,
        "renew_interval" => ELECTION_RENEW_INTERVAL,
        other => other,
    }
}

fn with_env_key(err: CoreError) -> CoreError {
    match err {
        CoreError::InvalidSetting { key, reason } => {
            CoreError::invalid_setting(env_key(&key), reason)
        }
        other => other,
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> CoreResult<String> {
        self.get(key).ok_or_else(|| CoreError::missing_setting(key))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> CoreResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| CoreError::invalid_setting(key, format!("'{raw}': {e}"))),
            None => Ok(default),
        }
    }

    fn duration_or(&self, key: &str, default: Duration) -> CoreResult<Duration> {
        match self.get(key) {
            Some(raw) => {
                parse_duration(&raw).map_err(|e| CoreError::invalid_setting(key, e.to_string()))
            }
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str) -> CoreResult<bool> {
        match self.get(key).map(|raw| raw.to_ascii_lowercase()) {
            None => Ok(false),
            Some(raw) => match raw.as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(CoreError::invalid_setting(key, format!("'{raw}' is not a boolean"))),
            },
        }
    }

    fn election(&self) -> CoreResult<ElectionConfig> {
        let enabled = self.flag(ELECTION_ENABLED)?;
        let identity = self.get(ELECTION_IDENTITY).or_else(|| self.get(HOSTNAME));

        let config = ElectionConfig {
            election_enabled: enabled,
            lock_namespace: self
                .get(ELECTION_LOCK_NAMESPACE)
                .unwrap_or_else(|| "compass-system".to_string()),
            lock_name: self
                .get(ELECTION_LOCK_NAME)
                .unwrap_or_else(|| "destination-fetcher-resync".to_string()),
            identity: identity.clone().unwrap_or_default(),
            lease_duration: self.duration_or(ELECTION_LEASE_DURATION, Duration::from_secs(60))?,
            renew_interval: self.duration_or(ELECTION_RENEW_INTERVAL, Duration::from_secs(15))?,
        };

        if enabled && identity.is_none() {
            return Err(CoreError::missing_setting(ELECTION_IDENTITY));
        }
        config.validate().map_err(with_env_key)?;
        Ok(config)
    }
}
