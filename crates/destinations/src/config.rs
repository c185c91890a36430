//! Destination job settings.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use compass_core::{CoreError, CoreResult};
use compass_cronjob::{ElectionConfig, OverlapPolicy};

/// Settings of a sync or resync job. Immutable once the job is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobConfig {
    pub job_schedule_period: Duration,
    /// Maximum number of tenant syncs running at once.
    pub parallel_tenants: usize,
    pub election: ElectionConfig,
    #[serde(default)]
    pub overlap: OverlapPolicy,
}

impl Default for SyncJobConfig {
    fn default() -> Self {
        Self {
            job_schedule_period: Duration::from_secs(300),
            parallel_tenants: 10,
            election: ElectionConfig::disabled(),
            overlap: OverlapPolicy::Skip,
        }
    }
}

impl SyncJobConfig {
    /// Check the job settings, returning the semaphore weight.
    ///
    /// Election settings are checked when the job is started.
    pub fn validate(&self) -> CoreResult<NonZeroUsize> {
        if self.job_schedule_period.is_zero() {
            return Err(CoreError::invalid_setting(
                "job_schedule_period",
                "must be positive",
            ));
        }
        NonZeroUsize::new(self.parallel_tenants)
            .ok_or_else(|| CoreError::invalid_setting("parallel_tenants", "must be positive"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let weight = SyncJobConfig::default().validate().unwrap();
        assert_eq!(weight.get(), 10);
    }

    #[test]
    fn zero_period_is_rejected() {
        let config = SyncJobConfig {
            job_schedule_period: Duration::ZERO,
            ..SyncJobConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidSetting { key, .. }) if key == "job_schedule_period"
        ));
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let config = SyncJobConfig {
            parallel_tenants: 0,
            ..SyncJobConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidSetting { key, .. }) if key == "parallel_tenants"
        ));
    }
}
