//! Setup-time errors of the cron job runner.
//!
//! Steady-state tick failures never surface here; tick functions log them.

use compass_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum CronJobError {
    #[error("job '{job}' has a non-positive schedule period")]
    InvalidSchedulePeriod { job: String },

    #[error("invalid election configuration: {0}")]
    InvalidElectionConfig(#[source] CoreError),

    #[error("job '{job}' has election enabled but no elector backend")]
    MissingElector { job: String },

    #[error(transparent)]
    Config(#[from] CoreError),
}
