//! `compass-cronjob`
//!
//! Periodic background jobs with optional leader election.
//!
//! ## Components
//!
//! - `Job`: a named tick function plus its schedule period
//! - `run_cron_job`: drives a job on a fixed period until cancelled
//! - `LeaderElector`: lease-based election backend (pluggable)
//! - `LeaderElectionGuard`: gates each tick on holding leadership

pub mod election;
pub mod error;
pub mod job;
pub mod runner;

pub use election::{
    ElectionConfig, ElectionError, InMemoryLeaderElector, LeaderElectionGuard, LeaderElector,
    LeadershipResult, LeadershipState, RenewalResult,
};
pub use error::CronJobError;
pub use job::{Job, JobFn, OverlapPolicy};
pub use runner::{CronJobHandle, run_cron_job};

/// Re-exported so job implementations and callers share one token type.
pub use tokio_util::sync::CancellationToken;
