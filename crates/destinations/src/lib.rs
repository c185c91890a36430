//! `compass-destinations`
//!
//! **Responsibility:** periodic per-tenant destination sync and resync.
//!
//! - `syncer`: collaborator ports (tenant enumeration, per-tenant sync)
//! - `dispatcher`: bounded-concurrency fan-out of one tick over all tenants
//! - `config` / `jobs`: job settings and wiring into `compass-cronjob`
//!
//! A failure for one tenant is logged and never affects other tenants or the
//! tick as a whole.

pub mod config;
pub mod dispatcher;
pub mod jobs;
pub mod syncer;

pub use config::SyncJobConfig;
pub use dispatcher::{TenantSyncDispatcher, TickOutcome, TickSummary};
pub use jobs::{
    RESYNC_JOB_NAME, SYNC_JOB_NAME, resync_job, start_resync_job, start_sync_job, sync_job,
};
pub use syncer::{
    DestinationResyncer, DestinationSyncer, OnDemandResync, RuntimeTenants,
    SubscribedTenantFetcher, SyncError, TenantFetcher, TenantRecord,
};
