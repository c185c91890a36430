//! Wiring of the destination jobs into the cron job runner.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use compass_core::CoreResult;
use compass_cronjob::{CronJobError, CronJobHandle, Job, LeaderElector, run_cron_job};

use crate::config::SyncJobConfig;
use crate::dispatcher::TenantSyncDispatcher;
use crate::syncer::{
    DestinationResyncer, DestinationSyncer, OnDemandResync, RuntimeTenants,
    SubscribedTenantFetcher, TenantFetcher,
};

pub const SYNC_JOB_NAME: &str = "SyncTenantDestinations";
pub const RESYNC_JOB_NAME: &str = "DestinationFetcherResync";

/// Periodic sync over a collaborator that both enumerates and syncs tenants.
pub fn sync_job<S>(config: &SyncJobConfig, syncer: Arc<S>) -> CoreResult<Job>
where
    S: SubscribedTenantFetcher + DestinationSyncer + 'static,
{
    let parallel_tenants = config.validate()?;
    let dispatcher = TenantSyncDispatcher::from_syncer(syncer, parallel_tenants);

    let job = Job::new(SYNC_JOB_NAME, config.job_schedule_period, dispatcher)
        .with_overlap_policy(config.overlap);
    Ok(job)
}

/// Periodic on-demand refetch for every tenant with subscribed runtimes.
pub fn resync_job(
    config: &SyncJobConfig,
    fetcher: Arc<dyn TenantFetcher>,
    resyncer: Arc<dyn DestinationResyncer>,
) -> CoreResult<Job> {
    let parallel_tenants = config.validate()?;
    let dispatcher = TenantSyncDispatcher::new(
        Arc::new(RuntimeTenants(fetcher)),
        Arc::new(OnDemandResync(resyncer)),
        parallel_tenants,
    );

    let job = Job::new(RESYNC_JOB_NAME, config.job_schedule_period, dispatcher)
        .with_overlap_policy(config.overlap);
    Ok(job)
}

/// Validate, build and start the sync job.
pub fn start_sync_job<S>(
    token: CancellationToken,
    config: &SyncJobConfig,
    elector: Option<Arc<dyn LeaderElector>>,
    syncer: Arc<S>,
) -> Result<CronJobHandle, CronJobError>
where
    S: SubscribedTenantFetcher + DestinationSyncer + 'static,
{
    let job = sync_job(config, syncer)?;
    run_cron_job(token, &config.election, elector, job)
}

/// Validate, build and start the resync job.
pub fn start_resync_job(
    token: CancellationToken,
    config: &SyncJobConfig,
    elector: Option<Arc<dyn LeaderElector>>,
    fetcher: Arc<dyn TenantFetcher>,
    resyncer: Arc<dyn DestinationResyncer>,
) -> Result<CronJobHandle, CronJobError> {
    let job = resync_job(config, fetcher, resyncer)?;
    run_cron_job(token, &config.election, elector, job)
}
