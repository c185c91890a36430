//! Tenant sync dispatcher: one tick of a destination job.
//!
//! ## Tick
//!
//! 1. Enumerate subscribed tenants (failure or no tenants ends the tick)
//! 2. Fan out one task per tenant; a per-tick semaphore bounds how many
//!    tenant syncs run at once to `parallel_tenants`
//! 3. Join every task before the tick ends
//!
//! Tenant outcomes are logged at the task boundary and only counted in the
//! returned [`TickOutcome`]; nothing is propagated to the runner.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use compass_core::TenantId;
use compass_cronjob::JobFn;

use crate::syncer::{DestinationSyncer, SubscribedTenantFetcher};

/// Tenant counts of a dispatched tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Distinct tenants fanned out to.
    pub tenants: usize,
    pub synced: usize,
    /// Sync returned an error (or its task panicked).
    pub failed: usize,
    /// Cancelled while waiting for a sync slot; never synced.
    pub abandoned: usize,
}

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    EnumerationFailed,
    NoTenants,
    Dispatched(TickSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TenantOutcome {
    Synced,
    Failed,
    Abandoned,
}

/// Fans a tick out over all subscribed tenants with bounded concurrency.
pub struct TenantSyncDispatcher {
    fetcher: Arc<dyn SubscribedTenantFetcher>,
    syncer: Arc<dyn DestinationSyncer>,
    parallel_tenants: NonZeroUsize,
}

impl TenantSyncDispatcher {
    pub fn new(
        fetcher: Arc<dyn SubscribedTenantFetcher>,
        syncer: Arc<dyn DestinationSyncer>,
        parallel_tenants: NonZeroUsize,
    ) -> Self {
        Self {
            fetcher,
            syncer,
            parallel_tenants,
        }
    }

    /// Dispatcher over one collaborator that both enumerates and syncs.
    pub fn from_syncer<S>(syncer: Arc<S>, parallel_tenants: NonZeroUsize) -> Self
    where
        S: SubscribedTenantFetcher + DestinationSyncer + 'static,
    {
        Self::new(syncer.clone(), syncer, parallel_tenants)
    }

    pub fn parallel_tenants(&self) -> NonZeroUsize {
        self.parallel_tenants
    }

    /// Run one tick and report how it went.
    pub async fn dispatch(&self, token: &CancellationToken) -> TickOutcome {
        let tenants = match self.fetcher.subscribed_tenant_ids(token).await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(error = %e, "failed to fetch subscribed tenants; skipping tick");
                return TickOutcome::EnumerationFailed;
            }
        };

        let tenants = distinct(tenants);
        if tenants.is_empty() {
            info!("no subscribed tenants; nothing to sync");
            return TickOutcome::NoTenants;
        }

        let mut summary = TickSummary {
            tenants: tenants.len(),
            ..TickSummary::default()
        };
        debug!(
            tenants = summary.tenants,
            parallel_tenants = self.parallel_tenants.get(),
            "dispatching tenant syncs"
        );

        let semaphore = Arc::new(Semaphore::new(self.parallel_tenants.get()));
        let mut tasks = JoinSet::new();
        for tenant in tenants {
            tasks.spawn(sync_tenant(
                semaphore.clone(),
                self.syncer.clone(),
                token.clone(),
                tenant,
            ));
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(TenantOutcome::Synced) => summary.synced += 1,
                Ok(TenantOutcome::Failed) => summary.failed += 1,
                Ok(TenantOutcome::Abandoned) => summary.abandoned += 1,
                Err(e) => {
                    error!(error = %e, "tenant sync task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            tenants = summary.tenants,
            synced = summary.synced,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "tenant sync tick finished"
        );
        TickOutcome::Dispatched(summary)
    }
}

#[async_trait]
impl JobFn for TenantSyncDispatcher {
    async fn run(&self, token: CancellationToken) {
        self.dispatch(&token).await;
    }
}

impl std::fmt::Debug for TenantSyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSyncDispatcher")
            .field("parallel_tenants", &self.parallel_tenants)
            .finish_non_exhaustive()
    }
}

async fn sync_tenant(
    semaphore: Arc<Semaphore>,
    syncer: Arc<dyn DestinationSyncer>,
    token: CancellationToken,
    tenant: TenantId,
) -> TenantOutcome {
    // Held until the task returns (or unwinds).
    let _permit = tokio::select! {
        biased;
        () = token.cancelled() => {
            error!(tenant = %tenant, "cancelled while waiting for a sync slot");
            return TenantOutcome::Abandoned;
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(e) => {
                error!(tenant = %tenant, error = %e, "failed to acquire a sync slot");
                return TenantOutcome::Abandoned;
            }
        },
    };

    match syncer.sync_tenant_destinations(&token, &tenant).await {
        Ok(()) => {
            debug!(tenant = %tenant, "synced tenant destinations");
            TenantOutcome::Synced
        }
        Err(e) => {
            error!(tenant = %tenant, error = %e, "failed to sync tenant destinations");
            TenantOutcome::Failed
        }
    }
}

/// Drop repeated ids, keeping first-seen order.
fn distinct(mut tenants: Vec<TenantId>) -> Vec<TenantId> {
    let before = tenants.len();
    let mut seen = HashSet::with_capacity(before);
    tenants.retain(|tenant| seen.insert(tenant.clone()));
    if tenants.len() != before {
        debug!(dropped = before - tenants.len(), "dropped duplicate tenant ids");
    }
    tenants
}
