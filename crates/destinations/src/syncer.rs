//! Collaborator ports of the destination jobs.
//!
//! The sync job talks to one object that both enumerates tenants and syncs a
//! tenant. The resync job composes a tenant directory ([`TenantFetcher`]) with
//! an on-demand fetch trigger ([`DestinationResyncer`]); the adapters below
//! present those as the same two ports so both jobs share one dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use compass_core::TenantId;

/// Failure of a collaborator call.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("tenant enumeration failed: {0}")]
    Enumeration(String),

    #[error("destination sync failed for tenant {tenant}: {reason}")]
    Tenant { tenant: TenantId, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn enumeration(msg: impl Into<String>) -> Self {
        Self::Enumeration(msg.into())
    }

    pub fn tenant(tenant: &TenantId, reason: impl Into<String>) -> Self {
        Self::Tenant {
            tenant: tenant.clone(),
            reason: reason.into(),
        }
    }
}

/// Lists the external ids of tenants due for a destination sync.
#[async_trait]
pub trait SubscribedTenantFetcher: Send + Sync {
    async fn subscribed_tenant_ids(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<TenantId>, SyncError>;
}

/// Syncs the destinations of one tenant.
///
/// May be slow and may fail; implementations own their timeouts and retries
/// and should stop early once `token` is cancelled.
#[async_trait]
pub trait DestinationSyncer: Send + Sync {
    async fn sync_tenant_destinations(
        &self,
        token: &CancellationToken,
        tenant: &TenantId,
    ) -> Result<(), SyncError>;
}

/// A tenant as stored by the tenant directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Internal id.
    pub id: Uuid,
    pub external_tenant: TenantId,
    pub name: String,
    pub tenant_type: String,
}

/// Tenant directory: tenants that have runtimes subscribed to them.
#[async_trait]
pub trait TenantFetcher: Send + Sync {
    async fn subscribed_runtime_tenants(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<TenantRecord>, SyncError>;
}

/// Triggers an on-demand destination fetch for one tenant.
#[async_trait]
pub trait DestinationResyncer: Send + Sync {
    async fn fetch_destinations_on_demand(
        &self,
        token: &CancellationToken,
        tenant: &TenantId,
    ) -> Result<(), SyncError>;
}

/// Enumerates tenants through a [`TenantFetcher`], yielding external ids.
#[derive(Debug, Clone)]
pub struct RuntimeTenants<F: ?Sized>(pub Arc<F>);

#[async_trait]
impl<F> SubscribedTenantFetcher for RuntimeTenants<F>
where
    F: TenantFetcher + ?Sized,
{
    async fn subscribed_tenant_ids(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<TenantId>, SyncError> {
        let records = self.0.subscribed_runtime_tenants(token).await?;
        Ok(records
            .into_iter()
            .map(|record| record.external_tenant)
            .collect())
    }
}

/// Syncs a tenant by triggering an on-demand fetch.
#[derive(Debug, Clone)]
pub struct OnDemandResync<R: ?Sized>(pub Arc<R>);

#[async_trait]
impl<R> DestinationSyncer for OnDemandResync<R>
where
    R: DestinationResyncer + ?Sized,
{
    async fn sync_tenant_destinations(
        &self,
        token: &CancellationToken,
        tenant: &TenantId,
    ) -> Result<(), SyncError> {
        self.0.fetch_destinations_on_demand(token, tenant).await
    }
}
