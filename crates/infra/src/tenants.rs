//! Postgres-backed tenant directory.
//!
//! Reads the tenants that have at least one runtime subscribed to them:
//!
//! - `tenants(id uuid, external_tenant text, name text, type text, status text)`
//! - `tenant_runtime_contexts(id uuid, runtime_id uuid, tenant_id uuid)`
//!
//! Only `Active` tenants are returned, ordered by external id.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::{Span, instrument, warn};
use uuid::Uuid;

use compass_core::TenantId;
use compass_destinations::{SyncError, TenantFetcher, TenantRecord};

use crate::db::describe_sqlx_error;

const SUBSCRIBED_RUNTIME_TENANTS: &str = r#"
    SELECT t.id, t.external_tenant, t.name, t.type AS tenant_type
    FROM tenants t
    WHERE t.status = 'Active'
      AND EXISTS (
        SELECT 1 FROM tenant_runtime_contexts rc WHERE rc.tenant_id = t.id
      )
    ORDER BY t.external_tenant ASC
"#;

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    external_tenant: String,
    name: String,
    tenant_type: String,
}

impl TenantRow {
    /// `None` for rows without a usable external id.
    fn into_record(self) -> Option<TenantRecord> {
        match TenantId::new(self.external_tenant) {
            Ok(external_tenant) => Some(TenantRecord {
                id: self.id,
                external_tenant,
                name: self.name,
                tenant_type: self.tenant_type,
            }),
            Err(e) => {
                warn!(tenant_uuid = %self.id, error = %e, "skipping tenant without external id");
                None
            }
        }
    }
}

/// Tenant directory backed by the Compass database.
#[derive(Debug, Clone)]
pub struct PostgresTenantFetcher {
    pool: Arc<PgPool>,
}

impl PostgresTenantFetcher {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TenantFetcher for PostgresTenantFetcher {
    #[instrument(skip_all, fields(tenant_count = tracing::field::Empty))]
    async fn subscribed_runtime_tenants(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<TenantRecord>, SyncError> {
        let query =
            sqlx::query_as::<_, TenantRow>(SUBSCRIBED_RUNTIME_TENANTS).fetch_all(&*self.pool);

        let rows = tokio::select! {
            biased;
            () = token.cancelled() => return Err(SyncError::Cancelled),
            rows = query => rows.map_err(|e| {
                SyncError::enumeration(describe_sqlx_error("subscribed_runtime_tenants", &e))
            })?,
        };

        let records: Vec<TenantRecord> = rows
            .into_iter()
            .filter_map(TenantRow::into_record)
            .collect();
        Span::current().record("tenant_count", records.len());
        Ok(records)
    }
}
