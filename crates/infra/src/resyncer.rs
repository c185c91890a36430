//! HTTP trigger for on-demand destination fetches.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderName;
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use compass_core::{CoreError, CoreResult, TenantId};
use compass_destinations::{DestinationResyncer, SyncError};

use crate::config::{self, DestinationFetcherSettings};

/// Asks the destination service to refetch one tenant's destinations.
///
/// Sends `PUT {url}` with the tenant in the configured header. Any 2xx
/// response counts as success.
#[derive(Debug, Clone)]
pub struct HttpDestinationResyncer {
    client: Client,
    url: Url,
    tenant_header: HeaderName,
    request_timeout: Duration,
}

impl HttpDestinationResyncer {
    pub fn new(settings: &DestinationFetcherSettings) -> CoreResult<Self> {
        let url = Url::parse(&settings.url)
            .map_err(|e| CoreError::invalid_setting(config::FETCHER_URL, e.to_string()))?;
        let tenant_header = HeaderName::try_from(settings.tenant_header.as_str()).map_err(|e| {
            CoreError::invalid_setting(config::FETCHER_TENANT_HEADER, e.to_string())
        })?;
        let client = Client::builder()
            .connect_timeout(settings.request_timeout)
            .build()
            .map_err(|e| CoreError::validation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            tenant_header,
            request_timeout: settings.request_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DestinationResyncer for HttpDestinationResyncer {
    #[instrument(skip(self, token), fields(tenant = %tenant))]
    async fn fetch_destinations_on_demand(
        &self,
        token: &CancellationToken,
        tenant: &TenantId,
    ) -> Result<(), SyncError> {
        let request = self
            .client
            .put(self.url.clone())
            .header(self.tenant_header.clone(), tenant.as_str())
            .timeout(self.request_timeout)
            .send();

        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(SyncError::Cancelled),
            response = request => response
                .map_err(|e| SyncError::tenant(tenant, format!("on-demand fetch request failed: {e}")))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::tenant(
                tenant,
                format!("on-demand fetch returned {status}"),
            ));
        }

        debug!(%status, "on-demand fetch accepted");
        Ok(())
    }
}
