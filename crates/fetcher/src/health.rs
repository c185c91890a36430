//! `GET /healthz`: state of the background job.

use std::sync::{Arc, Mutex, PoisonError};

use axum::{Extension, Json, Router, http::StatusCode, routing::get};
use serde::Serialize;
use tower::ServiceBuilder;
use tracing::warn;

use compass_cronjob::{CronJobHandle, LeadershipState};

/// Shared view of the running job; owns its handle until shutdown.
#[derive(Debug)]
pub struct JobStatus {
    name: String,
    handle: Mutex<Option<CronJobHandle>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub job: String,
    pub running: bool,
    /// `null` when election is disabled.
    pub leadership: Option<LeadershipState>,
}

impl JobStatus {
    pub fn new(handle: CronJobHandle) -> Self {
        Self {
            name: handle.name().to_string(),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn report(&self) -> HealthReport {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let running = handle.as_ref().is_some_and(|h| !h.is_finished());
        let leadership = handle.as_ref().and_then(CronJobHandle::leadership);

        HealthReport {
            status: if running { "ok" } else { "stopped" },
            job: self.name.clone(),
            running,
            leadership,
        }
    }

    /// Wait for the job to stop. The job must already be cancelled.
    pub async fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.join().await,
            None => warn!(job = %self.name, "job already joined"),
        }
    }
}

pub fn router(status: Arc<JobStatus>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(ServiceBuilder::new().layer(Extension(status)))
}

async fn healthz(Extension(status): Extension<Arc<JobStatus>>) -> (StatusCode, Json<HealthReport>) {
    let report = status.report();
    let code = if report.running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}
