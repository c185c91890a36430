//! Job definition: a named tick function plus its schedule.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One tick's worth of work.
///
/// Implementations handle (log) their own failures; a tick has no result.
/// The token is cancelled on shutdown or when leadership is lost mid-tick and
/// should be honored cooperatively.
#[async_trait]
pub trait JobFn: Send + Sync + 'static {
    async fn run(&self, token: CancellationToken);
}

/// What the runner does when a tick is due while the previous one still runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Skip the due tick; at most one tick of the job runs at a time.
    #[default]
    Skip,
    /// Start the due tick anyway; ticks may overlap.
    Allow,
}

/// A named, schedulable unit of work.
#[derive(Clone)]
pub struct Job {
    name: String,
    schedule_period: Duration,
    overlap: OverlapPolicy,
    func: Arc<dyn JobFn>,
}

impl Job {
    pub fn new(name: impl Into<String>, schedule_period: Duration, func: impl JobFn) -> Self {
        Self::from_arc(name, schedule_period, Arc::new(func))
    }

    /// Create a job from a shared tick function.
    pub fn from_arc(
        name: impl Into<String>,
        schedule_period: Duration,
        func: Arc<dyn JobFn>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule_period,
            overlap: OverlapPolicy::default(),
            func,
        }
    }

    /// Create a job from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, schedule_period: Duration, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(name, schedule_period, FnJob(f))
    }

    pub fn with_overlap_policy(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule_period(&self) -> Duration {
        self.schedule_period
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap
    }

    pub(crate) fn func(&self) -> Arc<dyn JobFn> {
        self.func.clone()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("schedule_period", &self.schedule_period)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> JobFn for FnJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self, token: CancellationToken) {
        (self.0)(token).await
    }
}
