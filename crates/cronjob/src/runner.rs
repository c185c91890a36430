//! Cron job runner.
//!
//! One background task per job drives ticks on a fixed period:
//! - the first tick fires immediately, then every `schedule_period`
//! - with election enabled, a maintenance task next to the ticker keeps the
//!   lease renewed every `renew_interval`, and each tick is gated by the
//!   [`LeaderElectionGuard`] state it maintains
//! - cancellation stops new ticks; in-flight ticks see the cancelled token
//!   and are joined before the task exits

use std::sync::Arc;
use std::time::Instant;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::election::{ElectionConfig, LeaderElectionGuard, LeaderElector, LeadershipState};
use crate::error::CronJobError;
use crate::job::{Job, JobFn, OverlapPolicy};

/// Handle to a running cron job.
#[derive(Debug)]
pub struct CronJobHandle {
    name: String,
    guard: Option<Arc<LeaderElectionGuard>>,
    join: JoinHandle<()>,
}

impl CronJobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Leadership of this replica, when election is enabled.
    pub fn leadership(&self) -> Option<LeadershipState> {
        self.guard.as_ref().map(|guard| guard.state())
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the job to stop. Only returns after the token was cancelled.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(job = %self.name, error = %e, "cron job task failed");
        }
    }
}

/// Start `job` in the background and return once it is launched.
///
/// Errors are setup-time only: a zero schedule period, an invalid election
/// configuration, or election enabled without an elector backend. Must be
/// called from within a tokio runtime.
pub fn run_cron_job(
    token: CancellationToken,
    election: &ElectionConfig,
    elector: Option<Arc<dyn LeaderElector>>,
    job: Job,
) -> Result<CronJobHandle, CronJobError> {
    if job.schedule_period().is_zero() {
        return Err(CronJobError::InvalidSchedulePeriod {
            job: job.name().to_string(),
        });
    }

    let guard = if election.election_enabled {
        election
            .validate()
            .map_err(CronJobError::InvalidElectionConfig)?;
        let elector = elector.ok_or_else(|| CronJobError::MissingElector {
            job: job.name().to_string(),
        })?;
        Some(Arc::new(LeaderElectionGuard::new(election, elector)))
    } else {
        None
    };

    let name = job.name().to_string();
    let join = tokio::spawn(run_loop(token, job, guard.clone()));

    Ok(CronJobHandle { name, guard, join })
}

async fn run_loop(token: CancellationToken, job: Job, guard: Option<Arc<LeaderElectionGuard>>) {
    let name: Arc<str> = Arc::from(job.name());
    info!(
        job = %name,
        period = ?job.schedule_period(),
        election = guard.is_some(),
        "cron job started"
    );

    let maintenance = match &guard {
        Some(guard) => {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                _ = guard.ensure_leadership() => {}
            }
            Some(tokio::spawn(maintain_leadership(guard.clone(), token.clone())))
        }
        None => None,
    };

    let mut ticker = tokio::time::interval(job.schedule_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        while let Some(result) = in_flight.try_join_next() {
            log_tick_result(&name, result);
        }

        if job.overlap_policy() == OverlapPolicy::Skip && !in_flight.is_empty() {
            debug!(job = %name, "previous tick still running; skipping");
            continue;
        }

        in_flight.spawn(run_tick(
            name.clone(),
            job.func(),
            guard.clone(),
            token.clone(),
        ));
    }

    info!(job = %name, in_flight = in_flight.len(), "cron job stopping");
    while let Some(result) = in_flight.join_next().await {
        log_tick_result(&name, result);
    }

    if let Some(maintenance) = maintenance {
        if let Err(e) = maintenance.await {
            error!(job = %name, error = %e, "leadership maintenance task failed");
        }
    }
    if let Some(guard) = guard {
        guard.resign().await;
    }
    info!(job = %name, "cron job stopped");
}

async fn maintain_leadership(guard: Arc<LeaderElectionGuard>, token: CancellationToken) {
    guard.maintain(&token).await;
}

async fn run_tick(
    name: Arc<str>,
    func: Arc<dyn JobFn>,
    guard: Option<Arc<LeaderElectionGuard>>,
    token: CancellationToken,
) {
    let started = Instant::now();

    match guard {
        None => func.run(token.child_token()).await,
        Some(guard) => {
            let ran = guard
                .run_as_leader(&token, |tick_token| func.run(tick_token))
                .await;
            if !ran {
                debug!(job = %name, "not the leader; skipping tick");
                return;
            }
        }
    }

    debug!(
        job = %name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "tick finished"
    );
}

fn log_tick_result(name: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(job = %name, error = %e, "tick panicked");
    }
}
