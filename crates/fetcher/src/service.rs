//! Process wiring: settings in, running resync job and health server out.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use compass_cronjob::LeaderElector;
use compass_destinations::start_resync_job;
use compass_infra::{
    ElectionBackend, HttpDestinationResyncer, PostgresLeaseElector, PostgresTenantFetcher,
    Settings, db,
};

use crate::health::{self, JobStatus};

/// Run the service until Ctrl-C (or SIGTERM).
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let pool = db::connect(&settings.database)
        .await
        .context("failed to connect to postgres")?;

    let fetcher = Arc::new(PostgresTenantFetcher::new(pool.clone()));
    let resyncer = Arc::new(HttpDestinationResyncer::new(&settings.destination_fetcher)?);
    let elector = build_elector(&settings, pool).await?;

    let token = CancellationToken::new();
    let handle = start_resync_job(
        token.child_token(),
        &settings.job,
        elector,
        fetcher,
        resyncer,
    )?;
    info!(
        job = handle.name(),
        period_secs = settings.job.job_schedule_period.as_secs(),
        parallel_tenants = settings.job.parallel_tenants,
        election_enabled = settings.job.election.election_enabled,
        "resync job started"
    );
    let status = Arc::new(JobStatus::new(handle));

    let listener = TcpListener::bind(settings.health_address)
        .await
        .with_context(|| format!("failed to bind {}", settings.health_address))?;
    info!(address = %settings.health_address, "health server listening");
    let server = tokio::spawn(
        axum::serve(listener, health::router(status.clone()))
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future(),
    );

    shutdown_signal().await;
    info!("shutdown requested");
    token.cancel();

    status.join().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "health server failed"),
        Err(e) => warn!(error = %e, "health server task failed"),
    }

    info!("destination fetcher stopped");
    Ok(())
}

async fn build_elector(
    settings: &Settings,
    pool: PgPool,
) -> anyhow::Result<Option<Arc<dyn LeaderElector>>> {
    let election = &settings.job.election;
    if !election.election_enabled {
        return Ok(None);
    }

    let elector: Arc<dyn LeaderElector> = match settings.election_backend {
        ElectionBackend::Postgres => {
            let elector = PostgresLeaseElector::new(pool);
            elector
                .ensure_schema()
                .await
                .context("failed to create the lease table")?;
            Arc::new(elector)
        }
        ElectionBackend::Redis => redis_elector(settings).await?,
    };

    info!(
        backend = ?settings.election_backend,
        lock = %election.lock_key(),
        identity = %election.identity,
        "leader election enabled"
    );
    Ok(Some(elector))
}

#[cfg(feature = "redis")]
async fn redis_elector(settings: &Settings) -> anyhow::Result<Arc<dyn LeaderElector>> {
    let url = settings
        .redis_url
        .as_deref()
        .context("APP_REDIS_URL is required for the redis election backend")?;
    let elector = compass_infra::RedisLeaseElector::connect(url)
        .await
        .context("failed to connect to redis")?;
    Ok(Arc::new(elector))
}

#[cfg(not(feature = "redis"))]
async fn redis_elector(_settings: &Settings) -> anyhow::Result<Arc<dyn LeaderElector>> {
    anyhow::bail!("the redis election backend needs the `redis` feature")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
