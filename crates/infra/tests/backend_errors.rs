//! Database failures surface as return values and are logged once, by the
//! caller: the instrumented backend calls themselves emit no error events.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use compass_cronjob::{CancellationToken, ElectionError, LeaderElector};
use compass_destinations::{SyncError, TenantFetcher};
use compass_infra::{PostgresLeaseElector, PostgresTenantFetcher};

#[derive(Clone, Default)]
struct ErrorEvents(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ErrorEvents {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

async fn closed_pool() -> PgPool {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://compass@localhost/compass")
        .unwrap();
    pool.close().await;
    pool
}

#[tokio::test]
async fn tenant_query_failure_is_returned_without_an_error_event() {
    let events = ErrorEvents::default();
    let _subscriber =
        tracing::subscriber::set_default(Registry::default().with(events.clone()));

    let fetcher = PostgresTenantFetcher::new(closed_pool().await);
    let result = fetcher
        .subscribed_runtime_tenants(&CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SyncError::Enumeration(_))));
    assert_eq!(events.count(), 0);
}

#[tokio::test]
async fn lease_backend_failures_are_returned_without_error_events() {
    let events = ErrorEvents::default();
    let _subscriber =
        tracing::subscriber::set_default(Registry::default().with(events.clone()));

    let elector = PostgresLeaseElector::new(closed_pool().await);
    let lease = Duration::from_secs(60);
    let key = "compass-system/resync";

    assert!(matches!(
        elector.try_acquire(key, "pod-0", lease).await,
        Err(ElectionError::Backend(_))
    ));
    assert!(matches!(
        elector.renew(key, "token", lease).await,
        Err(ElectionError::Backend(_))
    ));
    assert!(matches!(
        elector.release(key, "token").await,
        Err(ElectionError::Backend(_))
    ));
    assert_eq!(events.count(), 0);
}
