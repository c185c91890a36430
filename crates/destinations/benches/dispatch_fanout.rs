use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use async_trait::async_trait;
use compass_core::TenantId;
use compass_destinations::{
    DestinationSyncer, SubscribedTenantFetcher, SyncError, TenantSyncDispatcher,
};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tenant directory whose syncs only yield once.
struct YieldingDirectory {
    tenants: Vec<TenantId>,
}

impl YieldingDirectory {
    fn new(count: usize) -> Self {
        let tenants = (0..count)
            .map(|i| TenantId::new(format!("tenant-{i:05}")).unwrap())
            .collect();
        Self { tenants }
    }
}

#[async_trait]
impl SubscribedTenantFetcher for YieldingDirectory {
    async fn subscribed_tenant_ids(
        &self,
        _token: &CancellationToken,
    ) -> Result<Vec<TenantId>, SyncError> {
        Ok(self.tenants.clone())
    }
}

#[async_trait]
impl DestinationSyncer for YieldingDirectory {
    async fn sync_tenant_destinations(
        &self,
        _token: &CancellationToken,
        _tenant: &TenantId,
    ) -> Result<(), SyncError> {
        tokio::task::yield_now().await;
        Ok(())
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_tick_by_tenant_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_tick_by_tenant_count");
    let rt = runtime();

    for tenants in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*tenants as u64));
        group.bench_with_input(BenchmarkId::new("tenants", tenants), tenants, |b, &n| {
            let dispatcher = TenantSyncDispatcher::from_syncer(
                Arc::new(YieldingDirectory::new(n)),
                NonZeroUsize::new(10).unwrap(),
            );
            let token = CancellationToken::new();

            b.iter(|| black_box(rt.block_on(dispatcher.dispatch(&token))));
        });
    }

    group.finish();
}

fn bench_tick_by_parallelism(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_tick_by_parallelism");
    group.throughput(Throughput::Elements(500));
    let rt = runtime();

    for weight in [1usize, 4, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::new("parallel_tenants", weight), weight, |b, &k| {
            let dispatcher = TenantSyncDispatcher::from_syncer(
                Arc::new(YieldingDirectory::new(500)),
                NonZeroUsize::new(k).unwrap(),
            );
            let token = CancellationToken::new();

            b.iter(|| black_box(rt.block_on(dispatcher.dispatch(&token))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tick_by_tenant_count, bench_tick_by_parallelism);
criterion_main!(benches);
