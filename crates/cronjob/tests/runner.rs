//! Cron job runner behavior: schedule, cancellation, overlap and leadership.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use compass_core::CoreError;
use compass_cronjob::{
    CancellationToken, CronJobError, CronJobHandle, ElectionConfig, InMemoryLeaderElector, Job,
    LeaderElector, LeadershipState, OverlapPolicy, run_cron_job,
};

const PERIOD: Duration = Duration::from_secs(10);

fn counting_job(calls: Arc<AtomicUsize>) -> Job {
    Job::from_fn("counting", PERIOD, move |_token| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    })
}

fn election(identity: &str) -> ElectionConfig {
    ElectionConfig::enabled("compass-system", "counting", identity)
        .with_lease(Duration::from_secs(60), Duration::from_secs(15))
}

#[tokio::test(start_paused = true)]
async fn ticks_immediately_then_every_period() {
    let calls = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let handle = run_cron_job(
        token.clone(),
        &ElectionConfig::disabled(),
        None,
        counting_job(calls.clone()),
    )
    .unwrap();
    assert_eq!(handle.leadership(), None);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    token.cancel();
    handle.join().await;
}

#[tokio::test]
async fn zero_period_is_rejected() {
    let job = Job::from_fn("busy", Duration::ZERO, |_token| async {});

    let err = run_cron_job(
        CancellationToken::new(),
        &ElectionConfig::disabled(),
        None,
        job,
    )
    .unwrap_err();

    assert!(matches!(err, CronJobError::InvalidSchedulePeriod { job } if job == "busy"));
}

#[tokio::test]
async fn election_without_backend_is_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));

    let err = run_cron_job(
        CancellationToken::new(),
        &election("pod-0"),
        None,
        counting_job(calls.clone()),
    )
    .unwrap_err();

    assert!(matches!(err, CronJobError::MissingElector { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_election_config_is_rejected() {
    let elector: Arc<dyn LeaderElector> = Arc::new(InMemoryLeaderElector::default());

    let err = run_cron_job(
        CancellationToken::new(),
        &election(""),
        Some(elector),
        counting_job(Arc::new(AtomicUsize::new(0))),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        CronJobError::InvalidElectionConfig(CoreError::InvalidSetting { ref key, .. }) if key == "identity"
    ));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_new_ticks() {
    let calls = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let handle = run_cron_job(
        token.clone(),
        &ElectionConfig::disabled(),
        None,
        counting_job(calls.clone()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    token.cancel();
    handle.join().await;

    let after_shutdown = calls.load(Ordering::SeqCst);
    assert_eq!(after_shutdown, 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_shutdown);
}

#[tokio::test(start_paused = true)]
async fn shutdown_joins_the_in_flight_tick() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let token = CancellationToken::new();

    let job = Job::from_fn("waiting", PERIOD, move |tick_token| {
        let flag = flag.clone();
        async move {
            tick_token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        }
    });

    let handle = run_cron_job(token.clone(), &ElectionConfig::disabled(), None, job).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!finished.load(Ordering::SeqCst));

    token.cancel();
    handle.join().await;
    assert!(finished.load(Ordering::SeqCst));
}

fn slow_job(starts: Arc<AtomicUsize>, overlap: OverlapPolicy) -> Job {
    Job::from_fn("slow", PERIOD, move |_token| {
        let starts = starts.clone();
        async move {
            starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(25)).await;
        }
    })
    .with_overlap_policy(overlap)
}

#[tokio::test(start_paused = true)]
async fn skip_policy_never_overlaps_ticks() {
    let starts = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let handle = run_cron_job(
        token.clone(),
        &ElectionConfig::disabled(),
        None,
        slow_job(starts.clone(), OverlapPolicy::Skip),
    )
    .unwrap();

    // Ticks due at 0s and 30s run; 10s and 20s fall inside the first tick.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(starts.load(Ordering::SeqCst), 2);

    token.cancel();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn allow_policy_overlaps_ticks() {
    let starts = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let handle = run_cron_job(
        token.clone(),
        &ElectionConfig::disabled(),
        None,
        slow_job(starts.clone(), OverlapPolicy::Allow),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(starts.load(Ordering::SeqCst), 4);

    token.cancel();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_tick_does_not_stop_the_runner() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let token = CancellationToken::new();

    let job = Job::from_fn("flaky", PERIOD, move |_token| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick blows up");
            }
        }
    });

    let handle = run_cron_job(token.clone(), &ElectionConfig::disabled(), None, job).unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    token.cancel();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn follower_never_runs_the_tick() {
    let elector = Arc::new(InMemoryLeaderElector::new());
    let config = election("pod-0");
    elector
        .try_acquire(&config.lock_key(), "pod-1", Duration::from_secs(600))
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();
    let handle = run_cron_job(
        token.clone(),
        &config,
        Some(elector.clone() as Arc<dyn LeaderElector>),
        counting_job(calls.clone()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(handle.leadership(), Some(LeadershipState::NotLeader));

    token.cancel();
    handle.join().await;
    assert_eq!(
        elector.current_leader(&config.lock_key()).await.unwrap(),
        Some("pod-1".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn leader_runs_on_schedule_and_resigns_on_shutdown() {
    let elector = Arc::new(InMemoryLeaderElector::new());
    let config = election("pod-0");

    let calls = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();
    let handle = run_cron_job(
        token.clone(),
        &config,
        Some(elector.clone() as Arc<dyn LeaderElector>),
        counting_job(calls.clone()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(handle.leadership(), Some(LeadershipState::Leader));

    token.cancel();
    handle.join().await;
    assert_eq!(elector.current_leader(&config.lock_key()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn follower_takes_over_after_leader_resigns() {
    let elector = Arc::new(InMemoryLeaderElector::new());
    let leader_calls = Arc::new(AtomicUsize::new(0));
    let follower_calls = Arc::new(AtomicUsize::new(0));

    let leader_token = CancellationToken::new();
    let leader = run_cron_job(
        leader_token.clone(),
        &election("pod-0"),
        Some(elector.clone() as Arc<dyn LeaderElector>),
        counting_job(leader_calls.clone()),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let follower_token = CancellationToken::new();
    let follower = run_cron_job(
        follower_token.clone(),
        &election("pod-1"),
        Some(elector.clone() as Arc<dyn LeaderElector>),
        counting_job(follower_calls.clone()),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(leader_calls.load(Ordering::SeqCst), 1);
    assert_eq!(follower_calls.load(Ordering::SeqCst), 0);

    leader_token.cancel();
    leader.join().await;

    // The follower retries at 16s and leads from then on; its ticks at 1s
    // and 11s were skipped, the ones at 21s and 31s run.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(follower_calls.load(Ordering::SeqCst), 2);
    assert_eq!(follower.leadership(), Some(LeadershipState::Leader));

    follower_token.cancel();
    follower.join().await;
}

struct Replica {
    token: CancellationToken,
    calls: Arc<AtomicUsize>,
    handle: CronJobHandle,
}

fn start_replica(
    elector: &Arc<InMemoryLeaderElector>,
    identity: &str,
    period: Duration,
    lease: Duration,
    renew: Duration,
) -> Replica {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let job = Job::from_fn("resync", period, move |_token| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let config =
        ElectionConfig::enabled("compass-system", "resync", identity).with_lease(lease, renew);
    let token = CancellationToken::new();
    let handle = run_cron_job(
        token.clone(),
        &config,
        Some(elector.clone() as Arc<dyn LeaderElector>),
        job,
    )
    .unwrap();

    Replica {
        token,
        calls,
        handle,
    }
}

const LOCK_KEY: &str = "compass-system/resync";

#[tokio::test(start_paused = true)]
async fn one_replica_runs_when_the_lease_is_shorter_than_the_period() {
    let elector = Arc::new(InMemoryLeaderElector::new());
    let period = Duration::from_secs(300);
    let lease = Duration::from_secs(60);
    let renew = Duration::from_secs(15);

    let a = start_replica(&elector, "pod-a", period, lease, renew);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let b = start_replica(&elector, "pod-b", period, lease, renew);

    // pod-a ticks at 0s, 300s, 600s, 900s and 1200s.
    tokio::time::sleep(Duration::from_secs(1250)).await;

    assert_eq!(a.calls.load(Ordering::SeqCst), 5);
    assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    assert_eq!(a.handle.leadership(), Some(LeadershipState::Leader));
    assert_eq!(b.handle.leadership(), Some(LeadershipState::NotLeader));
    assert_eq!(
        elector.current_leader(LOCK_KEY).await.unwrap(),
        Some("pod-a".to_string())
    );

    for replica in [a, b] {
        replica.token.cancel();
        replica.handle.join().await;
    }
}

#[tokio::test(start_paused = true)]
async fn late_replica_stays_follower_with_sub_second_leases() {
    let elector = Arc::new(InMemoryLeaderElector::new());
    let period = Duration::from_millis(400);
    let lease = Duration::from_millis(100);
    let renew = Duration::from_millis(30);

    let a = start_replica(&elector, "pod-a", period, lease, renew);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let b = start_replica(&elector, "pod-b", period, lease, renew);

    tokio::time::sleep(Duration::from_millis(1300)).await;

    // pod-a ticks at 0ms, 400ms, 800ms and 1200ms.
    assert_eq!(a.calls.load(Ordering::SeqCst), 4);
    assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    assert_eq!(a.handle.leadership(), Some(LeadershipState::Leader));
    assert_eq!(b.handle.leadership(), Some(LeadershipState::NotLeader));
    assert_eq!(
        elector.current_leader(LOCK_KEY).await.unwrap(),
        Some("pod-a".to_string())
    );

    for replica in [a, b] {
        replica.token.cancel();
        replica.handle.join().await;
    }
}

#[tokio::test(start_paused = true)]
async fn follower_takes_over_within_one_renew_interval() {
    let elector = Arc::new(InMemoryLeaderElector::new());
    let period = Duration::from_secs(300);
    let lease = Duration::from_secs(60);
    let renew = Duration::from_secs(15);

    let a = start_replica(&elector, "pod-a", period, lease, renew);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let b = start_replica(&elector, "pod-b", period, lease, renew);
    tokio::time::sleep(Duration::from_secs(100)).await;

    a.token.cancel();
    a.handle.join().await;
    assert_eq!(elector.current_leader(LOCK_KEY).await.unwrap(), None);

    tokio::time::sleep(renew).await;
    assert_eq!(b.handle.leadership(), Some(LeadershipState::Leader));
    assert_eq!(
        elector.current_leader(LOCK_KEY).await.unwrap(),
        Some("pod-b".to_string())
    );

    // pod-b's next tick is due at 301s.
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.calls.load(Ordering::SeqCst), 1);

    b.token.cancel();
    b.handle.join().await;
}
