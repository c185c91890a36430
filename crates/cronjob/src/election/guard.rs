//! Leadership gate around job ticks.
//!
//! Leadership is kept by [`LeaderElectionGuard::maintain`], which runs next to
//! the ticker for the whole life of the job: it renews a held lease every
//! `renew_interval` and, on followers, retries acquisition. Ticks only read
//! the resulting state.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ElectionConfig, LeaderElector, LeadershipResult, RenewalResult};

/// Leadership as last observed by this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadershipState {
    NotLeader,
    AcquiringLeadership,
    Leader,
}

/// One leadership term: from acquisition until the lease is lost or released.
#[derive(Debug)]
struct Term {
    lease_token: String,
    /// Local view of the lease end; a stale lease stops counting as leadership
    /// even if the backend cannot be reached to confirm the loss.
    expires_at: Instant,
    /// Cancelled when the term ends.
    ended: CancellationToken,
}

#[derive(Debug)]
struct GuardState {
    acquiring: bool,
    term: Option<Term>,
}

/// Runs ticks only while this replica holds the job's lease.
///
/// Transitions are driven by the backend: a renewed or acquired lease means
/// `Leader`; a lost lease, a rival holder or any backend error means
/// `NotLeader`. A lease not renewed before its local expiry also means
/// `NotLeader`.
pub struct LeaderElectionGuard {
    elector: Arc<dyn LeaderElector>,
    lock_key: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    state: Mutex<GuardState>,
}

impl LeaderElectionGuard {
    pub fn new(config: &ElectionConfig, elector: Arc<dyn LeaderElector>) -> Self {
        Self {
            elector,
            lock_key: config.lock_key(),
            identity: config.identity.clone(),
            lease_duration: config.lease_duration,
            renew_interval: config.renew_interval,
            state: Mutex::new(GuardState {
                acquiring: false,
                term: None,
            }),
        }
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> LeadershipState {
        let state = self.lock();
        match &state.term {
            Some(term) if term.expires_at > Instant::now() => LeadershipState::Leader,
            _ if state.acquiring => LeadershipState::AcquiringLeadership,
            _ => LeadershipState::NotLeader,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state() == LeadershipState::Leader
    }

    /// Make sure this replica leads: renew a held lease, otherwise try to
    /// acquire one. Returns whether it is the leader afterwards.
    pub async fn ensure_leadership(&self) -> bool {
        if self.held_token().is_some() && self.renew_held().await {
            return true;
        }
        self.acquire().await
    }

    /// Keep leadership current until `token` is cancelled: every
    /// `renew_interval` renew the held lease or try to acquire a free one.
    pub async fn maintain(&self, token: &CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(self.renew_interval) => {}
            }

            tokio::select! {
                biased;
                () = token.cancelled() => return,
                _ = self.ensure_leadership() => {}
            }
        }
    }

    /// Run `tick` if this replica currently leads.
    ///
    /// The tick gets a child of `token`; it is cancelled if the term ends
    /// mid-tick (lease lost or locally expired), and the tick is still awaited
    /// to completion. Returns whether the tick ran.
    pub async fn run_as_leader<F, Fut>(&self, token: &CancellationToken, tick: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()>,
    {
        if token.is_cancelled() || !self.is_leader() {
            return false;
        }
        let Some(term_ended) = self.term_token() else {
            return false;
        };

        let tick_token = token.child_token();
        let tick = tick(tick_token.clone());
        tokio::pin!(tick);
        let term_over = self.term_over(&term_ended);
        tokio::pin!(term_over);

        tokio::select! {
            () = &mut tick => {}
            () = &mut term_over => {
                warn!(lock = %self.lock_key, identity = %self.identity, "leadership lost during tick; cancelling it");
                tick_token.cancel();
                (&mut tick).await;
            }
        }

        true
    }

    /// Release a held lease, e.g. on shutdown.
    pub async fn resign(&self) {
        let Some(term) = self.end_term() else {
            return;
        };

        match self.elector.release(&self.lock_key, &term.lease_token).await {
            Ok(true) => info!(lock = %self.lock_key, identity = %self.identity, "released leadership"),
            Ok(false) => debug!(lock = %self.lock_key, "lease already gone on release"),
            Err(e) => warn!(lock = %self.lock_key, error = %e, "failed to release leadership"),
        }
    }

    async fn acquire(&self) -> bool {
        self.lock().acquiring = true;

        let result = self
            .elector
            .try_acquire(&self.lock_key, &self.identity, self.lease_duration)
            .await;
        self.lock().acquiring = false;

        match result {
            Ok(LeadershipResult::Acquired {
                lease_token,
                lease_duration,
            }) => {
                info!(lock = %self.lock_key, identity = %self.identity, ?lease_duration, "acquired leadership");
                self.begin_term(lease_token, lease_duration);
                true
            }
            Ok(LeadershipResult::NotLeader { current_leader }) => {
                debug!(
                    lock = %self.lock_key,
                    current_leader = current_leader.as_deref().unwrap_or("unknown"),
                    "another replica holds leadership"
                );
                self.end_term();
                false
            }
            Err(e) => {
                warn!(lock = %self.lock_key, error = %e, "leadership check failed; assuming not leader");
                self.end_term();
                false
            }
        }
    }

    async fn renew_held(&self) -> bool {
        let Some(token) = self.held_token() else {
            return false;
        };

        match self
            .elector
            .renew(&self.lock_key, &token, self.lease_duration)
            .await
        {
            Ok(RenewalResult::Renewed { lease_duration }) => {
                if let Some(term) = self.lock().term.as_mut() {
                    term.expires_at = Instant::now() + lease_duration;
                }
                true
            }
            Ok(result) => {
                info!(lock = %self.lock_key, identity = %self.identity, ?result, "leadership lost");
                self.end_term();
                false
            }
            Err(e) => {
                warn!(lock = %self.lock_key, error = %e, "lease renewal failed; assuming not leader");
                self.end_term();
                false
            }
        }
    }

    /// Resolves when the term behind `ended` is over, either because it was
    /// ended explicitly or because its lease ran out locally.
    async fn term_over(&self, ended: &CancellationToken) {
        loop {
            let Some(expires_at) = self.expires_at() else {
                return;
            };
            tokio::select! {
                () = ended.cancelled() => return,
                () = tokio::time::sleep_until(expires_at) => {}
            }
            if !self.is_leader() {
                return;
            }
        }
    }

    fn begin_term(&self, lease_token: String, lease_duration: Duration) {
        let term = Term {
            lease_token,
            expires_at: Instant::now() + lease_duration,
            ended: CancellationToken::new(),
        };
        if let Some(old) = self.lock().term.replace(term) {
            old.ended.cancel();
        }
    }

    fn end_term(&self) -> Option<Term> {
        let term = self.lock().term.take();
        if let Some(term) = &term {
            term.ended.cancel();
        }
        term
    }

    fn held_token(&self) -> Option<String> {
        self.lock().term.as_ref().map(|term| term.lease_token.clone())
    }

    fn term_token(&self) -> Option<CancellationToken> {
        self.lock().term.as_ref().map(|term| term.ended.clone())
    }

    fn expires_at(&self) -> Option<Instant> {
        self.lock().term.as_ref().map(|term| term.expires_at)
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LeaderElectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElectionGuard")
            .field("lock_key", &self.lock_key)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
