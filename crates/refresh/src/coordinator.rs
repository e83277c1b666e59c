//! Single-flight token renewal
//!
//! However many requests discover an expired token at once, at most one
//! renewal call is outstanding, and every caller that asked while it was in
//! flight receives the same outcome.
//!
//! State machine:
//! - Idle → Refreshing (first `request_refresh`; renewal task spawned)
//! - Refreshing → Refreshing (further callers enqueue a waiter, no new call)
//! - Refreshing → Idle (renewal settles; store updated or cleared, waiters
//!   released in enqueue order)
//!
//! The renewal runs in its own task and the triggering caller is just the
//! first waiter, so dropping any caller mid-renewal never strands the state
//! in `Refreshing`. Sending to a waiter whose caller went away is a no-op.
//! If the renewal task itself unwinds, its guard still settles the waiters
//! with `SessionInvalid` and returns the state to `Idle`.
//!
//! A renewal that succeeds after the session was torn down (logout or
//! `invalidate` while it was in flight) does not resurrect the credential.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use auth_client::{CredentialStore, TokenRenewer};
use common::Secret;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics::{record_invalidated, record_joined, record_refresh};

type Outcome = Result<Secret<String>>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Outcome>>,
    },
}

struct Shared {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    renewer: Arc<dyn TokenRenewer>,
    calls: AtomicU64,
}

/// Coordinates renewals for one credential store.
///
/// Clone is cheap and every clone drives the same state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, renewer: Arc<dyn TokenRenewer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RefreshState::Idle),
                store,
                renewer,
                calls: AtomicU64::new(0),
            }),
        }
    }

    /// The store this coordinator writes renewed tokens into.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.shared.store
    }

    /// Renew the access token, or join the renewal already in flight.
    ///
    /// Resolves with the new token once it is stored. On failure the store
    /// has been cleared and every caller gets `SessionInvalid`.
    pub async fn request_refresh(&self) -> Result<Secret<String>> {
        let (tx, rx) = oneshot::channel();
        let started = {
            let mut state = self.shared.lock_state();
            if let RefreshState::Refreshing { waiters } = &mut *state {
                waiters.push(tx);
                false
            } else {
                *state = RefreshState::Refreshing { waiters: vec![tx] };
                true
            }
        };

        if started {
            info!("starting token renewal");
            let shared = self.shared.clone();
            tokio::spawn(async move { shared.run_renewal().await });
        } else {
            debug!("joining in-flight token renewal");
            record_joined();
        }

        rx.await.unwrap_or_else(|_| {
            Err(Error::SessionInvalid(
                "token renewal ended without an outcome".into(),
            ))
        })
    }

    /// Tear the session down after a non-retryable authorization failure.
    pub async fn invalidate(&self, reason: &'static str) {
        warn!(reason, "invalidating session");
        self.shared.store.clear().await;
        record_invalidated(reason);
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.shared.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Callers currently waiting on the in-flight renewal, including the one
    /// that started it.
    pub fn pending_waiters(&self) -> usize {
        match &*self.shared.lock_state() {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Renewal calls issued since construction.
    pub fn refresh_calls(&self) -> u64 {
        self.shared.calls.load(Ordering::SeqCst)
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_renewal(&self) {
        let guard = SettleOnUnwind { shared: self };
        self.calls.fetch_add(1, Ordering::SeqCst);
        let generation = self.store.generation().await;

        let outcome = match self.renewer.renew().await {
            Ok(grant) => {
                record_refresh(true);
                let stored = self
                    .store
                    .set_if_generation(grant.access_token.clone(), grant.expires_in, generation)
                    .await;
                if stored {
                    info!(expires_in = grant.expires_in, "token renewal succeeded");
                    Ok(grant.access_token)
                } else {
                    warn!("session torn down during renewal, discarding renewed token");
                    Err(Error::SessionInvalid(
                        "session ended while token renewal was in flight".into(),
                    ))
                }
            }
            Err(e) => {
                warn!(error = %e, "token renewal failed, clearing credential");
                self.store.clear().await;
                record_refresh(false);
                record_invalidated("refresh_failed");
                Err(Error::SessionInvalid(format!("token renewal failed: {e}")))
            }
        };

        std::mem::forget(guard);
        self.settle(outcome);
    }

    /// Return to `Idle` and hand `outcome` to every waiter in enqueue order.
    fn settle(&self, outcome: Outcome) {
        let waiters = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        debug!(waiters = waiters.len(), "releasing renewal waiters");
        for waiter in waiters {
            // Receiver dropped means the caller gave up; nothing to do.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Settles a renewal whose task unwound before producing an outcome.
struct SettleOnUnwind<'a> {
    shared: &'a Shared,
}

impl Drop for SettleOnUnwind<'_> {
    fn drop(&mut self) {
        warn!("token renewal aborted, releasing waiters");
        record_refresh(false);
        self.shared.settle(Err(Error::SessionInvalid(
            "token renewal aborted".into(),
        )));
    }
}
