//! In-memory access credential with lazy expiry
//!
//! Holds at most one access token and the instant it expires. A token is only
//! handed out while `now + safety_margin < expires_at`; past that point the
//! slot lapses on the next read, without anyone calling `clear`.
//!
//! Writes come from two places only: the refresh coordinator (new token on
//! renewal, teardown on failure) and the session glue (login, logout). The
//! transport only reads.

use std::time::Duration;

use common::Secret;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_SAFETY_MARGIN, MAX_TOKEN_LIFETIME};
use crate::error::Result;
use crate::mirror::{CredentialMirror, MirrorSnapshot};
use crate::token::User;

/// An access token and its absolute expiry.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: Secret<String>,
    pub expires_at: Instant,
}

/// Result of reading the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialLookup {
    /// Token usable for at least the safety margin.
    Valid(Secret<String>),
    /// A token was held but aged into the safety margin and was discarded.
    /// The session may still be renewable.
    Lapsed,
    /// Never set, or torn down by `clear`.
    Absent,
}

impl CredentialLookup {
    pub fn into_token(self) -> Option<Secret<String>> {
        match self {
            CredentialLookup::Valid(token) => Some(token),
            CredentialLookup::Lapsed | CredentialLookup::Absent => None,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Absent,
    Lapsed,
    Held(Credential),
}

#[derive(Debug)]
struct State {
    slot: Slot,
    user: Option<User>,
    /// Bumped by every `clear`.
    generation: u64,
}

/// Process-wide credential holder, shared via `Arc` between the session glue,
/// the refresh coordinator and the transport.
///
/// The tokio Mutex serializes replace/clear and, when a mirror is attached,
/// the file write that goes with them.
#[derive(Debug)]
pub struct CredentialStore {
    state: Mutex<State>,
    safety_margin: Duration,
    mirror: Option<CredentialMirror>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// Empty store with the default 60 second safety margin and no mirror.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slot: Slot::Absent,
                user: None,
                generation: 0,
            }),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            mirror: None,
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Mirror every change to a durable file.
    pub fn with_mirror(mut self, mirror: CredentialMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Store a token expiring `expires_in_secs` from now, replacing any
    /// previous one.
    ///
    /// Lifetimes above `MAX_TOKEN_LIFETIME` are clamped.
    pub async fn set(&self, token: Secret<String>, expires_in_secs: u64) {
        let mut state = self.state.lock().await;
        self.store_locked(&mut state, token, expires_in_secs).await;
    }

    /// Like `set`, but only if no `clear` happened since `generation` was
    /// read. Returns whether the token was stored.
    pub async fn set_if_generation(
        &self,
        token: Secret<String>,
        expires_in_secs: u64,
        generation: u64,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("credential torn down since renewal started, not storing");
            return false;
        }
        self.store_locked(&mut state, token, expires_in_secs).await;
        true
    }

    /// Teardown counter; changes whenever `clear` runs.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    async fn store_locked(&self, state: &mut State, token: Secret<String>, expires_in_secs: u64) {
        let expires_in = Duration::from_secs(expires_in_secs).min(MAX_TOKEN_LIFETIME);
        state.slot = Slot::Held(Credential {
            token: token.clone(),
            expires_at: deadline(Instant::now(), expires_in),
        });
        debug!(expires_in_secs, "stored access token");

        if let Some(mirror) = &self.mirror {
            let snapshot = MirrorSnapshot {
                token,
                expires_at_ms: now_millis().saturating_add(millis(expires_in)),
                user: state.user.clone(),
            };
            if let Err(e) = mirror.save(&snapshot).await {
                warn!(error = %e, "failed to mirror credential");
            }
        }
    }

    /// The current token, or `None` once within the safety margin of expiry.
    pub async fn get(&self) -> Option<Secret<String>> {
        self.lookup().await.into_token()
    }

    /// Read the slot, lapsing a token that has entered the safety margin.
    pub async fn lookup(&self) -> CredentialLookup {
        let mut state = self.state.lock().await;
        let usable = match &state.slot {
            Slot::Absent => return CredentialLookup::Absent,
            Slot::Lapsed => return CredentialLookup::Lapsed,
            Slot::Held(credential) => {
                if self.is_usable(credential, Instant::now()) {
                    Some(credential.token.clone())
                } else {
                    None
                }
            }
        };
        match usable {
            Some(token) => CredentialLookup::Valid(token),
            None => {
                debug!("access token within safety margin of expiry, discarding");
                state.slot = Slot::Lapsed;
                CredentialLookup::Lapsed
            }
        }
    }

    /// Absolute expiry of the held token, if any (ignores the safety margin).
    pub async fn expires_at(&self) -> Option<Instant> {
        match &self.state.lock().await.slot {
            Slot::Held(credential) => Some(credential.expires_at),
            Slot::Absent | Slot::Lapsed => None,
        }
    }

    /// Drop the token and the cached user. Idempotent.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let had_session = !matches!(state.slot, Slot::Absent) || state.user.is_some();
        state.slot = Slot::Absent;
        state.user = None;
        state.generation = state.generation.wrapping_add(1);
        if had_session {
            info!("credential cleared");
        }

        if let Some(mirror) = &self.mirror
            && let Err(e) = mirror.remove().await
        {
            warn!(error = %e, "failed to remove credential mirror");
        }
    }

    /// Cache the user identity next to the credential.
    pub async fn set_user(&self, user: User) {
        let mut state = self.state.lock().await;
        state.user = Some(user);

        if let (Some(mirror), Slot::Held(credential)) = (&self.mirror, &state.slot) {
            let remaining = credential
                .expires_at
                .saturating_duration_since(Instant::now());
            let snapshot = MirrorSnapshot {
                token: credential.token.clone(),
                expires_at_ms: now_millis().saturating_add(millis(remaining)),
                user: state.user.clone(),
            };
            if let Err(e) = mirror.save(&snapshot).await {
                warn!(error = %e, "failed to mirror user");
            }
        }
    }

    pub async fn user(&self) -> Option<User> {
        self.state.lock().await.user.clone()
    }

    /// Load the mirrored credential, if any, into memory.
    ///
    /// Returns `true` when a snapshot still outside the safety margin was
    /// restored. The caller must confirm it against the server before
    /// treating the session as authenticated. A stale snapshot is deleted.
    pub async fn restore_from_mirror(&self) -> Result<bool> {
        let Some(mirror) = &self.mirror else {
            return Ok(false);
        };
        let Some(snapshot) = mirror.load().await? else {
            return Ok(false);
        };

        let remaining_ms = snapshot.expires_at_ms.saturating_sub(now_millis());
        let remaining = Duration::from_millis(remaining_ms).min(MAX_TOKEN_LIFETIME);
        if remaining <= self.safety_margin {
            debug!("mirrored credential already expired, discarding");
            mirror.remove().await?;
            return Ok(false);
        }

        let mut state = self.state.lock().await;
        state.slot = Slot::Held(Credential {
            token: snapshot.token,
            expires_at: deadline(Instant::now(), remaining),
        });
        state.user = snapshot.user;
        info!(
            remaining_secs = remaining.as_secs(),
            "restored unverified credential from mirror"
        );
        Ok(true)
    }

    fn is_usable(&self, credential: &Credential, now: Instant) -> bool {
        now.checked_add(self.safety_margin)
            .is_some_and(|usable_until| usable_until < credential.expires_at)
    }
}

/// `now + lifetime`, or `now` (already lapsed) if the clock cannot represent it.
fn deadline(now: Instant, lifetime: Duration) -> Instant {
    now.checked_add(lifetime).unwrap_or(now)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn now_millis() -> u64 {
    millis(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default(),
    )
}
