//! Authentication session lifecycle.
//!
//! The store hydrates synchronously from persistent storage, verifies a bare
//! token asynchronously and invalidates globally on `clear`. Every
//! invalidation bumps an epoch; asynchronous results captured under an older
//! epoch are dropped instead of resurrecting a session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::auth::{AuthUser, TokenSource, UserVerifier, VerifyError, normalize_token};
use crate::navigation::{LOGIN_PATH, NavigationRequest, Navigator};
use crate::storage::{
    PersistentKv, TOKEN_KEY, USER_KEY, read_or_absent, remove_logged, write_logged,
};
use crate::view_router::DashboardView;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<AuthUser>,
    pub token: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Anonymous,
    Verifying,
    Authenticated,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub session: Session,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    Logout,
    SessionExpired,
    VerificationFailed,
}

impl ClearReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::SessionExpired => "session_expired",
            Self::VerificationFailed => "verification_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Dashboard opened after a boot-time verification succeeds.
    pub verified_landing_view: Option<DashboardView>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verified_landing_view: Some(DashboardView::Users),
        }
    }
}

#[must_use = "a pending verification left unresolved is abandoned on drop"]
#[derive(Debug)]
pub enum Hydration {
    Anonymous,
    Restored(AuthUser),
    VerificationPending(PendingVerification),
}

/// Verification scheduled by [`SessionStore::hydrate`], bound to the epoch
/// hydration ran under. Resolving consumes it, so it runs at most once.
///
/// Dropping it unresolved (or cancelling `resolve` mid-flight) abandons the
/// verification: the session falls back to anonymous in memory and the
/// persisted token is retried on the next hydrate.
#[must_use = "a pending verification does nothing until resolved"]
#[derive(Debug)]
pub struct PendingVerification {
    store: SessionStore,
    token: String,
    epoch: u64,
}

impl PendingVerification {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub async fn resolve(self, verifier: &dyn UserVerifier) -> VerifyOutcome {
        self.store
            .verify_at(verifier, &self.token, self.epoch)
            .await
    }
}

impl Drop for PendingVerification {
    fn drop(&mut self) {
        self.store.abandon_verification(self.epoch);
    }
}

/// Result of [`SessionStore::boot`].
#[derive(Debug, Clone, PartialEq)]
pub struct BootOutcome {
    pub snapshot: SessionSnapshot,
    /// Present when hydration found a token without a cached user.
    pub verification: Option<VerifyOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Confirmed(AuthUser),
    Cleared(VerifyError),
    /// The session was cleared or re-established while the request was in flight.
    Stale,
}

struct SessionState {
    session: Session,
    epoch: u64,
    verifying: Option<u64>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        let status = if self.session.is_authenticated() {
            SessionStatus::Authenticated
        } else if self.verifying.is_some() {
            SessionStatus::Verifying
        } else {
            SessionStatus::Anonymous
        };
        SessionSnapshot {
            session: self.session.clone(),
            status,
        }
    }

    /// Returns whether there was anything to clear.
    fn clear(&mut self, kv: &dyn PersistentKv) -> bool {
        let persisted = read_or_absent(kv, TOKEN_KEY).is_some()
            || read_or_absent(kv, USER_KEY).is_some();
        remove_logged(kv, TOKEN_KEY);
        remove_logged(kv, USER_KEY);

        let in_memory = self.session != Session::default() || self.verifying.is_some();
        self.session = Session::default();
        self.verifying = None;
        self.epoch += 1;
        persisted || in_memory
    }
}

enum Hydrated {
    Nothing,
    User(AuthUser),
    Token(String, u64),
}

enum AppliedVerification {
    Confirmed(AuthUser),
    Failed { error: VerifyError, cleared: bool },
    Stale { captured: u64, current: u64 },
}

struct SessionInner {
    kv: Arc<dyn PersistentKv>,
    navigator: Arc<dyn Navigator>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    updates: watch::Sender<SessionSnapshot>,
    /// Held while calling the navigator so a landing redirect and a login
    /// redirect cannot interleave.
    navigation: Mutex<()>,
    interceptor_claimed: AtomicBool,
}

/// Shared handle to the process-wide session. Cloning is cheap.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("status", &self.status())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(kv: Arc<dyn PersistentKv>, navigator: Arc<dyn Navigator>) -> Self {
        Self::with_config(kv, navigator, SessionConfig::default())
    }

    pub fn with_config(
        kv: Arc<dyn PersistentKv>,
        navigator: Arc<dyn Navigator>,
        config: SessionConfig,
    ) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                kv,
                navigator,
                config,
                state: Mutex::new(SessionState {
                    session: Session::default(),
                    epoch: 0,
                    verifying: None,
                }),
                updates,
                navigation: Mutex::new(()),
                interceptor_claimed: AtomicBool::new(false),
            }),
        }
    }

    /// Rebuilds the in-memory session from persistent storage without any
    /// network access. A cached user is trusted as-is; a bare token yields a
    /// [`PendingVerification`].
    pub fn hydrate(&self) -> Hydration {
        let hydrated = self.mutate(|state, kv| {
            let token = read_or_absent(kv, TOKEN_KEY).and_then(|raw| normalize_token(&raw));
            let user = read_or_absent(kv, USER_KEY).and_then(|raw| {
                match serde_json::from_str::<AuthUser>(&raw) {
                    Ok(user) => Some(user),
                    Err(error) => {
                        tracing::warn!(%error, "discarding unreadable cached user");
                        remove_logged(kv, USER_KEY);
                        None
                    }
                }
            });

            state.epoch += 1;
            state.verifying = None;
            state.session = Session {
                user: user.clone(),
                token: token.clone(),
            };

            match (user, token) {
                (Some(user), _) => Hydrated::User(user),
                (None, Some(token)) => {
                    state.verifying = Some(state.epoch);
                    Hydrated::Token(token, state.epoch)
                }
                (None, None) => Hydrated::Nothing,
            }
        });

        match hydrated {
            Hydrated::User(user) => {
                tracing::info!("session restored from cached user");
                Hydration::Restored(user)
            }
            Hydrated::Nothing => {
                tracing::debug!("no persisted session");
                Hydration::Anonymous
            }
            Hydrated::Token(token, epoch) => {
                tracing::info!(epoch, "persisted token without user, verification pending");
                Hydration::VerificationPending(PendingVerification {
                    store: self.clone(),
                    token,
                    epoch,
                })
            }
        }
    }

    /// Hydrates and, when needed, resolves the resulting verification.
    pub async fn boot(&self, verifier: &dyn UserVerifier) -> BootOutcome {
        let verification = match self.hydrate() {
            Hydration::VerificationPending(pending) => {
                let outcome = pending.resolve(verifier).await;
                match &outcome {
                    VerifyOutcome::Confirmed(_) => {}
                    VerifyOutcome::Cleared(error) => {
                        tracing::debug!(%error, "boot verification cleared the session");
                    }
                    VerifyOutcome::Stale => {
                        tracing::debug!("boot verification superseded before it resolved");
                    }
                }
                Some(outcome)
            }
            Hydration::Anonymous | Hydration::Restored(_) => None,
        };
        BootOutcome {
            snapshot: self.snapshot(),
            verification,
        }
    }

    /// Verifies `token` under a fresh epoch, superseding any verification
    /// already in flight.
    pub async fn verify(&self, verifier: &dyn UserVerifier, token: &str) -> VerifyOutcome {
        let epoch = self.mutate(|state, _| {
            state.epoch += 1;
            state.verifying = Some(state.epoch);
            state.epoch
        });
        self.verify_at(verifier, token, epoch).await
    }

    async fn verify_at(
        &self,
        verifier: &dyn UserVerifier,
        token: &str,
        epoch: u64,
    ) -> VerifyOutcome {
        let result = verifier.verify_user(token).await;

        let applied = self.mutate(|state, kv| {
            if state.epoch != epoch {
                return AppliedVerification::Stale {
                    captured: epoch,
                    current: state.epoch,
                };
            }
            state.verifying = None;
            match result {
                Ok(user) => {
                    persist_user(kv, &user);
                    write_logged(kv, TOKEN_KEY, token);
                    state.session = Session {
                        user: Some(user.clone()),
                        token: Some(token.to_string()),
                    };
                    AppliedVerification::Confirmed(user)
                }
                Err(error) => {
                    let cleared = state.clear(kv);
                    AppliedVerification::Failed { error, cleared }
                }
            }
        });

        match applied {
            AppliedVerification::Confirmed(user) => {
                tracing::info!(epoch, "session verified");
                if let Some(view) = self.inner.config.verified_landing_view {
                    let _navigation = self.lock_navigation();
                    if self.epoch() == epoch {
                        self.inner
                            .navigator
                            .navigate(NavigationRequest::push(view.canonical_path()));
                    } else {
                        tracing::debug!(epoch, "session changed before landing navigation");
                    }
                }
                VerifyOutcome::Confirmed(user)
            }
            AppliedVerification::Failed { error, cleared } => {
                tracing::warn!(%error, "session verification failed");
                self.after_clear(ClearReason::VerificationFailed, cleared);
                VerifyOutcome::Cleared(error)
            }
            AppliedVerification::Stale { captured, current } => {
                tracing::debug!(captured, current, "discarding stale verification result");
                VerifyOutcome::Stale
            }
        }
    }

    /// Replaces the in-memory user and persists it. Leaves token and epoch alone.
    pub fn set_session(&self, user: AuthUser) {
        self.mutate(|state, kv| {
            persist_user(kv, &user);
            state.session.user = Some(user);
        });
    }

    /// Records a freshly issued credential, e.g. after the login form succeeds.
    /// Any verification still in flight for an older token becomes stale.
    pub fn establish(&self, token: &str, user: AuthUser) {
        let token = token.trim().to_string();
        let epoch = self.mutate(|state, kv| {
            write_logged(kv, TOKEN_KEY, &token);
            persist_user(kv, &user);
            state.session = Session {
                user: Some(user),
                token: Some(token),
            };
            state.verifying = None;
            state.epoch += 1;
            state.epoch
        });
        tracing::info!(epoch, "session established");
    }

    pub fn clear(&self) -> bool {
        self.clear_for(ClearReason::Logout)
    }

    /// Drops the session everywhere and sends the user to the login view.
    ///
    /// Every call ends on the login view. Only the call that actually cleared
    /// something pushes a history entry; later calls replace it. Returns
    /// whether there was anything to clear.
    pub fn clear_for(&self, reason: ClearReason) -> bool {
        let cleared = self.mutate(|state, kv| state.clear(kv));
        self.after_clear(reason, cleared);
        cleared
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock_state().snapshot()
    }

    pub fn session(&self) -> Session {
        self.lock_state().session.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().snapshot().status
    }

    pub fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_state().session.is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.lock_state().session.token.clone()
    }

    /// Receives a snapshot whenever the observable session changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.updates.subscribe()
    }

    pub(crate) fn claim_interceptor_slot(&self) -> bool {
        self.inner
            .interceptor_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_interceptor_slot(&self) {
        self.inner
            .interceptor_claimed
            .store(false, Ordering::Release);
    }

    fn abandon_verification(&self, epoch: u64) {
        let abandoned = self.mutate(|state, _| {
            if state.epoch != epoch || state.verifying != Some(epoch) {
                return false;
            }
            state.verifying = None;
            state.session.token = None;
            true
        });
        if abandoned {
            tracing::debug!(epoch, "pending verification dropped unresolved");
        }
    }

    fn after_clear(&self, reason: ClearReason, cleared: bool) {
        let request = if cleared {
            tracing::info!(reason = reason.as_str(), "session cleared");
            NavigationRequest::push(LOGIN_PATH)
        } else {
            tracing::debug!(reason = reason.as_str(), "session already clear");
            NavigationRequest::replace(LOGIN_PATH)
        };
        let _navigation = self.lock_navigation();
        self.inner.navigator.navigate(request);
    }

    fn lock_navigation(&self) -> MutexGuard<'_, ()> {
        self.inner
            .navigation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut SessionState, &dyn PersistentKv) -> R) -> R {
        let mut state = self.lock_state();
        let result = apply(&mut state, self.inner.kv.as_ref());
        let snapshot = state.snapshot();
        self.inner.updates.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        drop(state);
        result
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenSource for SessionStore {
    fn bearer_token(&self) -> Option<String> {
        self.token()
    }
}

fn persist_user(kv: &dyn PersistentKv, user: &AuthUser) {
    match serde_json::to_string(user) {
        Ok(encoded) => write_logged(kv, USER_KEY, &encoded),
        Err(error) => tracing::warn!(%error, "failed to encode user for storage"),
    }
}
