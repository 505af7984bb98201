//! Session Resolver: owns authentication state and its transitions.
//!
//! States run `Uninitialized -> Checking -> {Authenticated, Unauthenticated}`.
//! A check reads the stored token, inspects it locally, and only then asks
//! the server who it belongs to. Every failure resolves to
//! `Unauthenticated`; nothing here trusts a token the server did not
//! confirm.
//!
//! Transitions are tagged with a generation. `login`, `logout` and
//! `end_session` start a new generation when they apply, so a check that
//! started earlier and finishes later is discarded instead of overwriting
//! newer state. Concurrent `refresh` calls are coalesced: a caller that
//! arrives while a check is running waits for it and shares its result.

mod backend;
mod state;

pub use backend::AuthBackend;
pub use state::{EndReason, SessionSnapshot, SessionState};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Credentials, LoginOutcome, SessionUser};
use crate::store::TokenStore;
use crate::token::{self, Inspection};

/// Message returned when a successful login response lacks a token or user.
pub const MISSING_USER_DATA: &str = "Login response missing user data";

/// Default bound on the identity confirmation call.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity_timeout: Duration,
    /// Target of the full-page redirect issued by `logout`.
    pub login_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
            login_path: "/login".to_string(),
        }
    }
}

/// Outcome of [`SessionResolver::login`]. Login never fails with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResult {
    pub success: bool,
    pub message: Option<String>,
    /// The user must be sent to the password-change page next.
    pub password_change_required: bool,
}

impl LoginResult {
    fn succeeded(user: &SessionUser) -> Self {
        Self {
            success: true,
            message: None,
            password_change_required: user.must_change_password(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            password_change_required: false,
        }
    }
}

/// A full-page navigation that discards all in-memory state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullPageRedirect {
    pub location: String,
}

pub struct SessionResolver<B> {
    backend: B,
    store: Arc<TokenStore>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    /// Current generation. Held while a transition is applied.
    generation: Mutex<u64>,
    checks_completed: AtomicU64,
    check_lock: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl<B: AuthBackend> SessionResolver<B> {
    pub fn new(backend: B, store: Arc<TokenStore>, config: SessionConfig) -> Self {
        Self {
            backend,
            store,
            config,
            state: watch::Sender::new(SessionState::Uninitialized),
            generation: Mutex::new(0),
            checks_completed: AtomicU64::new(0),
            check_lock: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().snapshot()
    }

    /// Watch every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run a check, or join the one already in flight.
    pub async fn refresh(&self) -> SessionSnapshot {
        let seen = self.checks_completed.load(Ordering::Acquire);
        let _guard = self.check_lock.lock().await;
        if self.checks_completed.load(Ordering::Acquire) != seen {
            debug!("Joined an in-flight session check");
            return self.snapshot();
        }

        self.run_check().await;
        self.checks_completed.fetch_add(1, Ordering::Release);
        self.snapshot()
    }

    async fn run_check(&self) {
        let generation = self.current_generation();
        let previous = self.state();
        self.apply_if_current(generation, false, |prev| SessionState::Checking {
            user: prev.user().cloned(),
        });

        let mut pending = PendingCheck {
            resolver: self,
            generation,
            previous: Some(previous),
        };
        self.confirm(generation).await;
        pending.previous = None;
    }

    async fn confirm(&self, generation: u64) {
        let Some(token) = self.store.get() else {
            self.end_if_current(generation, EndReason::NoToken, false);
            return;
        };

        match token::inspect(&token) {
            Inspection::Invalid => {
                self.end_if_current(generation, EndReason::MalformedToken, true);
                return;
            }
            Inspection::Valid { expired: true } => {
                self.end_if_current(generation, EndReason::ExpiredToken, true);
                return;
            }
            Inspection::Valid { expired: false } => {}
        }

        let confirmed =
            tokio::time::timeout(self.config.identity_timeout, self.backend.current_user(&token))
                .await;

        let reason = match confirmed {
            Ok(Ok(Some(user))) => {
                let applied = self.apply_if_current(generation, false, |_| {
                    SessionState::Authenticated(user.clone())
                });
                if applied {
                    info!(user_id = ?user.id, "Session confirmed");
                }
                return;
            }
            Ok(Ok(None)) => EndReason::Unidentified,
            // The identity call itself being refused means the token is no good.
            Ok(Err(ApiError::Unauthorized(_) | ApiError::Forbidden(_))) => {
                EndReason::Unauthorized
            }
            Ok(Err(ApiError::Timeout)) | Err(_) => EndReason::Timeout,
            Ok(Err(ApiError::Decode(_))) => EndReason::Unidentified,
            Ok(Err(e)) => {
                warn!(error = %e, "Identity check failed");
                EndReason::NetworkFailure
            }
        };
        self.end_if_current(generation, reason, true);
    }

    /// Authenticate with credentials. On success the returned user is trusted
    /// directly; no identity round trip follows.
    pub async fn login(&self, email: &str, password: &str) -> LoginResult {
        let credentials = Credentials::new(email, password);
        match self.backend.login(&credentials).await {
            Ok(LoginOutcome::Accepted { token, user }) => {
                let result = LoginResult::succeeded(&user);
                let user_id = user.id.clone();
                let applied = self.commit(SessionState::Authenticated(user), |store| {
                    if let Err(e) = store.set(&token) {
                        warn!(error = %e, "Failed to persist token");
                    }
                });
                if !applied {
                    return LoginResult::failed("Session is no longer active");
                }
                info!(user_id = ?user_id, "Login succeeded");
                result
            }
            Ok(LoginOutcome::MissingUserData) => {
                warn!("Login response missing token or user");
                self.login_failed(MISSING_USER_DATA)
            }
            Ok(LoginOutcome::Rejected { message }) => {
                info!(reason = %message, "Login rejected");
                self.login_failed(message)
            }
            Err(e) => {
                warn!(error = %e, "Login request failed");
                self.login_failed(e.user_message())
            }
        }
    }

    /// A failed login never touches the store or a settled state, but a
    /// resolver that has not resolved anything yet settles to
    /// `Unauthenticated` so it stops reporting loading.
    fn login_failed(&self, message: impl Into<String>) -> LoginResult {
        let _generation = self.lock_generation();
        if !self.is_disposed() {
            self.state.send_if_modified(|state| {
                if *state != SessionState::Uninitialized {
                    return false;
                }
                *state = SessionState::Unauthenticated(EndReason::LoginFailed);
                true
            });
        }
        LoginResult::failed(message)
    }

    /// Clear the token and end the session, then leave via a full-page load.
    pub fn logout(&self) -> FullPageRedirect {
        self.end_session(EndReason::LoggedOut);
        FullPageRedirect {
            location: self.config.login_path.clone(),
        }
    }

    /// Clear the token and move to `Unauthenticated`, superseding any check.
    pub fn end_session(&self, reason: EndReason) {
        let applied = self.commit(SessionState::Unauthenticated(reason), |store| {
            if let Err(e) = store.clear() {
                warn!(error = %e, "Failed to clear token");
            }
        });
        if applied {
            info!(reason = %reason, "Session ended");
        }
    }

    /// Pass an API result through, ending the session on 401. A 403 leaves
    /// the session alone.
    pub fn observe<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(ref e) = result {
            if e.is_unauthorized() {
                self.end_session(EndReason::Unauthorized);
            }
        }
        result
    }

    /// Detach this resolver. Pending checks finish as no-ops.
    pub fn dispose(&self) {
        let _generation = self.lock_generation();
        self.disposed.store(true, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current_generation(&self) -> u64 {
        *self.lock_generation()
    }

    /// Apply a transition only if no newer one happened since `generation`.
    fn apply_if_current(
        &self,
        generation: u64,
        clear_store: bool,
        next: impl FnOnce(&SessionState) -> SessionState,
    ) -> bool {
        let current = self.lock_generation();
        if self.is_disposed() || *current != generation {
            debug!(
                started = generation,
                current = *current,
                "Discarding stale session transition"
            );
            return false;
        }
        if clear_store {
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear token");
            }
        }
        let next = next(&self.state.borrow());
        self.state.send_replace(next);
        true
    }

    fn end_if_current(&self, generation: u64, reason: EndReason, clear_store: bool) {
        if self.apply_if_current(generation, clear_store, |_| {
            SessionState::Unauthenticated(reason)
        }) {
            info!(reason = %reason, "Session not authenticated");
        }
    }

    /// Start a new generation and apply `next`, writing the store first.
    fn commit(&self, next: SessionState, write: impl FnOnce(&TokenStore)) -> bool {
        let mut current = self.lock_generation();
        if self.is_disposed() {
            return false;
        }
        *current += 1;
        write(&self.store);
        self.state.send_replace(next);
        true
    }
}

/// Settles a check whose future is dropped before it finishes, e.g. by an
/// outer timeout. A settled previous state is restored; otherwise the
/// session becomes `Unauthenticated(Interrupted)`. The store is untouched.
struct PendingCheck<'a, B: AuthBackend> {
    resolver: &'a SessionResolver<B>,
    generation: u64,
    previous: Option<SessionState>,
}

impl<B: AuthBackend> Drop for PendingCheck<'_, B> {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        let settled = match previous {
            state @ (SessionState::Authenticated(_) | SessionState::Unauthenticated(_)) => state,
            _ => SessionState::Unauthenticated(EndReason::Interrupted),
        };
        if self
            .resolver
            .apply_if_current(self.generation, false, move |_| settled)
        {
            debug!("Session check dropped before completing");
        }
    }
}
