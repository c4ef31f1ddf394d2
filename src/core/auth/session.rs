//! Session manager
//!
//! Owns the login/logout lifecycle, the observable auth state and the token
//! refresh path. It is the only writer of the [`TokenStore`]; the route guard
//! and the request interceptor only read through it.
//!
//! States:
//! - `Anonymous`: no token stored
//! - `Authenticated`: a token is stored
//! - `Refreshing`: a refresh-token exchange is in flight
//!
//! Refresh is de-duplicated: while one exchange is in flight every other caller
//! awaits the same shared future instead of issuing its own request. The
//! session only keeps a weak handle on that future, so an exchange every
//! caller has abandoned is dropped rather than left pending.
//!
//! Store writes and `authenticated` emissions happen under one lock, so
//! subscribers observe transitions in the order they reached the store.
//!
//! A refresh failure only ends the session when the old token is already
//! expired; while it is still valid the old token keeps being used and the
//! refresh is retried per [`RefreshPolicy`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};

use super::api::{ApiError, AuthApi, Credentials, CurrentUser};
use super::broadcast::{AuthBroadcast, SubscriptionId};
use super::clock::{Clock, SystemClock};
use super::inspector::{self, TokenError};
use super::navigator::Navigator;
use super::store::{StorageError, StoredSession, TokenStore};

/// Where logout and denied navigation send the user
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Default window before expiry in which a token is refreshed proactively
const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 60;

/// Session errors surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Token refresh failed")]
    RefreshFailed,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Backend unavailable")]
    BackendUnavailable,

    #[error("Session storage unavailable")]
    StorageUnavailable,
}

impl From<TokenError> for SessionError {
    fn from(_: TokenError) -> Self {
        SessionError::MalformedToken
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
    Refreshing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Anonymous => write!(f, "anonymous"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Refreshing => write!(f, "refreshing"),
        }
    }
}

/// When to refresh, and how soon to retry after a failed refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh once the token has this many seconds or fewer left
    pub threshold_secs: i64,
    /// After a failed refresh with the old token still valid, wait this long
    /// before trying again. Zero retries on the next request.
    pub retry_after_secs: i64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            retry_after_secs: 0,
        }
    }
}

impl RefreshPolicy {
    pub fn threshold(mut self, secs: i64) -> Self {
        self.threshold_secs = secs;
        self
    }

    pub fn retry_after(mut self, secs: i64) -> Self {
        self.retry_after_secs = secs;
        self
    }
}

/// Result of a refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new token was issued and stored
    Refreshed(String),
    /// No new token, but the stored one is still usable
    Unchanged(String),
    /// No usable token remains
    Unauthenticated,
}

impl RefreshOutcome {
    pub fn token(&self) -> Option<&str> {
        match self {
            RefreshOutcome::Refreshed(token) | RefreshOutcome::Unchanged(token) => Some(token),
            RefreshOutcome::Unauthenticated => None,
        }
    }

    pub fn into_token(self) -> Option<String> {
        match self {
            RefreshOutcome::Refreshed(token) | RefreshOutcome::Unchanged(token) => Some(token),
            RefreshOutcome::Unauthenticated => None,
        }
    }
}

type RefreshFuture = BoxFuture<'static, RefreshOutcome>;
type InFlightRefresh = Shared<RefreshFuture>;

/// The refresh currently in flight
struct InFlightSlot {
    id: u64,
    /// Started by `force_refresh`, so it ignores the refresh window and back-off
    forced: bool,
    refresh: WeakShared<RefreshFuture>,
}

/// Upgrade the slot's refresh, clearing the slot when nobody awaits it any more
fn live_refresh(slot: &mut Option<InFlightSlot>) -> Option<(InFlightRefresh, bool)> {
    let live = slot
        .as_ref()
        .and_then(|entry| entry.refresh.upgrade().map(|r| (r, entry.forced)));
    if live.is_none() {
        *slot = None;
    }
    live
}

/// Mutable bookkeeping next to the store
#[derive(Debug, Default)]
struct SessionBook {
    /// Bumped on login and on every transition to anonymous
    epoch: u64,
    /// When the last refresh failed while the old token was still valid
    last_refresh_failure: Option<i64>,
}

/// What a refresh should do, decided under the session lock
enum RefreshPlan {
    Done(RefreshOutcome),
    Expire,
    Exchange {
        record: StoredSession,
        refresh_token: String,
        epoch: u64,
    },
}

struct SessionInner {
    store: TokenStore,
    api: Arc<dyn AuthApi>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    login_path: String,
    book: Mutex<SessionBook>,
    broadcast: AuthBroadcast,
    in_flight: Mutex<Option<InFlightSlot>>,
    next_refresh_id: AtomicU64,
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    store: TokenStore,
    api: Arc<dyn AuthApi>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    login_path: String,
}

impl SessionManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Build the manager. The initial state comes from the store contents.
    pub fn build(self) -> SessionManager {
        let has_token = self.store.get().is_some();
        tracing::debug!(
            "Session starting {}",
            if has_token { "authenticated" } else { "anonymous" }
        );

        SessionManager {
            inner: Arc::new(SessionInner {
                store: self.store,
                api: self.api,
                navigator: self.navigator,
                clock: self.clock,
                policy: self.policy,
                login_path: self.login_path,
                book: Mutex::new(SessionBook::default()),
                broadcast: AuthBroadcast::new(has_token),
                in_flight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Shared handle to the session. Cloning is cheap and every clone sees the
/// same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Start building a manager around its collaborators
    pub fn builder(
        store: TokenStore,
        api: Arc<dyn AuthApi>,
        navigator: Arc<dyn Navigator>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            store,
            api,
            navigator,
            clock: Arc::new(SystemClock),
            policy: RefreshPolicy::default(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }

    /// Manager with the wall clock and default policy
    pub fn new(store: TokenStore, api: Arc<dyn AuthApi>, navigator: Arc<dyn Navigator>) -> Self {
        Self::builder(store, api, navigator).build()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Authenticate against the backend and persist the issued token.
    ///
    /// Any failure, whether rejected credentials or an unreachable backend,
    /// is reported as [`SessionError::InvalidCredentials`].
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let credentials = Credentials::new(username, password);
        tracing::info!("Login attempt for user: {}", username);

        let response = match self.inner.api.login(&credentials).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Login failed for user {}: {}", username, e);
                return Err(SessionError::InvalidCredentials);
            }
        };

        let record = StoredSession {
            token: response.token,
            role: response.role,
            refresh_token: response.refresh_token,
        };

        {
            let mut book = self.inner.lock_book();
            if let Err(e) = self.inner.store.set_session(&record) {
                tracing::error!("Failed to persist session for user {}: {}", username, e);
                return Err(SessionError::InvalidCredentials);
            }
            book.epoch += 1;
            book.last_refresh_failure = None;
            self.inner.broadcast.publish(true);
        }
        self.inner.forget_in_flight(None);

        tracing::info!("User {} logged in with role {}", username, record.role);
        Ok(())
    }

    /// Drop the session and send the user to the login view.
    ///
    /// If the stored session cannot be removed nothing changes: no emission,
    /// no navigation, and [`SessionError::StorageUnavailable`] is returned.
    pub fn logout(&self) -> Result<(), SessionError> {
        tracing::info!("Logging out");
        self.inner.end_session().map_err(|e| {
            tracing::error!("Failed to clear stored session: {}", e);
            SessionError::StorageUnavailable
        })
    }

    // ========================================================================
    // Reads (never touch the network)
    // ========================================================================

    pub fn token(&self) -> Option<String> {
        self.inner.store.get()
    }

    pub fn role(&self) -> Option<String> {
        self.inner.store.get_role()
    }

    /// A token is stored and it has not expired
    pub fn is_logged_in(&self) -> bool {
        self.token()
            .is_some_and(|token| !inspector::is_expired(&token, self.inner.clock.now()))
    }

    /// Auth state: a token is stored
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.get().is_some()
    }

    pub fn state(&self) -> SessionState {
        let refreshing = live_refresh(&mut self.inner.lock_in_flight()).is_some();
        if refreshing {
            SessionState::Refreshing
        } else if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        }
    }

    /// Seconds until the stored token expires; negative once expired
    pub fn expires_in(&self) -> Result<i64, SessionError> {
        let token = self.token().ok_or(SessionError::NotAuthenticated)?;
        let exp = inspector::decode_expiry(&token)?;
        Ok(exp - self.inner.clock.now())
    }

    /// Whether `token` is inside the refresh window
    pub fn needs_refresh(&self, token: &str) -> bool {
        inspector::is_expiring_soon(
            token,
            self.inner.clock.now(),
            self.inner.policy.threshold_secs,
        )
    }

    pub fn login_path(&self) -> &str {
        &self.inner.login_path
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    // ========================================================================
    // Observable auth state
    // ========================================================================

    /// The auth state cell. New subscribers receive the current value at once.
    pub fn authenticated(&self) -> &AuthBroadcast {
        &self.inner.broadcast
    }

    /// Callbacks run inside the login/logout transition. They may read the
    /// session but must not call [`logout`](Self::logout) synchronously.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.broadcast.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.broadcast.unsubscribe(id)
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refresh the token if it is inside the refresh window, joining an
    /// in-flight refresh when there is one.
    pub async fn refresh(&self) -> RefreshOutcome {
        let (refresh, _) = self.inner.shared_refresh(false);
        refresh.await
    }

    /// Exchange the refresh token now, regardless of the refresh window
    pub async fn force_refresh(&self) -> Result<String, SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        let outcome = loop {
            let (refresh, forced) = self.inner.shared_refresh(true);
            let outcome = refresh.await;
            // A joined window-based refresh may have skipped the exchange
            if forced || !matches!(outcome, RefreshOutcome::Unchanged(_)) {
                break outcome;
            }
        };
        match outcome {
            RefreshOutcome::Refreshed(token) => Ok(token),
            RefreshOutcome::Unchanged(_) => Err(SessionError::RefreshFailed),
            RefreshOutcome::Unauthenticated => Err(SessionError::NotAuthenticated),
        }
    }

    /// The token to present on the next request, refreshing first when it is
    /// about to expire. `None` when there is nothing usable to send.
    pub async fn bearer_token(&self) -> Option<String> {
        let token = self.token()?;
        if !self.needs_refresh(&token) {
            return Some(token);
        }
        tracing::debug!("Bearer token inside refresh window");
        self.refresh().await.into_token()
    }

    /// Ask the backend who the current bearer is
    pub async fn whoami(&self) -> Result<CurrentUser, SessionError> {
        let token = self
            .bearer_token()
            .await
            .ok_or(SessionError::NotAuthenticated)?;

        self.inner.api.me(&token).await.map_err(|e| match e {
            ApiError::Unauthorized => SessionError::NotAuthenticated,
            other => {
                tracing::warn!("Current user lookup failed: {}", other);
                SessionError::BackendUnavailable
            }
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("policy", &self.inner.policy)
            .field("login_path", &self.inner.login_path)
            .finish()
    }
}

impl SessionInner {
    fn lock_book(&self) -> MutexGuard<'_, SessionBook> {
        self.book
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<InFlightSlot>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clear the in-flight slot. With `Some(id)`, only if it still holds that
    /// refresh.
    fn forget_in_flight(&self, id: Option<u64>) {
        let mut slot = self.lock_in_flight();
        let matches = match (id, slot.as_ref()) {
            (Some(id), Some(entry)) => entry.id == id,
            (None, _) => true,
            (Some(_), None) => false,
        };
        if matches {
            slot.take();
        }
    }

    /// Transition to anonymous: clear storage, broadcast, go to login.
    /// Nothing else happens when storage cannot be cleared.
    fn end_session(&self) -> Result<(), StorageError> {
        {
            let mut book = self.lock_book();
            self.store.clear()?;
            book.epoch += 1;
            book.last_refresh_failure = None;
            self.broadcast.publish(false);
        }
        self.forget_in_flight(None);
        self.navigator.navigate_to(&self.login_path);
        Ok(())
    }

    /// End the session after an unrecoverable refresh
    fn expire(&self) -> RefreshOutcome {
        if let Err(e) = self.end_session() {
            tracing::error!("Failed to clear expired session: {}", e);
        }
        RefreshOutcome::Unauthenticated
    }

    /// Join the live in-flight refresh or start a new one. The flag says
    /// whether the returned refresh is a forced one.
    fn shared_refresh(self: &Arc<Self>, force: bool) -> (InFlightRefresh, bool) {
        let mut slot = self.lock_in_flight();
        if let Some(live) = live_refresh(&mut slot) {
            tracing::debug!("Joining in-flight token refresh");
            return live;
        }

        let id = self.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.clone();
        let refresh = async move {
            let outcome = inner.run_refresh(force).await;
            inner.forget_in_flight(Some(id));
            outcome
        }
        .boxed()
        .shared();

        *slot = refresh.downgrade().map(|weak| InFlightSlot {
            id,
            forced: force,
            refresh: weak,
        });
        (refresh, force)
    }

    fn plan_refresh(&self, force: bool) -> RefreshPlan {
        let now = self.clock.now();
        let book = self.lock_book();

        let Some(record) = self.store.session() else {
            return RefreshPlan::Done(RefreshOutcome::Unauthenticated);
        };

        if !force && !inspector::is_expiring_soon(&record.token, now, self.policy.threshold_secs) {
            // Another refresh landed while this one was queued
            return RefreshPlan::Done(RefreshOutcome::Unchanged(record.token));
        }

        let expired = inspector::is_expired(&record.token, now);
        let Some(refresh_token) = record.refresh_token.clone() else {
            if expired {
                tracing::info!("Token expired and no refresh token available");
                return RefreshPlan::Expire;
            }
            return RefreshPlan::Done(RefreshOutcome::Unchanged(record.token));
        };

        if !force && !expired {
            if let Some(failed_at) = book.last_refresh_failure {
                if now - failed_at < self.policy.retry_after_secs {
                    tracing::debug!("Refresh backing off after recent failure");
                    return RefreshPlan::Done(RefreshOutcome::Unchanged(record.token));
                }
            }
        }

        RefreshPlan::Exchange {
            record,
            refresh_token,
            epoch: book.epoch,
        }
    }

    async fn run_refresh(&self, force: bool) -> RefreshOutcome {
        let (record, refresh_token, epoch) = match self.plan_refresh(force) {
            RefreshPlan::Done(outcome) => return outcome,
            RefreshPlan::Expire => return self.expire(),
            RefreshPlan::Exchange {
                record,
                refresh_token,
                epoch,
            } => (record, refresh_token, epoch),
        };

        tracing::debug!("Exchanging refresh token");
        let result = self.api.refresh(&refresh_token).await;
        let now = self.clock.now();

        let mut book = self.lock_book();
        if book.epoch != epoch {
            tracing::debug!("Discarding refresh result: session changed meanwhile");
            return match self.store.get() {
                Some(token) if !inspector::is_expired(&token, now) => {
                    RefreshOutcome::Unchanged(token)
                }
                _ => RefreshOutcome::Unauthenticated,
            };
        }

        let error = match result {
            Ok(response) => {
                let refreshed = StoredSession {
                    token: response.token,
                    role: record.role.clone(),
                    refresh_token: response.refresh_token.or(Some(refresh_token)),
                };
                match self.store.set_session(&refreshed) {
                    Ok(()) => {
                        book.last_refresh_failure = None;
                        tracing::info!("Bearer token refreshed");
                        return RefreshOutcome::Refreshed(refreshed.token);
                    }
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => e.to_string(),
        };

        tracing::warn!("{}: {}", SessionError::RefreshFailed, error);
        if inspector::is_expired(&record.token, now) {
            drop(book);
            self.expire()
        } else {
            book.last_refresh_failure = Some(now);
            RefreshOutcome::Unchanged(record.token)
        }
    }
}
