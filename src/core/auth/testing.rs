//! Shared fakes for session tests

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::api::{ApiError, AuthApi, CurrentUser, Credentials, LoginResponse, RefreshResponse};
use super::clock::ManualClock;
use super::inspector::tests::token_expiring_at;
use super::navigator::RecordingNavigator;
use super::session::{RefreshPolicy, SessionManager};
use super::store::{StoredSession, TokenStore};

pub(crate) const NOW: i64 = 1_767_225_600;

/// Canned endpoint reply
#[derive(Debug, Clone)]
pub(crate) enum Reply<T> {
    Ok(T),
    Unauthorized,
    Down,
}

impl<T: Clone> Reply<T> {
    fn produce(&self) -> Result<T, ApiError> {
        match self {
            Reply::Ok(value) => Ok(value.clone()),
            Reply::Unauthorized => Err(ApiError::Unauthorized),
            Reply::Down => Err(ApiError::Transport("connection refused".to_string())),
        }
    }
}

pub(crate) struct FakeAuthApi {
    login: Mutex<Reply<LoginResponse>>,
    refresh: Mutex<Reply<RefreshResponse>>,
    me: Mutex<Reply<CurrentUser>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub last_credentials: Mutex<Option<Credentials>>,
    pub last_refresh_token: Mutex<Option<String>>,
}

impl FakeAuthApi {
    pub(crate) fn new() -> Self {
        Self {
            login: Mutex::new(Reply::Unauthorized),
            refresh: Mutex::new(Reply::Unauthorized),
            me: Mutex::new(Reply::Unauthorized),
            login_gate: Mutex::new(None),
            refresh_gate: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            last_credentials: Mutex::new(None),
            last_refresh_token: Mutex::new(None),
        }
    }

    pub(crate) fn on_login(&self, reply: Reply<LoginResponse>) {
        *self.login.lock().unwrap() = reply;
    }

    pub(crate) fn on_refresh(&self, reply: Reply<RefreshResponse>) {
        *self.refresh.lock().unwrap() = reply;
    }

    pub(crate) fn on_me(&self, reply: Reply<CurrentUser>) {
        *self.me.lock().unwrap() = reply;
    }

    /// Make login wait until the returned notify fires
    pub(crate) fn gate_login(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make refresh wait until the returned notify fires
    pub(crate) fn gate_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_credentials.lock().unwrap() = Some(credentials.clone());

        let gate = self.login_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let reply = self.login.lock().unwrap().clone();
        reply.produce()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_refresh_token.lock().unwrap() = Some(refresh_token.to_string());

        // Stay pending for one poll so concurrent callers overlap
        tokio::task::yield_now().await;

        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let reply = self.refresh.lock().unwrap().clone();
        reply.produce()
    }

    async fn me(&self, _token: &str) -> Result<CurrentUser, ApiError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.me.lock().unwrap().clone();
        reply.produce()
    }
}

pub(crate) fn login_response(token: &str, role: &str) -> LoginResponse {
    LoginResponse {
        token: token.to_string(),
        role: role.to_string(),
        expires_in: 3600,
        refresh_token: Some("refresh-1".to_string()),
    }
}

pub(crate) fn refresh_response(token: &str) -> RefreshResponse {
    RefreshResponse {
        token: token.to_string(),
        refresh_token: Some("refresh-2".to_string()),
        expires_in: 3600,
    }
}

/// A session manager wired to fakes, plus handles on every fake
pub(crate) struct Harness {
    pub session: SessionManager,
    pub store: TokenStore,
    pub api: Arc<FakeAuthApi>,
    pub navigator: Arc<RecordingNavigator>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_store(TokenStore::in_memory(), RefreshPolicy::default())
    }

    /// Harness whose store already holds a session expiring at `exp`
    pub(crate) fn signed_in(exp: i64, refresh_token: Option<&str>) -> Self {
        Self::signed_in_with_policy(exp, refresh_token, RefreshPolicy::default())
    }

    pub(crate) fn signed_in_with_policy(
        exp: i64,
        refresh_token: Option<&str>,
        policy: RefreshPolicy,
    ) -> Self {
        let store = TokenStore::in_memory();
        store
            .set_session(&StoredSession {
                token: token_expiring_at(exp),
                role: "DEVELOPER".to_string(),
                refresh_token: refresh_token.map(str::to_string),
            })
            .unwrap();
        Self::with_store(store, policy)
    }

    pub(crate) fn with_store(store: TokenStore, policy: RefreshPolicy) -> Self {
        let api = Arc::new(FakeAuthApi::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let clock = Arc::new(ManualClock::new(NOW));

        let session = SessionManager::builder(store.clone(), api.clone(), navigator.clone())
            .clock(clock.clone())
            .policy(policy)
            .build();

        Self {
            session,
            store,
            api,
            navigator,
            clock,
        }
    }
}
