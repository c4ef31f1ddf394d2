//! Authentication and session module for SGCD PM
//!
//! This module provides:
//! - Token storage keyed per backend origin
//! - Client-side JWT expiry inspection (no signature checks)
//! - The session state machine with de-duplicated token refresh
//! - Route guarding and outbound request interception

pub mod api;
pub mod broadcast;
pub mod clock;
pub mod guard;
pub mod inspector;
pub mod interceptor;
pub mod navigator;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, AuthApi, Credentials, CurrentUser, HttpAuthApi, LoginResponse, RefreshResponse};
pub use broadcast::{AuthBroadcast, SubscriptionId};
pub use clock::{Clock, SystemClock};
pub use guard::{GuardDecision, RouteGuard};
pub use inspector::{TokenError, decode_expiry, is_expired, is_expiring_soon};
pub use interceptor::RequestInterceptor;
pub use navigator::{LoggingNavigator, Navigator};
pub use session::{
    DEFAULT_LOGIN_PATH, RefreshOutcome, RefreshPolicy, SessionError, SessionManager,
    SessionManagerBuilder, SessionState,
};
pub use store::{FileStorage, KeyValueStorage, MemoryStorage, StorageError, StoredSession, TokenStore};
