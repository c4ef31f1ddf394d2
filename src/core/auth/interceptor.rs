//! Request interceptor
//!
//! Runs before every outbound request:
//! 1. no token: the request goes out untouched
//! 2. token outside the refresh window: `Authorization: Bearer <token>` is added
//! 3. token inside the refresh window: the session refreshes first (sharing one
//!    in-flight exchange across concurrent requests), then the new token is
//!    attached. If refresh fails the old token is attached while it is still
//!    valid; once expired the request goes out unauthenticated and the
//!    backend's 401 drives the rest.
//!
//! Every other header, the method, the URL and the body are left as they are.

use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderValue};

use super::session::SessionManager;

#[derive(Debug, Clone)]
pub struct RequestInterceptor {
    session: SessionManager,
}

impl RequestInterceptor {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Prepare `request` for dispatch
    pub async fn intercept(&self, mut request: Request) -> Request {
        let Some(token) = self.session.bearer_token().await else {
            return request;
        };

        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => {
                tracing::warn!(
                    "Stored token is not a valid header value, sending {} {} unauthenticated",
                    request.method(),
                    request.url().path()
                );
            }
        }
        request
    }
}
