//! Route guard
//!
//! Decides whether a navigation may proceed. The check is synchronous and
//! cheap: it trusts [`SessionManager::is_logged_in`] and never refreshes.

use super::session::SessionManager;

/// Paths reachable without a session (the login view and the read-only
/// stakeholder view)
const DEFAULT_PUBLIC_PATHS: &[&str] = &["/login", "/stakeholder"];

/// Outcome of a guarded navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Denied; go here instead
    Redirect(String),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    session: SessionManager,
    public_paths: Vec<String>,
}

impl RouteGuard {
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Replace the set of public paths
    pub fn with_public_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.public_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Guard a protected area: allow when logged in, otherwise redirect to login
    pub fn can_activate(&self) -> GuardDecision {
        if self.session.is_logged_in() {
            GuardDecision::Allow
        } else {
            tracing::debug!("Navigation denied, redirecting to login");
            GuardDecision::Redirect(self.session.login_path().to_string())
        }
    }

    /// Guard navigation to `path`, letting public paths through unconditionally
    pub fn check(&self, path: &str) -> GuardDecision {
        if self.is_public(path) {
            return GuardDecision::Allow;
        }
        self.can_activate()
    }

    /// `/login`, `/login/` and `/login?next=/` are public; `/logins` is not
    pub fn is_public(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        self.public_paths.iter().any(|public| {
            path == public
                || path
                    .strip_prefix(public.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
