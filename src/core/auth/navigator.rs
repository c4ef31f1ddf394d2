//! Navigation collaborator
//!
//! The session manager asks to move to the login view on logout; the
//! embedding application decides what "navigating" means.

#[cfg(test)]
use std::sync::{Mutex, MutexGuard};

/// Something that can move the user to another view
pub trait Navigator: Send + Sync {
    fn navigate_to(&self, path: &str);
}

/// Navigator that only logs the requested destination
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn navigate_to(&self, path: &str) {
        tracing::info!("Navigation requested: {}", path);
    }
}

/// Navigator that remembers every destination, newest last
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.visited
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn visited(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.lock().last().cloned()
    }
}

#[cfg(test)]
impl Navigator for RecordingNavigator {
    fn navigate_to(&self, path: &str) {
        self.lock().push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_navigator_keeps_order() {
        let navigator = RecordingNavigator::new();
        navigator.navigate_to("/login");
        navigator.navigate_to("/sprints");

        assert_eq!(navigator.visited(), vec!["/login", "/sprints"]);
        assert_eq!(navigator.last().as_deref(), Some("/sprints"));
    }
}
