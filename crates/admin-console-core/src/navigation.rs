use std::sync::Mutex;

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    /// Adds a history entry.
    Push,
    /// Replaces the current history entry so "back" skips it.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub path: String,
    pub mode: NavigationMode,
}

impl NavigationRequest {
    #[must_use]
    pub fn push(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: NavigationMode::Push,
        }
    }

    #[must_use]
    pub fn replace(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: NavigationMode::Replace,
        }
    }
}

/// Routing collaborator that performs navigations requested by the core.
///
/// The session store calls it while holding its navigation lock, so
/// implementations must not call back into the store.
pub trait Navigator: Send + Sync {
    fn navigate(&self, request: NavigationRequest);
}

/// Navigator that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    requests: Mutex<Vec<NavigationRequest>>,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<NavigationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<NavigationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, request: NavigationRequest) {
        tracing::debug!(path = %request.path, mode = ?request.mode, "navigation requested");
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
    }
}
