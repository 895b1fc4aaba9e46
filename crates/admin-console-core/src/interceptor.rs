//! Response hooks for the shared API client.
//!
//! The client reports the outcome of every response to an
//! [`InterceptorRegistry`]. [`AuthInterceptor`] is the hook that turns a 401
//! into a global session clear; the request that failed still gets its error.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{ClearReason, SessionStore};

pub const UNAUTHORIZED_STATUS: u16 = 401;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub method: String,
    pub url: String,
}

impl ResponseMeta {
    pub fn new(status: u16, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            status,
            method: method.into(),
            url: url.into(),
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == UNAUTHORIZED_STATUS
    }
}

pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, response: &ResponseMeta);
}

type Hook = (u64, Arc<dyn ResponseInterceptor>);

#[derive(Default)]
pub struct InterceptorRegistry {
    next_id: AtomicU64,
    hooks: Mutex<Vec<Hook>>,
}

impl fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}

impl InterceptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn ResponseInterceptor>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, hook));
        id
    }

    /// Removes the hook registered under `id`. Returns false if it was already gone.
    pub fn eject(&self, id: u64) -> bool {
        let mut hooks = self.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Runs every hook in registration order. The hook list is copied first,
    /// so hooks may register or eject without deadlocking.
    pub fn dispatch(&self, response: &ResponseMeta) {
        let hooks: Vec<Arc<dyn ResponseInterceptor>> =
            self.lock().iter().map(|(_, hook)| hook.clone()).collect();
        for hook in hooks {
            hook.on_response(response);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Hook>> {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterceptorError {
    #[error("an auth interceptor is already installed for this session")]
    AlreadyRegistered,
}

/// Clears the session when any response comes back 401.
pub struct AuthInterceptor {
    store: SessionStore,
}

impl AuthInterceptor {
    /// Registers the hook for `store`. At most one may be installed per store;
    /// dropping the returned handle ejects it.
    pub fn install(
        store: &SessionStore,
        registry: &Arc<InterceptorRegistry>,
    ) -> Result<InterceptorHandle, InterceptorError> {
        if !store.claim_interceptor_slot() {
            return Err(InterceptorError::AlreadyRegistered);
        }
        let hook = Arc::new(Self {
            store: store.clone(),
        });
        let id = registry.register(hook);
        tracing::debug!(id, "auth interceptor installed");
        Ok(InterceptorHandle {
            registry: registry.clone(),
            store: store.clone(),
            id,
            released: false,
        })
    }
}

impl ResponseInterceptor for AuthInterceptor {
    fn on_response(&self, response: &ResponseMeta) {
        if !response.is_unauthorized() {
            return;
        }
        tracing::warn!(
            method = %response.method,
            url = %response.url,
            "request rejected as unauthorized, clearing session"
        );
        self.store.clear_for(ClearReason::SessionExpired);
    }
}

#[must_use = "dropping the handle ejects the interceptor"]
pub struct InterceptorHandle {
    registry: Arc<InterceptorRegistry>,
    store: SessionStore,
    id: u64,
    released: bool,
}

impl fmt::Debug for InterceptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorHandle")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

impl InterceptorHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn release(mut self) {
        self.eject();
    }

    fn eject(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.registry.eject(self.id);
        self.store.release_interceptor_slot();
        tracing::debug!(id = self.id, "auth interceptor ejected");
    }
}

impl Drop for InterceptorHandle {
    fn drop(&mut self) {
        self.eject();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use crate::navigation::{LOGIN_PATH, NavigationMode, NavigationRequest, RecordingNavigator};
    use crate::session::SessionStatus;
    use crate::storage::{MemoryKv, PersistentKv, TOKEN_KEY};

    fn signed_in() -> (SessionStore, Arc<MemoryKv>, Arc<RecordingNavigator>) {
        let kv = Arc::new(MemoryKv::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let store = SessionStore::new(kv.clone(), navigator.clone());
        store.establish(
            "tok-1",
            AuthUser {
                name: Some("Ada".to_string()),
                ..AuthUser::default()
            },
        );
        (store, kv, navigator)
    }

    fn unauthorized() -> ResponseMeta {
        ResponseMeta::new(401, "GET", "http://localhost:4000/api/company/companies")
    }

    #[test]
    fn unauthorized_response_clears_session() {
        let (store, kv, navigator) = signed_in();
        let registry = Arc::new(InterceptorRegistry::new());
        let _handle = AuthInterceptor::install(&store, &registry).expect("install");

        registry.dispatch(&unauthorized());

        assert_eq!(store.status(), SessionStatus::Anonymous);
        assert_eq!(kv.get(TOKEN_KEY).expect("get"), None);
        assert_eq!(navigator.requests(), vec![NavigationRequest::push(LOGIN_PATH)]);
    }

    #[test]
    fn other_failures_leave_session_alone() {
        let (store, _, navigator) = signed_in();
        let registry = Arc::new(InterceptorRegistry::new());
        let _handle = AuthInterceptor::install(&store, &registry).expect("install");

        for status in [200, 403, 404, 500] {
            registry.dispatch(&ResponseMeta::new(status, "GET", "/api/user"));
        }

        assert_eq!(store.status(), SessionStatus::Authenticated);
        assert!(navigator.requests().is_empty());
    }

    #[test]
    fn concurrent_unauthorized_responses_push_login_once() {
        let (store, _, navigator) = signed_in();
        let registry = Arc::new(InterceptorRegistry::new());
        let _handle = AuthInterceptor::install(&store, &registry).expect("install");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| registry.dispatch(&unauthorized()));
            }
        });

        let requests = navigator.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|request| request.path == LOGIN_PATH));
        assert_eq!(
            requests
                .iter()
                .filter(|request| request.mode == NavigationMode::Push)
                .count(),
            1
        );
    }

    #[test]
    fn unauthorized_response_on_anonymous_session_still_redirects() {
        let kv = Arc::new(MemoryKv::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let store = SessionStore::new(kv, navigator.clone());
        let _ = store.hydrate();
        let registry = Arc::new(InterceptorRegistry::new());
        let _handle = AuthInterceptor::install(&store, &registry).expect("install");

        registry.dispatch(&unauthorized());

        assert_eq!(store.status(), SessionStatus::Anonymous);
        assert_eq!(navigator.last().map(|request| request.path), Some(LOGIN_PATH.to_string()));
    }

    #[test]
    fn second_install_is_rejected() {
        let (store, _, _) = signed_in();
        let registry = Arc::new(InterceptorRegistry::new());
        let _handle = AuthInterceptor::install(&store, &registry).expect("install");

        let second = AuthInterceptor::install(&store, &registry);
        assert_eq!(second.err(), Some(InterceptorError::AlreadyRegistered));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_handle_ejects_and_frees_slot() {
        let (store, _, navigator) = signed_in();
        let registry = Arc::new(InterceptorRegistry::new());

        let handle = AuthInterceptor::install(&store, &registry).expect("install");
        drop(handle);
        assert!(registry.is_empty());

        registry.dispatch(&unauthorized());
        assert_eq!(store.status(), SessionStatus::Authenticated);
        assert!(navigator.requests().is_empty());

        let again = AuthInterceptor::install(&store, &registry).expect("reinstall");
        again.release();
        assert!(registry.is_empty());
    }

    struct Reentrant {
        registry: Arc<InterceptorRegistry>,
        seen: Mutex<Vec<usize>>,
    }

    impl ResponseInterceptor for Reentrant {
        fn on_response(&self, _response: &ResponseMeta) {
            let hooks = self.registry.len();
            self.seen
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(hooks);
        }
    }

    #[test]
    fn hooks_run_in_order_outside_the_registry_lock() {
        let registry = Arc::new(InterceptorRegistry::new());
        let first = Arc::new(Reentrant {
            registry: registry.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let second = Arc::new(Reentrant {
            registry: registry.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let first_id = registry.register(first.clone());
        let second_id = registry.register(second.clone());
        assert!(first_id < second_id);

        registry.dispatch(&ResponseMeta::new(200, "GET", "/api/offer/all"));

        assert_eq!(*first.seen.lock().expect("seen lock"), vec![2]);
        assert_eq!(*second.seen.lock().expect("seen lock"), vec![2]);
        assert!(registry.eject(first_id));
        assert!(!registry.eject(first_id));
    }
}
