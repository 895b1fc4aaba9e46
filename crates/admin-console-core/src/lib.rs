//! Client core for the admin console.
//!
//! Owns the state that has to stay consistent across reloads, concurrent
//! requests and independently rendered dashboard panels: the authentication
//! session, the sticky dashboard view, and the cross-view update cache.

pub mod auth;
pub mod config;
pub mod interceptor;
pub mod navigation;
pub mod session;
pub mod storage;
pub mod update_bus;
pub mod view_router;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use auth::{AuthUser, TokenSource, UserVerifier, VerifyError};
pub use config::{ConfigError, ConsoleConfig};
pub use interceptor::{
    AuthInterceptor, InterceptorError, InterceptorHandle, InterceptorRegistry, ResponseInterceptor,
    ResponseMeta,
};
pub use navigation::{NavigationMode, NavigationRequest, Navigator, RecordingNavigator};
pub use session::{
    ClearReason, Hydration, PendingVerification, Session, SessionConfig, SessionSnapshot,
    SessionStatus, SessionStore, VerifyOutcome,
};
pub use storage::{MemoryKv, PersistentKv, StorageError};
#[cfg(target_arch = "wasm32")]
pub use web::{BrowserHistoryNavigator, LocalStorageKv};
pub use update_bus::{Patch, PendingUpdate, UpdatePropagationBus};
pub use view_router::{DashboardView, ViewResolution, ViewRouter};
