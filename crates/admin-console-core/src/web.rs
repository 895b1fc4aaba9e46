//! Browser backends for the storage and navigation seams.
//!
//! Both types look up `window` on every call instead of holding JS handles,
//! which keeps them `Send + Sync` for the shared core types.

use wasm_bindgen::JsValue;

use crate::navigation::{NavigationMode, NavigationRequest, Navigator};
use crate::storage::{PersistentKv, StorageError};

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorageKv;

impl LocalStorageKv {
    fn storage() -> Result<web_sys::Storage, StorageError> {
        let Some(window) = web_sys::window() else {
            return Err(StorageError::Unavailable("no window".to_string()));
        };
        window
            .local_storage()
            .map_err(|_| StorageError::Unavailable("local storage access denied".to_string()))?
            .ok_or_else(|| StorageError::Unavailable("local storage disabled".to_string()))
    }
}

impl PersistentKv for LocalStorageKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Self::storage()?
            .get_item(key)
            .map_err(|_| StorageError::Unavailable(format!("failed to read `{key}`")))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::storage()?
            .set_item(key, value)
            .map_err(|_| StorageError::Write {
                key: key.to_string(),
                message: "quota exceeded or storage disabled".to_string(),
            })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        Self::storage()?
            .remove_item(key)
            .map_err(|_| StorageError::Remove {
                key: key.to_string(),
                message: "storage rejected removal".to_string(),
            })
    }
}

/// Drives `history.pushState` / `replaceState`. Host frameworks still need to
/// re-render on the resulting path change.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserHistoryNavigator;

fn current_pathname() -> String {
    web_sys::window()
        .and_then(|window| window.location().pathname().ok())
        .unwrap_or_default()
}

impl Navigator for BrowserHistoryNavigator {
    fn navigate(&self, request: NavigationRequest) {
        let Some(window) = web_sys::window() else {
            return;
        };
        let Ok(history) = window.history() else {
            return;
        };
        if current_pathname() == request.path {
            return;
        }
        let result = match request.mode {
            NavigationMode::Push => {
                history.push_state_with_url(&JsValue::NULL, "", Some(&request.path))
            }
            NavigationMode::Replace => {
                history.replace_state_with_url(&JsValue::NULL, "", Some(&request.path))
            }
        };
        if result.is_err() {
            tracing::warn!(path = %request.path, "browser history update failed");
        }
    }
}
