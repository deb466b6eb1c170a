//! In-memory tab stores.
//!
//! [`MemoryTabStore`] keeps everything in a `HashMap` behind a `RwLock` and
//! lives exactly as long as the process, which is the closest a native
//! process gets to a browsing-context session. [`UnavailableTabStore`] fails
//! every call and exists so callers can exercise their degraded paths.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::trace;

use crate::{StoreError, TabStore};

/// An in-memory tab store.
///
/// Cloning shares the underlying map, so several handles observe the same
/// tab.
///
/// # Examples
///
/// ```
/// # use backoffice_storage::{MemoryTabStore, TabStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryTabStore::new();
/// store.set_item("admin_2fa_session", "user-1").await.unwrap();
/// let val = store.get_item("admin_2fa_session").await.unwrap();
/// assert_eq!(val.as_deref(), Some("user-1"));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTabStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryTabStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently set.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether no key is set.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl TabStore for MemoryTabStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.insert(key.to_owned(), value.to_owned());
        trace!(key, "tab store write");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.remove(key);
        trace!(key, "tab store remove");
        Ok(())
    }
}

/// A tab store with storage disabled: every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTabStore;

#[async_trait::async_trait]
impl TabStore for UnavailableTabStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Read {
            key: key.to_owned(),
            reason: "storage disabled".to_owned(),
        })
    }

    async fn set_item(&self, key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Write {
            key: key.to_owned(),
            reason: "storage disabled".to_owned(),
        })
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable {
            reason: "storage disabled".to_owned(),
        })
    }
}
