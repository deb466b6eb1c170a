//! Tab-local key-value storage for the back-office.
//!
//! This crate defines the [`TabStore`] trait: a string-keyed, string-valued
//! store scoped to a single browsing-context session. It is cleared when that
//! context fully closes and is never shared between tabs. The session guard in
//! `backoffice-core` keeps its expiry bookkeeping here so a reload inside the
//! same tab does not lose an unlocked admin session.
//!
//! Two implementations are provided:
//!
//! - [`MemoryTabStore`]: process-lifetime store, the default for the CLI and tests
//! - [`UnavailableTabStore`]: a store whose every operation fails, modelling
//!   storage that the host has disabled

mod error;
mod memory;

pub use error::StoreError;
pub use memory::{MemoryTabStore, UnavailableTabStore};

/// A per-tab volatile key-value store.
///
/// Operations are atomic from the caller's perspective. Implementations must
/// be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait TabStore: Send + Sync + 'static {
    /// Read a value by key.
    ///
    /// Returns `Ok(None)` if the key is not set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the store cannot be read.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a key, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the store rejects the write.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Remove`] if the store cannot be modified.
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}
