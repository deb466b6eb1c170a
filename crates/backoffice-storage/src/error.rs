//! Store error types.

/// Errors that can occur during tab-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Storage is disabled or otherwise unreachable for this tab.
    #[error("tab storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// Failed to read a value.
    #[error("failed to read key '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Failed to write a value.
    #[error("failed to write key '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Failed to remove a key.
    #[error("failed to remove key '{key}': {reason}")]
    Remove { key: String, reason: String },
}
