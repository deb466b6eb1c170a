//! The protected area and navigation.

/// The set of routes that require an unlocked admin session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedArea {
    prefix: String,
    lock_path: String,
}

impl ProtectedArea {
    #[must_use]
    pub fn new(prefix: impl Into<String>, lock_path: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            lock_path: lock_path.into(),
        }
    }

    /// Whether `path` sits under the protected prefix, matched on whole
    /// path segments (`/admin` and `/admin/x`, never `/administrator`).
    #[must_use]
    pub fn is_under_prefix(&self, path: &str) -> bool {
        path.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Whether `path` requires an unlocked session. The lock screen itself
    /// is excluded.
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        self.is_under_prefix(path) && !self.is_lock_screen(path)
    }

    #[must_use]
    pub fn is_lock_screen(&self, path: &str) -> bool {
        path == self.lock_path
    }

    #[must_use]
    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }
}

/// Performs redirects on behalf of the guard.
pub trait Navigator: Send + Sync + 'static {
    /// Move the user to `to`. `from` is the path they were on.
    fn redirect(&self, to: &str, from: &str);
}
