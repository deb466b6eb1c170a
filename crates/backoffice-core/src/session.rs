//! The tab-local session record.
//!
//! Two keys in the [`TabStore`]: the subject the record belongs to and its
//! absolute expiry in epoch milliseconds. A record is valid only for the
//! matching subject and only while `now < expires_at`. Everything else
//! (missing key, other subject, unparsable or past-due expiry) is treated
//! as "no session" and purged.
//!
//! Store failures never surface: a failed read is "no session", a failed
//! write is "save had no effect".

use backoffice_storage::TabStore;
use tracing::{debug, warn};

use crate::identity::SubjectId;

/// Key holding the subject id the record belongs to.
pub const SESSION_KEY: &str = "admin_2fa_session";

/// Key holding the absolute expiry (epoch milliseconds, decimal).
pub const SESSION_EXPIRY_KEY: &str = "admin_2fa_session_expiry";

/// A decoded session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub subject_id: SubjectId,
    pub expires_at: i64,
}

impl SessionRecord {
    /// Whether the record grants access to `subject` at `now`.
    #[must_use]
    pub fn is_valid_for(&self, subject: &SubjectId, now: i64) -> bool {
        self.subject_id == *subject && now < self.expires_at
    }
}

/// Whole seconds left until `expires_at`, rounded up, never negative.
#[must_use]
pub fn remaining_seconds(expires_at: i64, now: i64) -> u64 {
    let diff = expires_at.saturating_sub(now);
    if diff <= 0 {
        return 0;
    }
    let secs = diff / 1000 + i64::from(diff % 1000 != 0);
    u64::try_from(secs).unwrap_or(0)
}

/// Read the expiry of a record valid for `subject` at `now`.
///
/// Invalid records are purged before returning `None`.
pub async fn read_valid_expiry(store: &dyn TabStore, subject: &SubjectId, now: i64) -> Option<i64> {
    let stored_subject = match store.get_item(SESSION_KEY).await {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "session record unreadable");
            return None;
        }
    };
    let stored_expiry = match store.get_item(SESSION_EXPIRY_KEY).await {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "session expiry unreadable");
            return None;
        }
    };

    let had_any = stored_subject.is_some() || stored_expiry.is_some();
    let (Some(stored_subject), Some(stored_expiry)) = (stored_subject, stored_expiry) else {
        if had_any {
            clear(store).await;
        }
        return None;
    };

    let record = stored_expiry
        .trim()
        .parse::<i64>()
        .ok()
        .map(|expires_at| SessionRecord {
            subject_id: SubjectId::new(stored_subject),
            expires_at,
        });

    match record {
        Some(record) if record.is_valid_for(subject, now) => Some(record.expires_at),
        _ => {
            debug!(subject = %subject, "purging stale session record");
            clear(store).await;
            None
        }
    }
}

/// Write a record for `subject` expiring at `expires_at`.
///
/// Returns the expiry on success, `None` if the store rejected the write.
pub async fn save(store: &dyn TabStore, subject: &SubjectId, expires_at: i64) -> Option<i64> {
    let written = async {
        store.set_item(SESSION_KEY, subject.as_str()).await?;
        store
            .set_item(SESSION_EXPIRY_KEY, &expires_at.to_string())
            .await
    }
    .await;

    match written {
        Ok(()) => Some(expires_at),
        Err(e) => {
            warn!(error = %e, "failed to persist admin session record");
            None
        }
    }
}

/// Remove the record. Errors are ignored.
pub async fn clear(store: &dyn TabStore) {
    for key in [SESSION_KEY, SESSION_EXPIRY_KEY] {
        if let Err(e) = store.remove_item(key).await {
            debug!(key, error = %e, "failed to remove session key");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use backoffice_storage::{MemoryTabStore, UnavailableTabStore};

    use super::*;

    fn subject(id: &str) -> SubjectId {
        SubjectId::new(id)
    }

    #[test]
    fn remaining_rounds_up() {
        assert_eq!(remaining_seconds(10_000, 0), 10);
        assert_eq!(remaining_seconds(10_001, 0), 11);
        assert_eq!(remaining_seconds(10_000, 9_001), 1);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        assert_eq!(remaining_seconds(10_000, 10_000), 0);
        assert_eq!(remaining_seconds(10_000, 99_999), 0);
    }

    #[tokio::test]
    async fn saved_record_reads_back_for_same_subject() {
        let store = MemoryTabStore::new();
        save(&store, &subject("u1"), 5_000).await.unwrap();
        assert_eq!(
            read_valid_expiry(&store, &subject("u1"), 4_999).await,
            Some(5_000)
        );
    }

    #[tokio::test]
    async fn other_subject_never_reads_record_and_purges_it() {
        let store = MemoryTabStore::new();
        save(&store, &subject("u1"), 5_000).await.unwrap();
        assert_eq!(read_valid_expiry(&store, &subject("u2"), 0).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn record_expires_exactly_at_expiry() {
        let store = MemoryTabStore::new();
        save(&store, &subject("u1"), 5_000).await.unwrap();
        assert_eq!(read_valid_expiry(&store, &subject("u1"), 5_000).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unparsable_expiry_is_purged() {
        let store = MemoryTabStore::new();
        store.set_item(SESSION_KEY, "u1").await.unwrap();
        store.set_item(SESSION_EXPIRY_KEY, "soon").await.unwrap();
        assert_eq!(read_valid_expiry(&store, &subject("u1"), 0).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn half_written_record_is_purged() {
        let store = MemoryTabStore::new();
        store.set_item(SESSION_KEY, "u1").await.unwrap();
        assert_eq!(read_valid_expiry(&store, &subject("u1"), 0).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn expiry_without_subject_is_purged() {
        let store = MemoryTabStore::new();
        store.set_item(SESSION_EXPIRY_KEY, "5000").await.unwrap();
        assert_eq!(read_valid_expiry(&store, &subject("u1"), 0).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn empty_store_reads_as_no_session() {
        let store = MemoryTabStore::new();
        assert_eq!(read_valid_expiry(&store, &subject("u1"), 0).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn disabled_storage_means_no_session() {
        let store = UnavailableTabStore;
        assert_eq!(save(&store, &subject("u1"), 5_000).await, None);
        assert_eq!(read_valid_expiry(&store, &subject("u1"), 0).await, None);
        clear(&store).await;
    }
}
