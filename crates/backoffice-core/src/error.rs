//! Error types for `backoffice-core`.
//!
//! Collaborator failures arrive as [`BackendError`]. Messages never include
//! access tokens or one-time codes.

/// Failure reported by a hosted-backend collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No signed-in session to authenticate the request with.
    #[error("not signed in")]
    NotSignedIn,

    /// The backend answered with a non-success status.
    #[error("backend error {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never produced a usable response (network, timeout).
    #[error("backend transport error: {reason}")]
    Transport { reason: String },

    /// The response body could not be decoded.
    #[error("backend response decode error: {reason}")]
    Decode { reason: String },
}

/// Errors from step-up code verification.
///
/// None of these leave the guard unlocked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// No identity, or its 2FA settings have not been loaded yet.
    #[error("2FA settings not found")]
    SettingsUnavailable,

    /// The account is blocked after too many failed attempts.
    #[error("your account is blocked, contact an administrator")]
    AccountBlocked,

    /// The identity provider has no access token for the request.
    #[error("no active session")]
    NoSession,

    /// The verification endpoint rejected the code.
    #[error("{message}")]
    Rejected { message: String },

    /// Network or decoding failure while verifying.
    #[error("an error occurred during verification")]
    Transport,

    /// A newer verification or identity change made this result obsolete.
    #[error("verification superseded by a newer request")]
    Superseded,
}

/// Errors from the rules content editor.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    /// The signed-in identity does not hold the admin role.
    #[error("you are not authorized to edit rules")]
    Forbidden,

    /// No identity is signed in.
    #[error("sign in to edit rules")]
    NotSignedIn,

    /// Saving requires a rules row loaded from the backend.
    #[error("no rules document loaded")]
    NotLoaded,

    /// A category, subcategory or rule id did not resolve.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Loading or saving through the backend failed.
    #[error("rules backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors from loading dashboard statistics.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// Fetching one of the source tables failed.
    #[error("failed to load '{table}': {source}")]
    Fetch {
        table: &'static str,
        #[source]
        source: BackendError,
    },
}
