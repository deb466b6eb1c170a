//! Error types for the back-office client.

use backoffice_core::error::BackendError;

/// All errors that can occur when talking to the hosted backend.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Missing or invalid configuration.
    #[error("backoffice config error: {0}")]
    Config(String),

    /// The backend returned an HTTP error.
    #[error("backoffice API error {status_code}: {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from the backend.
        message: String,
    },

    /// Authentication or authorization failed (401/403).
    #[error("backoffice auth error {status_code}: {message}")]
    Auth { status_code: u16, message: String },

    /// The call needs a signed-in session and there is none.
    #[error("not signed in")]
    NotSignedIn,

    /// Request timed out.
    #[error("backoffice request timed out")]
    Timeout,

    /// Network or HTTP client error.
    #[error("backoffice network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("backoffice json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ClientError> for BackendError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotSignedIn => Self::NotSignedIn,
            ClientError::Api {
                status_code,
                message,
            }
            | ClientError::Auth {
                status_code,
                message,
            } => Self::Api {
                status: status_code,
                message,
            },
            ClientError::Json(e) => Self::Decode {
                reason: e.to_string(),
            },
            e @ (ClientError::Config(_) | ClientError::Timeout | ClientError::Network(_)) => {
                Self::Transport {
                    reason: e.to_string(),
                }
            }
        }
    }
}
