//! HTTP client for the back-office hosted backend.
//!
//! A single [`Backoffice`] value holds the project's anonymous key, the
//! signed-in session and the auth state channel. It implements every
//! collaborator trait `backoffice-core` asks for: identity, 2FA status,
//! code verification, rules storage and dashboard rows.
//!
//! # Example
//!
//! ```rust,no_run
//! use backoffice_client::{Backoffice, ClientConfig};
//!
//! # async fn example() -> Result<(), backoffice_client::ClientError> {
//! let client = Backoffice::with_config(ClientConfig {
//!     base_url: "https://project.example.co".to_owned(),
//!     anon_key: std::env::var("BACKOFFICE_ANON_KEY").unwrap_or_default(),
//!     ..Default::default()
//! })?;
//! let identity = client.sign_in_with_password("admin@example.com", "hunter2").await?;
//! assert!(!identity.subject.as_str().is_empty());
//! # Ok(())
//! # }
//! ```

mod backend;
mod client;
mod error;
mod types;

pub use error::ClientError;
pub use types::{AuthSession, AuthUser};

use std::sync::Arc;
use std::time::Duration;

use backoffice_core::identity::AuthState;
use tokio::sync::{RwLock, watch};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const VERIFY_FUNCTION_PATH: &str = "/functions/v1/verify-totp";

/// Configuration for the [`Backoffice`] client.
///
/// Empty or unset fields fall back to `BACKOFFICE_*` environment variables,
/// then to built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Project base URL. Env: `BACKOFFICE_URL`. Required.
    pub base_url: String,
    /// Public anonymous API key. Env: `BACKOFFICE_ANON_KEY`. Required.
    pub anon_key: String,
    /// Code verification endpoint. Env: `BACKOFFICE_VERIFY_URL`.
    /// Default: `<base_url>/functions/v1/verify-totp`.
    pub verify_url: String,
    /// Request timeout. Env: `BACKOFFICE_TIMEOUT_SECS`. Default: 10 seconds.
    pub timeout: Option<Duration>,
    /// Retries for idempotent reads. Env: `BACKOFFICE_MAX_RETRIES`. Default: 3.
    pub max_retries: Option<u32>,
}

/// Back-office backend client.
pub struct Backoffice {
    base_url: String,
    anon_key: String,
    verify_url: String,
    max_retries: u32,
    client: reqwest::Client,
    session: Arc<RwLock<Option<AuthSession>>>,
    auth: watch::Sender<AuthState>,
}
