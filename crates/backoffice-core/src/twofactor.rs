//! Step-up 2FA collaborators: the settings projection and the remote
//! verification endpoint.

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::identity::SubjectId;

/// Read-only 2FA status for one identity.
///
/// This projection is all the guard ever sees; it has no field for the
/// shared TOTP secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFactorStatus {
    #[serde(rename = "user_id")]
    pub subject_id: SubjectId,
    pub is_enabled: bool,
    pub is_blocked: bool,
    #[serde(default)]
    pub failed_attempts: u32,
}

/// Outcome reported by the verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Source of [`TwoFactorStatus`] projections.
#[async_trait::async_trait]
pub trait TwoFactorDirectory: Send + Sync + 'static {
    /// Fetch the projection for `subject`, or `None` if 2FA is not set up.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the projection could not be read.
    async fn fetch_status(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<TwoFactorStatus>, BackendError>;
}

/// The remote one-time-code verification endpoint.
#[async_trait::async_trait]
pub trait CodeVerifier: Send + Sync + 'static {
    /// Verify `code` on behalf of the holder of `access_token`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on network failure or an undecodable body.
    /// A wrong code is not an error: it is `Ok` with `success == false`.
    async fn verify(&self, access_token: &str, code: &str) -> Result<VerifyResponse, BackendError>;
}
