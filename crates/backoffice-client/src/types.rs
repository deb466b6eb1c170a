//! Wire types for the back-office client.

use std::fmt;

use backoffice_core::identity::Identity;
use serde::{Deserialize, Serialize};

/// The account behind an [`AuthSession`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A signed-in session as issued by the token endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of `access_token` in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            subject: self.user.id.clone().into(),
            email: self.user.email.clone(),
        }
    }
}

// Tokens stay out of logs.
impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

// --- Internal API request/response types ---

#[derive(Serialize)]
pub(crate) struct PasswordGrant<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct HasRoleArgs<'a> {
    #[serde(rename = "_user_id")]
    pub user_id: &'a str,
    #[serde(rename = "_role")]
    pub role: &'a str,
}

#[derive(Serialize)]
pub(crate) struct VerifyRequest<'a> {
    pub code: &'a str,
}

#[derive(Serialize)]
pub(crate) struct RulesUpdate<'a, T: Serialize> {
    pub data: T,
    pub updated_by: Option<&'a str>,
}

/// The error shapes the backend services answer with: the REST layer uses
/// `message`, the auth service `error_description` or `msg`, functions a
/// bare `error` string.
#[derive(Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: Option<String>,
    pub error_description: Option<String>,
    pub msg: Option<String>,
    pub error: Option<serde_json::Value>,
}

impl ApiErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.message
            .or(self.error_description)
            .or(self.msg)
            .or_else(|| match self.error {
                Some(serde_json::Value::String(s)) => Some(s),
                _ => None,
            })
    }
}
