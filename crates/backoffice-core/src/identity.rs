//! Identity provider collaborator.
//!
//! The provider tells the guard who is signed in. Its state starts as
//! [`AuthState::Loading`] and must settle before anyone makes an
//! authenticated/unauthenticated decision, otherwise a reload would briefly
//! look like a sign-out and wipe the tab's admin session.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::BackendError;

/// Opaque identifier of an authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: SubjectId,
    pub email: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(subject: impl Into<SubjectId>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
        }
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What the identity provider currently knows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Initial resolution still in flight.
    #[default]
    Loading,
    /// Resolved: nobody is signed in.
    SignedOut,
    /// Resolved: this identity is signed in.
    SignedIn(Identity),
}

impl AuthState {
    /// Whether initial resolution has finished.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Loading)
    }

    /// The signed-in subject, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&SubjectId> {
        match self {
            Self::SignedIn(identity) => Some(&identity.subject),
            Self::Loading | Self::SignedOut => None,
        }
    }
}

/// The persistent account/identity provider.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Watch the provider's auth state.
    fn subscribe(&self) -> watch::Receiver<AuthState>;

    /// The current identity's access token, if a session exists.
    async fn access_token(&self) -> Option<String>;

    /// Whether `user` holds `role`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the role check could not be performed.
    async fn has_role(&self, user: &SubjectId, role: &str) -> Result<bool, BackendError>;
}
