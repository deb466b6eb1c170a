//! Backoffice client implementation: configuration, sign-in and the shared
//! request path.

use std::sync::Arc;
use std::time::Duration;

use backoffice_core::identity::{AuthState, Identity};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::types::{ApiErrorBody, AuthSession, PasswordGrant};
use crate::{
    Backoffice, ClientConfig, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, RETRY_BASE_DELAY,
    VERIFY_FUNCTION_PATH,
};

impl Backoffice {
    /// Create a client configured entirely from `BACKOFFICE_*` env vars.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the base URL or anon key is missing.
    pub fn new() -> Result<Self, ClientError> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the base URL or anon key is missing
    /// or a numeric env var does not parse.
    #[allow(clippy::needless_pass_by_value)]
    pub fn with_config(cfg: ClientConfig) -> Result<Self, ClientError> {
        let base_url = first_non_empty(&[
            &cfg.base_url,
            &std::env::var("BACKOFFICE_URL").unwrap_or_default(),
        ])
        .trim_end_matches('/')
        .to_owned();
        if base_url.is_empty() {
            return Err(ClientError::Config(
                "missing base URL: set BACKOFFICE_URL or pass base_url in config".to_owned(),
            ));
        }

        let anon_key = first_non_empty(&[
            &cfg.anon_key,
            &std::env::var("BACKOFFICE_ANON_KEY").unwrap_or_default(),
        ]);
        if anon_key.is_empty() {
            return Err(ClientError::Config(
                "missing anon key: set BACKOFFICE_ANON_KEY or pass anon_key in config".to_owned(),
            ));
        }

        let default_verify_url = format!("{base_url}{VERIFY_FUNCTION_PATH}");
        let verify_url = first_non_empty(&[
            &cfg.verify_url,
            &std::env::var("BACKOFFICE_VERIFY_URL").unwrap_or_default(),
            &default_verify_url,
        ]);

        let timeout = match cfg.timeout {
            Some(t) if !t.is_zero() => t,
            _ => env_number::<u64>("BACKOFFICE_TIMEOUT_SECS")?
                .filter(|secs| *secs > 0)
                .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
        };

        let max_retries = match cfg.max_retries {
            Some(n) => n,
            None => env_number("BACKOFFICE_MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES),
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("backoffice/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Network)?;

        Ok(Self {
            base_url,
            anon_key,
            verify_url,
            max_retries,
            client,
            session: Arc::new(RwLock::new(None)),
            auth: watch::channel(AuthState::Loading).0,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The current auth state.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.auth.borrow().clone()
    }

    /// A copy of the signed-in session, if any.
    pub async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    /// Sign in with email and password and publish the new identity.
    ///
    /// A failed attempt settles a still-loading auth state to signed out.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Api`/`Auth` for rejected credentials, or a
    /// transport error.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ClientError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let grant = PasswordGrant { email, password };

        match self
            .request::<AuthSession, _>(Method::POST, &url, &self.anon_key, Some(&grant))
            .await
        {
            Ok(session) => {
                let identity = session.identity();
                info!(subject = %identity.subject, "signed in");
                self.restore(session).await;
                Ok(identity)
            }
            Err(e) => {
                warn!(error = %e, "sign-in failed");
                self.settle_signed_out();
                Err(e)
            }
        }
    }

    /// Adopt an existing session (e.g. one persisted by the caller).
    pub async fn restore(&self, session: AuthSession) -> Identity {
        let identity = session.identity();
        *self.session.write().await = Some(session);
        self.auth.send_replace(AuthState::SignedIn(identity.clone()));
        identity
    }

    /// Resolve a still-loading auth state to signed out. No-op otherwise.
    pub fn settle_signed_out(&self) {
        self.auth.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            *state = AuthState::SignedOut;
            true
        });
    }

    /// End the session locally and, best effort, on the backend.
    pub async fn sign_out(&self) {
        let previous = self.session.write().await.take();
        if let Some(session) = previous {
            let url = format!("{}/auth/v1/logout", self.base_url);
            if let Err(e) = self
                .request::<serde_json::Value, ()>(Method::POST, &url, &session.access_token, None)
                .await
            {
                debug!(error = %e, "remote sign-out failed");
            }
            info!(subject = %session.user.id, "signed out");
        }
        self.auth.send_replace(AuthState::SignedOut);
    }

    // --- Crate-private ---

    pub(crate) fn rest_url(&self, path_and_query: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path_and_query)
    }

    pub(crate) fn verify_url(&self) -> &str {
        &self.verify_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// The signed-in access token, or `NotSignedIn`.
    pub(crate) async fn user_token(&self) -> Result<String, ClientError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(ClientError::NotSignedIn)
    }

    /// Send a request and decode the JSON response.
    ///
    /// Only `GET` is retried; writes and RPC calls go out once.
    pub(crate) async fn request<T, B>(
        &self,
        method: Method,
        url: &str,
        bearer: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let retries = if method == Method::GET {
            self.max_retries
        } else {
            0
        };
        let mut last_err = None;

        for attempt in 0..=retries {
            let mut req = self
                .client
                .request(method.clone(), url)
                .header("apikey", &self.anon_key)
                .bearer_auth(bearer);

            if method == Method::PATCH {
                req = req.header("Prefer", "return=minimal");
            }
            if let Some(b) = body {
                req = req.json(b);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let text = resp.text().await.map_err(ClientError::Network)?;
                        if text.trim().is_empty() {
                            return serde_json::from_str("null").map_err(ClientError::Json);
                        }
                        return serde_json::from_str(&text).map_err(ClientError::Json);
                    }

                    let error_text = resp.text().await.unwrap_or_default();
                    let msg = serde_json::from_str::<ApiErrorBody>(&error_text)
                        .ok()
                        .and_then(ApiErrorBody::into_message)
                        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(ClientError::Auth {
                            status_code: status.as_u16(),
                            message: msg,
                        });
                    }

                    last_err = Some(ClientError::Api {
                        status_code: status.as_u16(),
                        message: msg,
                    });

                    if attempt < retries && is_retryable(status) {
                        debug!(%url, status = status.as_u16(), attempt, "retrying request");
                        sleep_with_jitter(attempt).await;
                        continue;
                    }
                }
                Err(e) => {
                    last_err = Some(if e.is_timeout() {
                        ClientError::Timeout
                    } else {
                        ClientError::Network(e)
                    });

                    if attempt < retries {
                        debug!(%url, attempt, "retrying request after transport error");
                        sleep_with_jitter(attempt).await;
                        continue;
                    }
                }
            }

            break;
        }

        Err(last_err.unwrap_or(ClientError::Api {
            status_code: 0,
            message: "unknown error".to_owned(),
        }))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn sleep_with_jitter(attempt: u32) {
    // RETRY_BASE_DELAY is 500ms and retries are few, so values stay small.
    #[allow(clippy::cast_possible_truncation)]
    let base = (RETRY_BASE_DELAY.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt));
    let jitter = base.saturating_mul(u64::from(jitter_permille())) / 1000 * 3 / 10;
    tokio::time::sleep(Duration::from_millis(base.saturating_add(jitter))).await;
}

/// Pseudo-random value in `0..1000` from the system clock.
fn jitter_permille() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        % 1000
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ClientError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{name} must be a non-negative integer"))),
        _ => Ok(None),
    }
}

fn first_non_empty(vals: &[&str]) -> String {
    vals.iter()
        .find(|v| !v.is_empty())
        .map(|v| (*v).to_owned())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn explicit() -> ClientConfig {
        ClientConfig {
            base_url: "https://project.example.co/".to_owned(),
            anon_key: "anon".to_owned(),
            verify_url: String::new(),
            timeout: Some(Duration::from_secs(2)),
            max_retries: Some(0),
        }
    }

    #[test]
    fn first_non_empty_skips_blanks() {
        assert_eq!(first_non_empty(&["", "b", "c"]), "b");
        assert_eq!(first_non_empty(&["", ""]), "");
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn explicit_config_derives_urls_and_starts_loading() {
        let client = Backoffice::with_config(explicit()).unwrap();
        assert_eq!(client.base_url(), "https://project.example.co");
        assert_eq!(
            client.rest_url("rules?limit=1"),
            "https://project.example.co/rest/v1/rules?limit=1"
        );
        if std::env::var("BACKOFFICE_VERIFY_URL").is_err() {
            assert_eq!(
                client.verify_url(),
                "https://project.example.co/functions/v1/verify-totp"
            );
        }
        assert_eq!(client.auth_state(), AuthState::Loading);
        assert!(matches!(
            client.user_token().await,
            Err(ClientError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn settle_only_resolves_loading() {
        let client = Backoffice::with_config(explicit()).unwrap();
        client.settle_signed_out();
        assert_eq!(client.auth_state(), AuthState::SignedOut);

        client
            .restore(AuthSession {
                access_token: "tok".to_owned(),
                refresh_token: None,
                expires_in: None,
                user: crate::AuthUser {
                    id: "u1".to_owned(),
                    email: None,
                },
            })
            .await;
        client.settle_signed_out();
        assert_eq!(
            client
                .auth_state()
                .subject()
                .map(|s| s.as_str().to_owned())
                .as_deref(),
            Some("u1")
        );
    }
}
