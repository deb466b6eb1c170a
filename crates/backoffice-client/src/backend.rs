//! Collaborator trait implementations over the hosted backend.

use backoffice_core::error::BackendError;
use backoffice_core::identity::{AuthState, IdentityProvider, SubjectId};
use backoffice_core::rules::{MainCategory, RulesDocument, RulesRepository};
use backoffice_core::stats::{ApplicationRow, FormRow, StatsSource, UpdateRow};
use backoffice_core::twofactor::{
    CodeVerifier, TwoFactorDirectory, TwoFactorStatus, VerifyResponse,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::debug;

use crate::Backoffice;
use crate::error::ClientError;
use crate::types::{HasRoleArgs, RulesUpdate, VerifyRequest};

impl Backoffice {
    /// Read rows of a table as the signed-in user.
    async fn select<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<Vec<T>, ClientError> {
        let token = self.user_token().await?;
        let url = self.rest_url(path_and_query);
        let rows: Option<Vec<T>> = self
            .request::<_, ()>(Method::GET, &url, &token, None)
            .await?;
        Ok(rows.unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for Backoffice {
    fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.auth.subscribe()
    }

    async fn access_token(&self) -> Option<String> {
        self.user_token().await.ok()
    }

    async fn has_role(&self, user: &SubjectId, role: &str) -> Result<bool, BackendError> {
        let token = self.user_token().await?;
        let url = self.rest_url("rpc/has_role");
        let args = HasRoleArgs {
            user_id: user.as_str(),
            role,
        };
        let granted: Option<bool> = self
            .request(Method::POST, &url, &token, Some(&args))
            .await?;
        Ok(granted.unwrap_or(false))
    }
}

#[async_trait::async_trait]
impl TwoFactorDirectory for Backoffice {
    async fn fetch_status(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<TwoFactorStatus>, BackendError> {
        let path = format!(
            "admin_2fa_status?user_id=eq.{}&select=user_id,is_enabled,is_blocked,failed_attempts",
            urlencoding::encode(subject.as_str())
        );
        let rows: Vec<TwoFactorStatus> = self.select(&path).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait::async_trait]
impl CodeVerifier for Backoffice {
    async fn verify(&self, access_token: &str, code: &str) -> Result<VerifyResponse, BackendError> {
        // The endpoint reports a wrong code in the body, whatever the status.
        let resp = self
            .http()
            .post(self.verify_url())
            .bearer_auth(access_token)
            .json(&VerifyRequest { code })
            .send()
            .await
            .map_err(|e| BackendError::from(ClientError::Network(e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::from(ClientError::Network(e)))?;
        debug!(status = status.as_u16(), "verification endpoint answered");

        serde_json::from_str(&text).map_err(|e| BackendError::Decode {
            reason: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl RulesRepository for Backoffice {
    async fn load(&self) -> Result<Option<RulesDocument>, BackendError> {
        let rows: Vec<RulesDocument> = self.select("rules?select=*&limit=1").await?;
        Ok(rows.into_iter().next())
    }

    async fn save(
        &self,
        id: &str,
        data: &[MainCategory],
        updated_by: Option<&SubjectId>,
    ) -> Result<(), BackendError> {
        let token = self.user_token().await?;
        let url = self.rest_url(&format!("rules?id=eq.{}", urlencoding::encode(id)));
        let update = RulesUpdate {
            data,
            updated_by: updated_by.map(SubjectId::as_str),
        };
        self.request::<serde_json::Value, _>(Method::PATCH, &url, &token, Some(&update))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StatsSource for Backoffice {
    async fn applications(&self) -> Result<Vec<ApplicationRow>, BackendError> {
        Ok(self.select("applications?select=id,status,created_at").await?)
    }

    async fn forms(&self) -> Result<Vec<FormRow>, BackendError> {
        Ok(self.select("form_templates?select=id,is_active").await?)
    }

    async fn updates(&self) -> Result<Vec<UpdateRow>, BackendError> {
        Ok(self.select("updates?select=id,is_published").await?)
    }
}
