//! Integration tests for the back-office client against an in-process fake
//! of the hosted backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use backoffice_client::{Backoffice, ClientConfig, ClientError};
use backoffice_core::error::BackendError;
use backoffice_core::identity::{AuthState, IdentityProvider, SubjectId};
use backoffice_core::rules::{RulesEditor, RulesRepository};
use backoffice_core::stats::load_dashboard;
use backoffice_core::twofactor::{CodeVerifier, TwoFactorDirectory};
use serde_json::{Value, json};

const ANON_KEY: &str = "anon-key";
const TOKEN: &str = "user-token";

#[derive(Clone, Default)]
struct Fake {
    saved_rules: Arc<Mutex<Vec<(HashMap<String, String>, Value, Option<String>)>>>,
    application_calls: Arc<AtomicU32>,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "JWT expired" })),
    )
        .into_response()
}

async fn token(
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    assert_eq!(q.get("grant_type").map(String::as_str), Some("password"));
    assert_eq!(headers.get("apikey").unwrap(), ANON_KEY);

    if body["email"] == "admin@example.com" && body["password"] == "correct horse" {
        Json(json!({
            "access_token": TOKEN,
            "refresh_token": "refresh",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": { "id": "u1", "email": "admin@example.com" }
        }))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })),
        )
            .into_response()
    }
}

async fn has_role(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if bearer(&headers) != Some(TOKEN) {
        return unauthorized();
    }
    let granted = body["_user_id"] == "u1" && body["_role"] == "admin";
    Json(granted).into_response()
}

async fn twofa_status(Query(q): Query<HashMap<String, String>>, headers: HeaderMap) -> Response {
    if bearer(&headers) != Some(TOKEN) {
        return unauthorized();
    }
    let rows = if q.get("user_id").map(String::as_str) == Some("eq.u1") {
        json!([{ "user_id": "u1", "is_enabled": true, "is_blocked": false, "failed_attempts": 2 }])
    } else {
        json!([])
    };
    Json(rows).into_response()
}

async fn verify_totp(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if bearer(&headers) != Some(TOKEN) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "Unauthorized" })),
        )
            .into_response();
    }
    if body["code"] == "123456" {
        Json(json!({ "success": true })).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Invalid code, 3 attempts left" })),
        )
            .into_response()
    }
}

async fn rules_get(headers: HeaderMap) -> Response {
    if bearer(&headers) != Some(TOKEN) {
        return unauthorized();
    }
    Json(json!([{
        "id": "row-1",
        "updated_at": "2025-01-01T00:00:00+00:00",
        "updated_by": null,
        "created_at": "2024-12-01T00:00:00+00:00",
        "data": [{
            "id": "1",
            "title": "General",
            "subCategories": [{
                "id": "1.1",
                "title": "Conduct",
                "rules": [{ "id": "1.1.1", "title": "No spam", "description": "Do not spam." }]
            }]
        }]
    }]))
    .into_response()
}

async fn rules_patch(
    State(fake): State<Fake>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if bearer(&headers) != Some(TOKEN) {
        return unauthorized();
    }
    let prefer = headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    fake.saved_rules.lock().unwrap().push((q, body, prefer));
    StatusCode::NO_CONTENT.into_response()
}

async fn applications(State(fake): State<Fake>) -> Response {
    // First call fails transiently.
    if fake.application_calls.fetch_add(1, Ordering::SeqCst) == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "upstream unavailable" })),
        )
            .into_response();
    }
    Json(json!([
        { "id": "a1", "status": "pending", "created_at": "2025-03-15T08:00:00+00:00" },
        { "id": "a2", "status": "approved", "created_at": "2025-03-14T08:00:00+00:00" }
    ]))
    .into_response()
}

async fn forms() -> Response {
    Json(json!([
        { "id": "f1", "is_active": true },
        { "id": "f2", "is_active": false }
    ]))
    .into_response()
}

async fn updates() -> Response {
    Json(json!([{ "id": "n1", "is_published": true }])).into_response()
}

/// Start the fake backend and a client pointed at it.
async fn start() -> (Backoffice, Fake) {
    let fake = Fake::default();
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(|| async { StatusCode::NO_CONTENT }))
        .route("/rest/v1/rpc/has_role", post(has_role))
        .route("/rest/v1/admin_2fa_status", get(twofa_status))
        .route("/rest/v1/rules", get(rules_get).patch(rules_patch))
        .route("/rest/v1/applications", get(applications))
        .route("/rest/v1/form_templates", get(forms))
        .route("/rest/v1/updates", get(updates))
        .route("/functions/v1/verify-totp", post(verify_totp))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let base_url = format!("http://{addr}");
    let client = Backoffice::with_config(ClientConfig {
        verify_url: format!("{base_url}/functions/v1/verify-totp"),
        base_url,
        anon_key: ANON_KEY.to_owned(),
        timeout: Some(Duration::from_secs(5)),
        max_retries: Some(2),
    })
    .unwrap();
    (client, fake)
}

async fn signed_in() -> (Backoffice, Fake) {
    let (client, fake) = start().await;
    client
        .sign_in_with_password("admin@example.com", "correct horse")
        .await
        .unwrap();
    (client, fake)
}

#[tokio::test]
async fn sign_in_publishes_identity_and_token() {
    let (client, _) = start().await;
    let mut rx = client.subscribe();
    assert_eq!(*rx.borrow(), AuthState::Loading);

    let identity = client
        .sign_in_with_password("admin@example.com", "correct horse")
        .await
        .unwrap();

    assert_eq!(identity.subject.as_str(), "u1");
    assert_eq!(identity.email.as_deref(), Some("admin@example.com"));
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().subject(), Some(&SubjectId::new("u1")));
    assert_eq!(client.access_token().await.as_deref(), Some(TOKEN));
}

#[tokio::test]
async fn bad_credentials_settle_signed_out() {
    let (client, _) = start().await;

    let err = client
        .sign_in_with_password("admin@example.com", "wrong")
        .await
        .unwrap_err();

    assert!(
        matches!(
            &err,
            ClientError::Api { status_code: 400, message } if message == "Invalid login credentials"
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(client.auth_state(), AuthState::SignedOut);
    assert_eq!(client.access_token().await, None);
}

#[tokio::test]
async fn sign_out_clears_session() {
    let (client, _) = signed_in().await;
    client.sign_out().await;
    assert_eq!(client.auth_state(), AuthState::SignedOut);
    assert!(client.current_session().await.is_none());
}

#[tokio::test]
async fn has_role_calls_rpc_with_user_token() {
    let (client, _) = signed_in().await;
    assert!(client.has_role(&SubjectId::new("u1"), "admin").await.unwrap());
    assert!(!client.has_role(&SubjectId::new("u1"), "editor").await.unwrap());
}

#[tokio::test]
async fn fetch_status_reads_projection() {
    let (client, _) = signed_in().await;

    let status = client
        .fetch_status(&SubjectId::new("u1"))
        .await
        .unwrap()
        .unwrap();
    assert!(status.is_enabled);
    assert!(!status.is_blocked);
    assert_eq!(status.failed_attempts, 2);

    let missing = client.fetch_status(&SubjectId::new("u2")).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn reads_require_a_session() {
    let (client, _) = start().await;
    let err = client.fetch_status(&SubjectId::new("u1")).await.unwrap_err();
    assert_eq!(err, BackendError::NotSignedIn);
}

#[tokio::test]
async fn verify_reads_body_whatever_the_status() {
    let (client, _) = signed_in().await;

    let ok = client.verify(TOKEN, "123456").await.unwrap();
    assert!(ok.success);

    let rejected = client.verify(TOKEN, "000000").await.unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.error.as_deref(), Some("Invalid code, 3 attempts left"));
}

#[tokio::test]
async fn rules_load_edit_and_save() {
    let (client, fake) = signed_in().await;
    let subject = SubjectId::new("u1");

    let doc = RulesRepository::load(&client).await.unwrap().unwrap();
    assert_eq!(doc.id.as_deref(), Some("row-1"));

    let mut editor = RulesEditor::open(&client, &subject, &client).await.unwrap();
    assert_eq!(editor.total_rules(), 1);
    editor.add_category();
    editor
        .save(&client, Some(&subject), chrono::Utc::now())
        .await
        .unwrap();
    assert!(!editor.is_dirty());

    let saved = fake.saved_rules.lock().unwrap();
    assert_eq!(saved.len(), 1);
    let (query, body, prefer) = &saved[0];
    assert_eq!(query.get("id").map(String::as_str), Some("eq.row-1"));
    assert_eq!(body["updated_by"], "u1");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"][1]["title"], "New Category");
    assert_eq!(prefer.as_deref(), Some("return=minimal"));
}

#[tokio::test]
async fn dashboard_retries_transient_failures() {
    let (client, fake) = signed_in().await;
    let today = chrono::NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();

    let stats = load_dashboard(&client, today).await.unwrap();

    assert_eq!(fake.application_calls.load(Ordering::SeqCst), 2);
    assert_eq!(stats.total_applications, 2);
    assert_eq!(stats.pending_applications, 1);
    assert_eq!((stats.active_forms, stats.total_forms), (1, 2));
    assert_eq!((stats.published_updates, stats.draft_updates), (1, 0));
    assert_eq!(stats.daily_applications.last().unwrap().count, 1);
}
