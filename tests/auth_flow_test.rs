//! End-to-end tests of the HTTP surface

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;

use rusty_gate::auth::otp::OtpPurpose;
use rusty_gate::auth::permission::Action;
use rusty_gate::auth::user::{hash_password, new_user_record};
use rusty_gate::auth::{AuthService, RecordingNotifier};
use rusty_gate::config::ServerConfig;
use rusty_gate::handlers;
use rusty_gate::security_logger::SecurityLogger;
use rusty_gate::storage::traits::{PermissionRecord, RecordStore, Role, RolePermissionGrant};
use rusty_gate::storage::{MemoryCache, MemoryRecordStore};

const PHONE: &str = "+841234567";
const PASSWORD: &str = "P@ssw0rd1";

struct TestApp {
    service: Arc<AuthService>,
    notifier: Arc<RecordingNotifier>,
    user_id: String,
}

async fn app() -> TestApp {
    let mut config = ServerConfig::for_testing();
    config.min_auth_response = Duration::ZERO;

    let records = Arc::new(MemoryRecordStore::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let user = new_user_record("alice", Some("alice@example.com"), Some(PHONE), hash_password(PASSWORD).unwrap());
    let user_id = user.id.clone();
    records.create_user(user).await.unwrap();

    records
        .upsert_permission(PermissionRecord {
            id: "p-token-manage".to_string(),
            resource: "token".to_string(),
            action: Action::Manage,
            description: Some("Administer credentials".to_string()),
            is_active: true,
        })
        .await
        .unwrap();
    records
        .upsert_role(Role {
            id: "r-admin".to_string(),
            name: "admin".to_string(),
            description: None,
            is_active: true,
        })
        .await
        .unwrap();
    records
        .upsert_role_permission(RolePermissionGrant {
            role_id: "r-admin".to_string(),
            permission_id: "p-token-manage".to_string(),
            is_active: true,
        })
        .await
        .unwrap();

    let service = Arc::new(AuthService::from_config(
        &config,
        records,
        Arc::new(MemoryCache::new()),
        notifier.clone(),
        Arc::new(SecurityLogger::new()),
    ));

    TestApp {
        service,
        notifier,
        user_id,
    }
}

async fn call(
    app: &TestApp,
    method: &str,
    path: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = warp::test::request().method(method).path(path);
    if let Some(body) = body {
        request = request.json(&body);
    }
    if let Some(token) = bearer {
        request = request.header("authorization", format!("Bearer {}", token));
    }

    let response = request.reply(&handlers::api(app.service.clone())).await;
    let status = response.status();
    let body = serde_json::from_slice(response.body()).unwrap_or(Value::Null);
    (status, body)
}

async fn login(app: &TestApp) -> Value {
    let (status, body) = call(
        app,
        "POST",
        "/api/auth/login",
        Some(json!({ "identifier": PHONE, "password": PASSWORD })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body
}

#[tokio::test]
async fn test_login_logout_then_request_rejected() {
    let app = app().await;
    let tokens = login(&app).await;
    let access = tokens["access_token"].as_str().unwrap();
    assert_eq!(tokens["token_type"], "Bearer");

    let (status, body) = call(&app, "GET", "/api/me", None, Some(access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["phone"], PHONE);
    assert!(body.get("password_hash").is_none());

    let (status, _) = call(&app, "POST", "/api/auth/logout", None, Some(access)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/api/me", None, Some(access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "revoked_credential");
}

#[tokio::test]
async fn test_logout_with_refresh_token_in_body() {
    let app = app().await;
    let tokens = login(&app).await;
    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/logout",
        Some(json!({ "refresh_token": refresh })),
        Some(access),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", "/api/auth/refresh", Some(json!({ "refresh_token": refresh })), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "revoked_credential");
}

#[tokio::test]
async fn test_oversized_logout_body_is_refused() {
    let app = app().await;
    let tokens = login(&app).await;
    let access = tokens["access_token"].as_str().unwrap();

    let response = warp::test::request()
        .method("POST")
        .path("/api/auth/logout")
        .header("authorization", format!("Bearer {}", access))
        .body(vec![b' '; 64 * 1024])
        .reply(&handlers::api(app.service.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // Nothing was revoked
    let (status, _) = call(&app, "GET", "/api/me", None, Some(access)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bad_credentials_on_request_path() {
    let app = app().await;

    let (status, body) = call(&app, "GET", "/api/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_credentials");

    let (status, body) = call(&app, "GET", "/api/me", None, Some("not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "malformed_credential");

    let tokens = login(&app).await;
    let refresh = tokens["refresh_token"].as_str().unwrap();
    let (status, body) = call(&app, "GET", "/api/me", None, Some(refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_scope");
}

#[tokio::test]
async fn test_lockout_over_http() {
    let app = app().await;
    let wrong = json!({ "identifier": PHONE, "password": "Wr0ngPass" });

    for _ in 0..5 {
        let (status, body) = call(&app, "POST", "/api/auth/login", Some(wrong.clone()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_credentials");
    }

    let response = warp::test::request()
        .method("POST")
        .path("/api/auth/login")
        .json(&json!({ "identifier": PHONE, "password": PASSWORD }))
        .reply(&handlers::api(app.service.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::LOCKED);
    assert!(response.headers().contains_key("retry-after"));
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["error"], "account_locked");
    assert!(body["message"].as_str().unwrap().contains("15 minute"));
}

#[tokio::test]
async fn test_refresh_rotation_over_http() {
    let app = app().await;
    let tokens = login(&app).await;
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let (status, rotated) = call(&app, "POST", "/api/auth/refresh", Some(json!({ "refresh_token": refresh })), None).await;
    assert_eq!(status, StatusCode::OK);
    let new_access = rotated["access_token"].as_str().unwrap();
    let (status, _) = call(&app, "GET", "/api/me", None, Some(new_access)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "POST", "/api/auth/refresh", Some(json!({ "refresh_token": refresh })), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_over_http() {
    let app = app().await;

    let (status, _) = call(&app, "POST", "/api/auth/forgot-password", Some(json!({ "identifier": PHONE })), None).await;
    assert_eq!(status, StatusCode::OK);
    let code = app.notifier.last_code(PHONE, OtpPurpose::ForgotPassword).await.unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/verify-reset-otp",
        Some(json!({ "identifier": PHONE, "code": code })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "reset_password");
    let reset_token = body["token"].as_str().unwrap().to_string();

    // A reset credential cannot be used as an access credential
    let (status, _) = call(&app, "GET", "/api/me", None, Some(&reset_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/reset-password",
        Some(json!({ "reset_token": reset_token, "new_password": "N3wPassword" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/reset-password",
        Some(json!({ "reset_token": reset_token, "new_password": "An0therPass" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "revoked_credential");

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/login",
        Some(json!({ "identifier": PHONE, "password": "N3wPassword" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_otp_exhaustion_over_http() {
    let app = app().await;
    call(&app, "POST", "/api/auth/forgot-password", Some(json!({ "identifier": PHONE })), None).await;

    let wrong = json!({ "identifier": PHONE, "code": "abcdef" });
    for _ in 0..3 {
        let (status, body) = call(&app, "POST", "/api/auth/verify-reset-otp", Some(wrong.clone()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_otp_code");
    }
    let (status, body) = call(&app, "POST", "/api/auth/verify-reset-otp", Some(wrong), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "otp_attempts_exceeded");
}

#[tokio::test]
async fn test_register_and_verify_email_over_http() {
    let app = app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/register",
        Some(json!({ "username": "bob", "email": "bob@example.com", "password": "S3curePass" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email_verified"], false);

    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/register",
        Some(json!({ "username": "bob", "password": "S3curePass" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let code = app
        .notifier
        .last_code("bob@example.com", OtpPurpose::Verification)
        .await
        .unwrap();
    let (status, body) = call(
        &app,
        "POST",
        "/api/auth/verify-email",
        Some(json!({ "identifier": "bob@example.com", "code": code })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "email_verification");
}

#[tokio::test]
async fn test_change_password_over_http() {
    let app = app().await;
    let tokens = login(&app).await;
    let access = tokens["access_token"].as_str().unwrap();

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/change-password",
        Some(json!({ "old_password": PASSWORD, "new_password": "N3wPassword" })),
        Some(access),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "GET", "/api/me", None, Some(access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_route_requires_permission() {
    let app = app().await;
    let tokens = login(&app).await;
    let access = tokens["access_token"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "GET", "/api/me/permissions", None, Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["permissions"], json!([]));

    let (status, body) = call(&app, "DELETE", "/api/admin/revocations", None, Some(&access)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    app.service.assign_role(&app.user_id, "r-admin", None).await.unwrap();

    let (status, body) = call(&app, "GET", "/api/me/permissions", None, Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["permissions"], json!([{ "resource": "token", "action": "manage" }]));

    let (status, body) = call(&app, "DELETE", "/api/admin/revocations", None, Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 0);
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let app = app().await;

    let response = warp::test::request()
        .path("/health")
        .reply(&handlers::api(app.service.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"OK");

    let (status, body) = call(&app, "GET", "/api/nothing-here", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = call(&app, "POST", "/api/auth/login", Some(json!({ "identifier": PHONE })), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_body");
}
