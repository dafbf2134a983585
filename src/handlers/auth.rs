//! HTTP routes for the authentication flows
//!
//! All bodies are JSON. Credentials travel in `Authorization: Bearer`
//! headers for authenticated routes and in the body for refresh and
//! password-reset exchanges.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use futures_util::{Stream, StreamExt};
use warp::hyper::body::Bytes;
use warp::{Buf, Filter, Rejection, Reply};

use super::middleware::{handle_rejection, reject, require_permissions, with_auth, with_service};
use crate::auth::permission::{Action, Permission, PermissionSet};
use crate::auth::service::{AuthService, Session};
use crate::auth::token::{IssuedToken, TokenScope};
use crate::error::RustyGateError;

const MAX_BODY_BYTES: u64 = 16 * 1024;

type HandlerResult<T> = std::result::Result<T, Rejection>;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username, email or phone
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct IdentifierRequest {
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub identifier: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub reset_token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// A single scoped credential (email verification, password reset)
#[derive(Debug, Serialize)]
pub struct ScopedTokenResponse {
    pub token: String,
    pub scope: TokenScope,
    pub expires_at: i64,
}

impl From<IssuedToken> for ScopedTokenResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            scope: issued.claims.scope,
            expires_at: issued.claims.exp,
            token: issued.token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub user_id: String,
    pub permissions: PermissionSet,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Raw body that may be absent entirely. The size cap is enforced while
/// reading, so chunked bodies without `Content-Length` are bounded too.
fn optional_body() -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::body::stream().and_then(|body| async move { read_limited(body, MAX_BODY_BYTES).await.map_err(reject) })
}

async fn read_limited<S, B>(body: S, limit: u64) -> crate::error::Result<Bytes>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    futures_util::pin_mut!(body);
    let mut collected: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let mut chunk =
            chunk.map_err(|e| RustyGateError::ValidationError(format!("Unreadable request body: {}", e)))?;
        if (collected.len() + chunk.remaining()) as u64 > limit {
            return Err(RustyGateError::PayloadTooLarge(limit));
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let len = part.len();
            collected.extend_from_slice(part);
            chunk.advance(len);
        }
    }
    Ok(Bytes::from(collected))
}

fn json<T: Serialize>(value: &T) -> warp::reply::Json {
    warp::reply::json(value)
}

// ---- handlers ----

async fn register(body: RegisterRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let profile = service
        .register(&body.username, body.email.as_deref(), body.phone.as_deref(), &body.password)
        .await
        .map_err(reject)?;
    Ok(warp::reply::with_status(json(&profile), StatusCode::CREATED))
}

async fn verify_email(body: CodeRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let issued = service
        .verify_email(&body.identifier, &body.code)
        .await
        .map_err(reject)?;
    Ok(json(&ScopedTokenResponse::from(issued)))
}

async fn login(body: LoginRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let pair = service.login(&body.identifier, &body.password).await.map_err(reject)?;
    Ok(json(&pair))
}

async fn request_login_otp(body: IdentifierRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    service.request_login_otp(&body.identifier).await.map_err(reject)?;
    Ok(json(&MessageResponse::new("If the account exists, a login code has been sent")))
}

async fn login_with_otp(body: CodeRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let pair = service
        .login_with_otp(&body.identifier, &body.code)
        .await
        .map_err(reject)?;
    Ok(json(&pair))
}

async fn refresh(body: RefreshRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let pair = service.refresh(&body.refresh_token).await.map_err(reject)?;
    Ok(json(&pair))
}

async fn logout(session: Session, body: Bytes, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let request: LogoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| reject(RustyGateError::ValidationError(format!("Invalid logout body: {}", e))))?
    };

    service
        .logout(&session.token, request.refresh_token.as_deref())
        .await
        .map_err(reject)?;
    Ok(json(&MessageResponse::new("Logged out")))
}

async fn forgot_password(body: IdentifierRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    service.forgot_password(&body.identifier).await.map_err(reject)?;
    Ok(json(&MessageResponse::new("If the account exists, a reset code has been sent")))
}

async fn verify_reset_otp(body: CodeRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let issued = service
        .verify_reset_otp(&body.identifier, &body.code)
        .await
        .map_err(reject)?;
    Ok(json(&ScopedTokenResponse::from(issued)))
}

async fn reset_password(body: ResetPasswordRequest, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    service
        .reset_password(&body.reset_token, &body.new_password)
        .await
        .map_err(reject)?;
    Ok(json(&MessageResponse::new("Password has been reset")))
}

async fn change_password(
    session: Session,
    body: ChangePasswordRequest,
    service: Arc<AuthService>,
) -> HandlerResult<impl Reply> {
    service
        .change_password(&session.token, &body.old_password, &body.new_password)
        .await
        .map_err(reject)?;
    Ok(json(&MessageResponse::new("Password changed, please log in again")))
}

async fn me(session: Session, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let profile = service.profile(session.user_id()).await.map_err(reject)?;
    Ok(json(&profile))
}

async fn my_permissions(session: Session, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let permissions = service
        .effective_permissions(session.user_id())
        .await
        .map_err(reject)?;
    Ok(json(&PermissionsResponse {
        user_id: session.claims.user_id,
        permissions,
    }))
}

async fn clear_revocations(session: Session, service: Arc<AuthService>) -> HandlerResult<impl Reply> {
    let cleared = service.clear_revocations().await.map_err(reject)?;
    log::warn!("User {} cleared {} revocation markers", session.user_id(), cleared);
    Ok(json(&ClearedResponse { cleared }))
}

// ---- routing ----

/// Every route, without rejection handling
pub fn routes(service: Arc<AuthService>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path!("health").and(warp::get()).map(|| "OK");

    let register = warp::path!("api" / "auth" / "register")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(register);

    let verify_email = warp::path!("api" / "auth" / "verify-email")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(verify_email);

    let login = warp::path!("api" / "auth" / "login")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(login);

    let request_login_otp = warp::path!("api" / "auth" / "login" / "otp")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(request_login_otp);

    let login_with_otp = warp::path!("api" / "auth" / "login" / "otp" / "verify")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(login_with_otp);

    let refresh = warp::path!("api" / "auth" / "refresh")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(refresh);

    let logout = warp::path!("api" / "auth" / "logout")
        .and(warp::post())
        .and(with_auth(service.clone()))
        .and(optional_body())
        .and(with_service(service.clone()))
        .and_then(logout);

    let forgot_password = warp::path!("api" / "auth" / "forgot-password")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(forgot_password);

    let verify_reset_otp = warp::path!("api" / "auth" / "verify-reset-otp")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(verify_reset_otp);

    let reset_password = warp::path!("api" / "auth" / "reset-password")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(reset_password);

    let change_password = warp::path!("api" / "auth" / "change-password")
        .and(warp::post())
        .and(with_auth(service.clone()))
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(change_password);

    let me = warp::path!("api" / "me")
        .and(warp::get())
        .and(with_auth(service.clone()))
        .and(with_service(service.clone()))
        .and_then(me);

    let my_permissions = warp::path!("api" / "me" / "permissions")
        .and(warp::get())
        .and(with_auth(service.clone()))
        .and(with_service(service.clone()))
        .and_then(my_permissions);

    let clear_revocations = warp::path!("api" / "admin" / "revocations")
        .and(warp::delete())
        .and(require_permissions(service.clone(), vec![Permission::new("token", Action::Manage)]))
        .and(with_service(service))
        .and_then(clear_revocations);

    let auth_routes = register
        .or(verify_email)
        .or(login)
        .or(request_login_otp)
        .or(login_with_otp)
        .or(refresh)
        .or(logout)
        .or(forgot_password)
        .or(verify_reset_otp)
        .or(reset_password)
        .or(change_password);

    health
        .or(auth_routes)
        .or(me)
        .or(my_permissions)
        .or(clear_revocations)
}

/// Every route with JSON error rendering
pub fn api(service: Arc<AuthService>) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    routes(service).recover(handle_rejection)
}
