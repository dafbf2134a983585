//! Authentication and authorization as warp filters
//!
//! `with_auth` extracts the bearer credential and yields a [`Session`];
//! `require_permissions` additionally enforces any-of authorization.
//! Failures travel as [`ApiRejection`] and are rendered by
//! [`handle_rejection`] as `{ "error": <code>, "message": <text> }`.

use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::{HeaderValue, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::auth::permission::Permission;
use crate::auth::service::{AuthService, Session};
use crate::error::{ErrorClass, RustyGateError};

/// Crate error carried through warp's rejection system
#[derive(Debug)]
pub struct ApiRejection(pub RustyGateError);

impl warp::reject::Reject for ApiRejection {}

pub fn reject(err: RustyGateError) -> Rejection {
    warp::reject::custom(ApiRejection(err))
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Make the shared service available to a handler
pub fn with_service(service: Arc<AuthService>) -> impl Filter<Extract = (Arc<AuthService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

/// Require a valid, unrevoked access credential
pub fn with_auth(service: Arc<AuthService>) -> impl Filter<Extract = (Session,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_service(service))
        .and_then(|header: Option<String>, service: Arc<AuthService>| async move {
            service.authenticate(header.as_deref()).await.map_err(reject)
        })
}

/// Require a valid credential whose subject holds any of `required`.
/// An empty list only requires authentication.
pub fn require_permissions(
    service: Arc<AuthService>,
    required: Vec<Permission>,
) -> impl Filter<Extract = (Session,), Error = Rejection> + Clone {
    let required = Arc::new(required);
    with_auth(service.clone())
        .and(with_service(service))
        .and_then(move |session: Session, service: Arc<AuthService>| {
            let required = required.clone();
            async move {
                service
                    .authorize(&session.claims, &required)
                    .await
                    .map_err(reject)?;
                Ok::<_, Rejection>(session)
            }
        })
}

/// HTTP status for a crate error
pub fn status_for(err: &RustyGateError) -> StatusCode {
    use RustyGateError::*;

    match err {
        MissingCredentials | MalformedCredential(_) | UnexpectedSigningMethod(_) | InvalidSignature => {
            StatusCode::UNAUTHORIZED
        }
        ExpiredCredential | RevokedCredential | InvalidScope { .. } | AlreadyExpired | InvalidCredentials => {
            StatusCode::UNAUTHORIZED
        }
        OtpNotFound | InvalidOtpCode { .. } => StatusCode::UNAUTHORIZED,
        Forbidden(_) | AccountDisabled => StatusCode::FORBIDDEN,
        AccountLocked(_) => StatusCode::LOCKED,
        OtpAttemptsExceeded => StatusCode::TOO_MANY_REQUESTS,
        NotFound(_) => StatusCode::NOT_FOUND,
        Conflict(_) => StatusCode::CONFLICT,
        MissingUniqueId | MissingExpiry | ValidationError(_) => StatusCode::BAD_REQUEST,
        PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        StorageError(_) | Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        SigningError(_) | ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(status: StatusCode, code: &str, message: String) -> warp::reply::Response {
    let body = ErrorBody {
        error: code.to_string(),
        message,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Render any rejection as a JSON error body
pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if let Some(ApiRejection(e)) = err.find::<ApiRejection>() {
        let message = match e.class() {
            // Internal details stay in the log
            ErrorClass::Dependency => {
                log::error!("Request failed on a dependency: {}", e);
                "Service temporarily unavailable".to_string()
            }
            _ => e.to_string(),
        };
        let mut response = error_reply(status_for(e), e.code(), message);
        if let RustyGateError::AccountLocked(remaining) = e {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(remaining.as_secs().max(1)));
        }
        return Ok(response);
    }

    if err.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "not_found", "Route not found".to_string()));
    }
    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(error_reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "Request body too large".to_string(),
        ));
    }
    if err.find::<warp::reject::LengthRequired>().is_some() {
        return Ok(error_reply(
            StatusCode::LENGTH_REQUIRED,
            "length_required",
            "A JSON body is required".to_string(),
        ));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method not allowed".to_string(),
        ));
    }

    log::error!("Unhandled rejection: {:?}", err);
    Ok(error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping_by_class() {
        assert_eq!(status_for(&RustyGateError::MissingCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&RustyGateError::RevokedCredential), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&RustyGateError::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&RustyGateError::AccountLocked(Duration::from_secs(60))),
            StatusCode::LOCKED
        );
        assert_eq!(status_for(&RustyGateError::OtpAttemptsExceeded), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(&RustyGateError::ValidationError("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&RustyGateError::Timeout("cache".into())), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_rejection_body_hides_dependency_details() {
        let response = handle_rejection(reject(RustyGateError::StorageError("redis://10.0.0.3 refused".into())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "storage_unavailable");
        assert!(!body["message"].as_str().unwrap().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_lockout_sets_retry_after() {
        let response = handle_rejection(reject(RustyGateError::AccountLocked(Duration::from_secs(120))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::LOCKED);
        assert_eq!(response.headers()["retry-after"], "120");
    }
}
