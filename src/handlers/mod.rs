//! HTTP handlers and filters for the authentication API

pub mod auth;
pub mod middleware;

pub use auth::{api, routes};
pub use middleware::{handle_rejection, require_permissions, with_auth, ApiRejection};
