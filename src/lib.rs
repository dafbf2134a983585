//! Rusty Gate - session and authorization security core
//!
//! Bearer credential issuance and validation, revocation, brute-force login
//! throttling, one-time codes and cache-aside permission resolution, plus the
//! authentication flows and a warp HTTP surface built on top of them.

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod security;
pub mod security_logger;
pub mod storage;

// Re-export main components
pub use auth::{AuthService, Session};
pub use config::*;
pub use constants::*;
pub use error::{ErrorClass, Result, RustyGateError};
