//! Authentication and authorization module

pub mod notifier;
pub mod otp;
pub mod permission;
pub mod service;
pub mod throttle;
pub mod token;
pub mod user;

// Re-export main components
pub use notifier::{LogNotifier, OtpNotifier, RecordingNotifier, SharedNotifier};
pub use otp::{OtpManager, OtpPurpose};
pub use permission::{Action, Permission, PermissionResolver, PermissionSet};
pub use service::{AuthService, Session, TokenPair};
pub use throttle::{LoginThrottle, ThrottleState};
pub use token::{Claims, TokenManager, TokenScope, TokenSubject};
pub use user::UserProfile;
