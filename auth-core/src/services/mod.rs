//! Service layer: token issuance, sessions, lockout, RBAC, credentials.

pub mod auth;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod lockout;
pub mod notify;
pub mod rbac;
pub mod session;

pub use auth::{AuthService, AuthServiceOptions, LoginOutcome};
pub use credentials::{CredentialService, ProvisioningData};
pub use error::CoreError;
pub use jwt::{new_refresh_token, AccessClaims, PendingTwoFactorClaims, TokenIssuer, TokenPair};
pub use lockout::LockoutTracker;
pub use notify::{
    MockOtpDelivery, NoopNotifier, OtpDelivery, RecordingNotifier, SecurityEvent, SecurityNotifier,
};
pub use rbac::{RbacResolver, MAX_ROLE_DEPTH};
pub use session::SessionService;
