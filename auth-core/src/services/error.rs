//! Error taxonomy for the authorization and session core.
//!
//! Authentication failures stay generic (`InvalidCredentials`) regardless
//! of which factor failed; lockouts and OTP cooldowns carry a retry-after
//! hint.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked, retry after {retry_after_seconds}s")]
    AccountLocked { retry_after_seconds: i64 },

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token signature")]
    TokenInvalidSignature,

    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Tenant mismatch")]
    TenantMismatch,

    #[error("Insufficient permission")]
    InsufficientPermission,

    #[error("OTP expired")]
    OtpExpired,

    #[error("OTP attempts exceeded")]
    OtpAttemptsExceeded,

    #[error("OTP cooldown, retry after {retry_after_seconds}s")]
    OtpCooldown { retry_after_seconds: i64 },

    #[error("Two-factor verification required")]
    TwoFactorRequired,

    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl CoreError {
    /// Whether a caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ServiceUnavailable | CoreError::Database(_))
    }
}
