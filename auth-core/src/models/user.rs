//! User model - tenant-scoped identity with credential material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Active,
    Suspended,
    Pending,
}

impl UserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserState::Active => "active",
            UserState::Suspended => "suspended",
            UserState::Pending => "pending",
        }
    }
}

/// User entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    /// Phone number for OTP login (parents/students); globally unique.
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub user_state_code: String,
    pub totp_enabled: bool,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new active user.
    pub fn new(tenant_id: Uuid, email: String, password_hash: String) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            email,
            phone: None,
            password_hash,
            user_state_code: UserState::Active.as_str().to_string(),
            totp_enabled: false,
            created_utc: Utc::now(),
        }
    }

    /// Check if the user may authenticate.
    pub fn is_active(&self) -> bool {
        self.user_state_code == UserState::Active.as_str()
    }
}
