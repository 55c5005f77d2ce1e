//! Two-factor credential models: TOTP secrets and single-use backup codes.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-user TOTP secret. Unconfirmed secrets (enrollment begun but the
/// first code never verified) do not gate login.
#[derive(Debug, Clone, FromRow)]
pub struct TotpSecret {
    pub user_id: Uuid,
    pub secret_base32: String,
    pub confirmed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl TotpSecret {
    pub fn new(user_id: Uuid, secret_base32: String) -> Self {
        Self {
            user_id,
            secret_base32,
            confirmed_utc: None,
            created_utc: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_utc.is_some()
    }
}

/// Single-use backup code; only the hash is stored.
#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub code_id: Uuid,
    pub user_id: Uuid,
    pub code_hash: String,
    pub consumed_utc: Option<DateTime<Utc>>,
}

impl BackupCode {
    pub fn new(user_id: Uuid, code_hash: String) -> Self {
        Self {
            code_id: Uuid::new_v4(),
            user_id,
            code_hash,
            consumed_utc: None,
        }
    }

    pub fn hash_code(code: &str) -> String {
        let digest = Sha256::digest(code.as_bytes());
        hex::encode(digest)
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }
}
