//! Refresh session model - one row per rotating refresh-token family.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh session entity.
///
/// `current_hash` is the only live token hash at any instant; the hash it
/// superseded is kept in `previous_hash` for one-shot reuse detection.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshSession {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub client_fingerprint: String,
    pub current_hash: String,
    pub previous_hash: Option<String>,
    pub rotation_count: i32,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub expiry_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshSession {
    /// Create a new session for a freshly issued refresh token.
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        branch_id: Option<Uuid>,
        client_fingerprint: String,
        token_hash: String,
        expiry_days: i64,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            branch_id,
            client_fingerprint,
            current_hash: token_hash,
            previous_hash: None,
            rotation_count: 0,
            revoked_utc: None,
            expiry_utc: Utc::now() + Duration::days(expiry_days),
            created_utc: Utc::now(),
        }
    }

    /// Hash an opaque refresh token for storage; the plaintext is never
    /// persisted.
    pub fn hash_token(token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        hex::encode(digest)
    }

    /// Check if the session can still rotate (not expired, not revoked).
    pub fn is_live(&self) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > Utc::now()
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_utc <= Utc::now()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}

/// Session info projection for "manage devices" style listings.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub client_fingerprint: String,
    pub rotation_count: i32,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl From<RefreshSession> for SessionInfo {
    fn from(s: RefreshSession) -> Self {
        Self {
            session_id: s.session_id,
            client_fingerprint: s.client_fingerprint,
            rotation_count: s.rotation_count,
            created_utc: s.created_utc,
            expiry_utc: s.expiry_utc,
        }
    }
}
