//! Phone OTP challenge model.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// A pending phone-OTP challenge; only the code hash is stored.
#[derive(Debug, Clone, FromRow)]
pub struct OtpChallenge {
    pub challenge_id: Uuid,
    pub phone: String,
    pub code_hash: String,
    pub attempt_count: i32,
    pub expiry_utc: DateTime<Utc>,
    pub issued_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
}

impl OtpChallenge {
    pub fn new(phone: String, code_hash: String, expiry_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            challenge_id: Uuid::new_v4(),
            phone,
            code_hash,
            attempt_count: 0,
            expiry_utc: now + Duration::seconds(expiry_seconds),
            issued_utc: now,
            consumed_utc: None,
        }
    }

    pub fn hash_code(code: &str) -> String {
        let digest = Sha256::digest(code.as_bytes());
        hex::encode(digest)
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_utc <= Utc::now()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    /// Seconds until another code may be sent to this phone, given the
    /// configured cooldown. None once the cooldown has elapsed.
    pub fn cooldown_remaining_seconds(&self, cooldown_seconds: i64) -> Option<i64> {
        let until = self.issued_utc + Duration::seconds(cooldown_seconds);
        let remaining = (until - Utc::now()).num_seconds();
        (remaining > 0).then_some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_challenge_is_open() {
        let c = OtpChallenge::new("+15550001111".to_string(), OtpChallenge::hash_code("123456"), 300);
        assert!(!c.is_expired());
        assert!(!c.is_consumed());
        assert!(c.cooldown_remaining_seconds(60).is_some());
    }

    #[test]
    fn cooldown_elapses() {
        let mut c =
            OtpChallenge::new("+15550001111".to_string(), OtpChallenge::hash_code("123456"), 300);
        c.issued_utc = Utc::now() - Duration::seconds(120);
        assert!(c.cooldown_remaining_seconds(60).is_none());
    }
}
