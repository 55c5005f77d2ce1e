//! Lockout state model - sliding-window failed-attempt counter per user.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Lockout state entity, created lazily on the first failure.
#[derive(Debug, Clone, FromRow)]
pub struct LockoutState {
    pub user_id: Uuid,
    pub failure_count: i32,
    pub window_start_utc: DateTime<Utc>,
    pub locked_until_utc: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// Start a fresh window with one recorded failure.
    pub fn first_failure(user_id: Uuid) -> Self {
        Self {
            user_id,
            failure_count: 1,
            window_start_utc: Utc::now(),
            locked_until_utc: None,
        }
    }

    /// Seconds until an active lock expires, if any.
    pub fn lock_remaining_seconds(&self) -> Option<i64> {
        let until = self.locked_until_utc?;
        let remaining = (until - Utc::now()).num_seconds();
        (remaining > 0).then_some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_state_is_not_locked() {
        let state = LockoutState::first_failure(Uuid::new_v4());
        assert_eq!(state.failure_count, 1);
        assert!(state.lock_remaining_seconds().is_none());
    }

    #[test]
    fn expired_lock_reports_no_remaining_time() {
        let mut state = LockoutState::first_failure(Uuid::new_v4());
        state.locked_until_utc = Some(Utc::now() - Duration::minutes(1));
        assert!(state.lock_remaining_seconds().is_none());
    }

    #[test]
    fn active_lock_reports_remaining_time() {
        let mut state = LockoutState::first_failure(Uuid::new_v4());
        state.locked_until_utc = Some(Utc::now() + Duration::minutes(30));
        let remaining = state.lock_remaining_seconds().unwrap();
        assert!(remaining > 29 * 60);
    }
}
