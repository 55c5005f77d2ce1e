use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::LockoutConfig;
use crate::models::LockoutState;
use crate::services::{CoreError, SecurityEvent, SecurityNotifier};
use crate::store::AuthStore;

/// Tracks failed login attempts per user and enforces temporary locks.
///
/// The window is sliding in the simple sense: a failure after the window
/// has elapsed starts a fresh count rather than extending the old one.
/// Enforcement happens at the login boundary; already-issued tokens are
/// untouched by a lock.
#[derive(Clone)]
pub struct LockoutTracker {
    store: Arc<dyn AuthStore>,
    notifier: Arc<dyn SecurityNotifier>,
    config: LockoutConfig,
}

impl LockoutTracker {
    pub fn new(
        store: Arc<dyn AuthStore>,
        notifier: Arc<dyn SecurityNotifier>,
        config: LockoutConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Reject up front if the account is currently locked.
    pub async fn check(&self, user_id: Uuid) -> Result<(), CoreError> {
        if let Some(state) = self.store.load_lockout(user_id).await? {
            if let Some(remaining) = state.lock_remaining_seconds() {
                return Err(CoreError::AccountLocked {
                    retry_after_seconds: remaining,
                });
            }
        }
        Ok(())
    }

    /// Count one failed password attempt, locking the account when the
    /// threshold is crossed inside the window.
    pub async fn record_failure(&self, tenant_id: Uuid, user_id: Uuid) -> Result<(), CoreError> {
        let now = Utc::now();
        let window = Duration::minutes(self.config.window_minutes);

        let mut state = match self.store.load_lockout(user_id).await? {
            Some(mut existing) if now - existing.window_start_utc <= window => {
                existing.failure_count += 1;
                existing
            }
            _ => LockoutState::first_failure(user_id),
        };

        if state.failure_count >= self.config.max_failures && state.locked_until_utc.is_none() {
            let locked_until = now + Duration::minutes(self.config.lock_minutes);
            state.locked_until_utc = Some(locked_until);
            tracing::warn!(
                user_id = %user_id,
                failures = state.failure_count,
                locked_until = %locked_until,
                "account locked after repeated login failures"
            );
            self.notifier
                .notify(SecurityEvent::AccountLocked {
                    tenant_id,
                    user_id,
                    locked_until_seconds: self.config.lock_minutes * 60,
                })
                .await;
        }

        self.store.upsert_lockout(&state).await
    }

    /// A successful login wipes the failure history.
    pub async fn record_success(&self, user_id: Uuid) -> Result<(), CoreError> {
        self.store.clear_lockout(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RecordingNotifier;
    use crate::store::MemoryStore;

    fn tracker(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> LockoutTracker {
        LockoutTracker::new(
            store,
            notifier,
            LockoutConfig {
                max_failures: 3,
                window_minutes: 15,
                lock_minutes: 30,
            },
        )
    }

    #[tokio::test]
    async fn locks_after_threshold_and_reports_remaining_time() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let tracker = tracker(store.clone(), notifier.clone());
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        for _ in 0..3 {
            tracker.check(user_id).await.unwrap();
            tracker.record_failure(tenant_id, user_id).await.unwrap();
        }

        match tracker.check(user_id).await {
            Err(CoreError::AccountLocked {
                retry_after_seconds,
            }) => {
                assert!(retry_after_seconds > 0 && retry_after_seconds <= 30 * 60);
            }
            other => panic!("expected AccountLocked, got {:?}", other.err()),
        }
        assert_eq!(notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn success_clears_accumulated_failures() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let tracker = tracker(store.clone(), notifier.clone());
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        tracker.record_failure(tenant_id, user_id).await.unwrap();
        tracker.record_failure(tenant_id, user_id).await.unwrap();
        tracker.record_success(user_id).await.unwrap();
        tracker.record_failure(tenant_id, user_id).await.unwrap();

        tracker.check(user_id).await.unwrap();
        assert!(notifier.events().is_empty());
    }
}
