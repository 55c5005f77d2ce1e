use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{RefreshSession, SessionInfo};
use crate::services::jwt::new_refresh_token;
use crate::services::{CoreError, SecurityEvent, SecurityNotifier};
use crate::store::{AuthStore, HashMatch};
use crate::tenant::TenantContext;

/// Manages refresh-token families: opening, rotating, revoking.
///
/// Rotation is the only hot path. The store's compare-and-swap guarantees
/// exactly one winner among concurrent rotations of the same token; every
/// loser is handled as a replay.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn AuthStore>,
    notifier: Arc<dyn SecurityNotifier>,
    refresh_token_expiry_days: i64,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        notifier: Arc<dyn SecurityNotifier>,
        refresh_token_expiry_days: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            refresh_token_expiry_days,
        }
    }

    /// Open a new session and return it with the plaintext refresh token.
    /// The plaintext leaves this function exactly once and is never stored.
    pub async fn open_session(
        &self,
        ctx: &TenantContext,
        client_fingerprint: &str,
    ) -> Result<(RefreshSession, String), CoreError> {
        let (plain, hash) = new_refresh_token();
        let session = RefreshSession::new(
            ctx.tenant_id,
            ctx.user_id,
            ctx.branch_id,
            client_fingerprint.to_string(),
            hash,
            self.refresh_token_expiry_days,
        );
        self.store.insert_session(&session).await?;
        tracing::info!(
            session_id = %session.session_id,
            user_id = %ctx.user_id,
            "refresh session opened"
        );
        Ok((session, plain))
    }

    /// Rotate a presented refresh token, returning the updated session and
    /// the replacement plaintext token.
    ///
    /// A token that matches `previous_hash`, or loses the rotation race, is
    /// a replay: the whole family and every other session of the user are
    /// revoked before the caller sees the error.
    pub async fn rotate(&self, presented: &str) -> Result<(RefreshSession, String), CoreError> {
        let presented_hash = RefreshSession::hash_token(presented);
        let Some((session, matched)) = self.store.find_session_by_hash(&presented_hash).await?
        else {
            return Err(CoreError::TokenInvalidSignature);
        };

        if session.is_revoked() {
            // Family already dead; no further escalation needed.
            return Err(CoreError::TokenReuseDetected);
        }
        if session.is_expired() {
            return Err(CoreError::TokenExpired);
        }
        if matched == HashMatch::Previous {
            return self.handle_reuse(&session).await;
        }

        let (new_plain, new_hash) = new_refresh_token();
        let new_expiry = Utc::now() + Duration::days(self.refresh_token_expiry_days);
        let won = self
            .store
            .rotate_session(session.session_id, &presented_hash, &new_hash, new_expiry)
            .await?;
        if !won {
            // Someone else rotated this exact token first; this caller is
            // replaying a value that is no longer current.
            return self.handle_reuse(&session).await;
        }

        let Some((rotated, _)) = self.store.find_session_by_hash(&new_hash).await? else {
            return Err(anyhow::anyhow!("rotated session vanished mid-flight").into());
        };
        Ok((rotated, new_plain))
    }

    async fn handle_reuse(
        &self,
        session: &RefreshSession,
    ) -> Result<(RefreshSession, String), CoreError> {
        tracing::warn!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "refresh token replay detected, revoking all sessions for user"
        );
        self.store.revoke_session(session.session_id).await?;
        self.store
            .revoke_all_sessions_for_user(session.user_id)
            .await?;
        self.notifier
            .notify(SecurityEvent::TokenReuseDetected {
                tenant_id: session.tenant_id,
                user_id: session.user_id,
                session_id: session.session_id,
            })
            .await;
        Err(CoreError::TokenReuseDetected)
    }

    /// Revoke the session behind a presented refresh token. Idempotent:
    /// unknown or already-revoked tokens are not an error.
    pub async fn logout(&self, presented: &str) -> Result<(), CoreError> {
        let presented_hash = RefreshSession::hash_token(presented);
        if let Some((session, _)) = self.store.find_session_by_hash(&presented_hash).await? {
            self.store.revoke_session(session.session_id).await?;
            tracing::info!(session_id = %session.session_id, "session revoked on logout");
        }
        Ok(())
    }

    /// Revoke every live session of a user (password change, admin action).
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, CoreError> {
        let revoked = self.store.revoke_all_sessions_for_user(user_id).await?;
        if revoked > 0 {
            tracing::info!(user_id = %user_id, revoked, "revoked all sessions for user");
        }
        Ok(revoked)
    }

    /// Live sessions of a user, newest first.
    pub async fn active_sessions(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
    ) -> Result<Vec<SessionInfo>, CoreError> {
        let sessions = self.store.active_sessions_for_user(ctx, user_id).await?;
        Ok(sessions.into_iter().map(SessionInfo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RecordingNotifier;
    use crate::store::MemoryStore;

    fn service(
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> SessionService {
        SessionService::new(store, notifier, 30)
    }

    fn ctx() -> TenantContext {
        TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), None)
    }

    #[tokio::test]
    async fn rotation_invalidates_the_old_token() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let svc = service(store, notifier.clone());
        let ctx = ctx();

        let (_, token0) = svc.open_session(&ctx, "device-a").await.unwrap();
        let (session1, token1) = svc.rotate(&token0).await.unwrap();
        assert_eq!(session1.rotation_count, 1);
        assert_ne!(token0, token1);

        // token0 is now previous_hash; presenting it is a replay.
        assert!(matches!(
            svc.rotate(&token0).await,
            Err(CoreError::TokenReuseDetected)
        ));
        assert_eq!(notifier.events().len(), 1);

        // The replay killed the family; token1 no longer works either.
        assert!(matches!(
            svc.rotate(&token1).await,
            Err(CoreError::TokenReuseDetected)
        ));
        // But it does not fire a second alarm.
        assert_eq!(notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let svc = service(store, notifier.clone());

        assert!(matches!(
            svc.rotate("not-a-real-token").await,
            Err(CoreError::TokenInvalidSignature)
        ));
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let svc = service(store, notifier);
        let ctx = ctx();

        let (_, token) = svc.open_session(&ctx, "device-a").await.unwrap();
        svc.logout(&token).await.unwrap();
        svc.logout(&token).await.unwrap();
        svc.logout("never-issued").await.unwrap();

        assert!(matches!(
            svc.rotate(&token).await,
            Err(CoreError::TokenReuseDetected)
        ));
    }

    #[tokio::test]
    async fn concurrent_rotations_have_exactly_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let svc = service(store, notifier);
        let ctx = ctx();

        let (_, token) = svc.open_session(&ctx, "device-a").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let svc = svc.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move { svc.rotate(&token).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
