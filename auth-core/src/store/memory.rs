//! In-memory store implementation.
//!
//! Test double for the Postgres store; a single mutex around the whole
//! state gives every conditional update the same atomicity the SQL
//! implementation gets from single-row conditional UPDATEs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BackupCode, LockoutState, OtpChallenge, Permission, RefreshSession, Role, RoleAssignment,
    Tenant, TotpSecret, User,
};
use crate::services::CoreError;
use crate::store::{AuthStore, HashMatch};
use crate::tenant::TenantContext;
use crate::utils::constant_time_eq;

#[derive(Default)]
struct Inner {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, RefreshSession>,
    lockouts: HashMap<Uuid, LockoutState>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: Vec<(Uuid, Uuid)>,
    assignments: HashMap<Uuid, RoleAssignment>,
    totp_secrets: HashMap<Uuid, TotpSecret>,
    backup_codes: HashMap<Uuid, BackupCode>,
    challenges: HashMap<Uuid, OtpChallenge>,
}

/// In-memory `AuthStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, CoreError> {
        self.inner
            .lock()
            .map_err(|e| CoreError::Internal(anyhow::anyhow!("Store mutex poisoned: {}", e)))
    }

    /// Test hook: overwrite a lockout row (e.g. to backdate its window).
    pub fn put_lockout(&self, state: LockoutState) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.lockouts.insert(state.user_id, state);
        }
    }

    /// Test hook: overwrite a challenge row (e.g. to backdate issuance).
    pub fn put_challenge(&self, challenge: OtpChallenge) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.challenges.insert(challenge.challenge_id, challenge);
        }
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), CoreError> {
        self.lock()?.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, CoreError> {
        Ok(self.lock()?.tenants.get(&tenant_id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), CoreError> {
        self.lock()?.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn find_user_for_login(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, CoreError> {
        let inner = self.lock()?;
        Ok(inner
            .users
            .values()
            .find(|u| u.tenant_id == tenant_id && u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, CoreError> {
        let inner = self.lock()?;
        Ok(inner
            .users
            .values()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_user(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
    ) -> Result<Option<User>, CoreError> {
        let inner = self.lock()?;
        match inner.users.get(&user_id) {
            None => Ok(None),
            Some(user) => {
                ctx.ensure_tenant(user.tenant_id)?;
                Ok(Some(user.clone()))
            }
        }
    }

    async fn update_password_hash(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        if let Some(user) = inner.users.get_mut(&user_id) {
            ctx.ensure_tenant(user.tenant_id)?;
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn set_totp_enabled(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        enabled: bool,
    ) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        if let Some(user) = inner.users.get_mut(&user_id) {
            ctx.ensure_tenant(user.tenant_id)?;
            user.totp_enabled = enabled;
        }
        Ok(())
    }

    async fn insert_session(&self, session: &RefreshSession) -> Result<(), CoreError> {
        self.lock()?.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<(RefreshSession, HashMatch)>, CoreError> {
        let inner = self.lock()?;
        for session in inner.sessions.values() {
            if session.current_hash == token_hash {
                return Ok(Some((session.clone(), HashMatch::Current)));
            }
        }
        for session in inner.sessions.values() {
            if session.previous_hash.as_deref() == Some(token_hash) {
                return Ok(Some((session.clone(), HashMatch::Previous)));
            }
        }
        Ok(None)
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut inner = self.lock()?;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        if session.revoked_utc.is_some() || session.current_hash != expected_hash {
            return Ok(false);
        }
        session.previous_hash = Some(session.current_hash.clone());
        session.current_hash = new_hash.to_string();
        session.rotation_count += 1;
        session.expiry_utc = new_expiry;
        Ok(true)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            if session.revoked_utc.is_none() {
                session.revoked_utc = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<u64, CoreError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let mut revoked = 0;
        for session in inner.sessions.values_mut() {
            if session.user_id == user_id && session.revoked_utc.is_none() {
                session.revoked_utc = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn active_sessions_for_user(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
    ) -> Result<Vec<RefreshSession>, CoreError> {
        let inner = self.lock()?;
        let mut sessions: Vec<RefreshSession> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.tenant_id == ctx.tenant_id && s.is_live())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(sessions)
    }

    async fn load_lockout(&self, user_id: Uuid) -> Result<Option<LockoutState>, CoreError> {
        Ok(self.lock()?.lockouts.get(&user_id).cloned())
    }

    async fn upsert_lockout(&self, state: &LockoutState) -> Result<(), CoreError> {
        self.lock()?.lockouts.insert(state.user_id, state.clone());
        Ok(())
    }

    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), CoreError> {
        self.lock()?.lockouts.remove(&user_id);
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), CoreError> {
        self.lock()?.roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, CoreError> {
        Ok(self.lock()?.roles.get(&role_id).cloned())
    }

    async fn load_roles(&self, ctx: &TenantContext) -> Result<Vec<Role>, CoreError> {
        let inner = self.lock()?;
        Ok(inner
            .roles
            .values()
            .filter(|r| r.tenant_id.is_none() || r.tenant_id == Some(ctx.tenant_id))
            .cloned()
            .collect())
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), CoreError> {
        self.lock()?.permissions.insert(permission.perm_id, permission.clone());
        Ok(())
    }

    async fn load_permission_catalogue(&self) -> Result<Vec<Permission>, CoreError> {
        Ok(self.lock()?.permissions.values().cloned().collect())
    }

    async fn grant_role_permissions(
        &self,
        role_id: Uuid,
        perm_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        for perm_id in perm_ids {
            if !inner.role_permissions.contains(&(role_id, *perm_id)) {
                inner.role_permissions.push((role_id, *perm_id));
            }
        }
        Ok(())
    }

    async fn load_role_permission_keys(
        &self,
        role_ids: &[Uuid],
    ) -> Result<Vec<String>, CoreError> {
        let inner = self.lock()?;
        let mut keys = Vec::new();
        for (role_id, perm_id) in &inner.role_permissions {
            if role_ids.contains(role_id) {
                if let Some(perm) = inner.permissions.get(perm_id) {
                    if !keys.contains(&perm.perm_key) {
                        keys.push(perm.perm_key.clone());
                    }
                }
            }
        }
        Ok(keys)
    }

    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<(), CoreError> {
        self.lock()?
            .assignments
            .insert(assignment.assignment_id, assignment.clone());
        Ok(())
    }

    async fn find_active_assignments(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<RoleAssignment>, CoreError> {
        let inner = self.lock()?;
        Ok(inner
            .assignments
            .values()
            .filter(|a| {
                a.tenant_id == ctx.tenant_id
                    && a.user_id == user_id
                    && a.is_active()
                    && a.applies_to_branch(branch_id)
            })
            .cloned()
            .collect())
    }

    async fn end_assignment(
        &self,
        ctx: &TenantContext,
        assignment_id: Uuid,
    ) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        if let Some(assignment) = inner.assignments.get_mut(&assignment_id) {
            ctx.ensure_tenant(assignment.tenant_id)?;
            let now = Utc::now();
            // Clamp open windows and windows still in the future; an
            // already-ended assignment keeps its original end.
            if assignment.valid_until.is_none_or(|until| until > now) {
                assignment.valid_until = Some(now);
            }
        }
        Ok(())
    }

    async fn upsert_totp_secret(&self, secret: &TotpSecret) -> Result<(), CoreError> {
        self.lock()?.totp_secrets.insert(secret.user_id, secret.clone());
        Ok(())
    }

    async fn find_totp_secret(&self, user_id: Uuid) -> Result<Option<TotpSecret>, CoreError> {
        Ok(self.lock()?.totp_secrets.get(&user_id).cloned())
    }

    async fn confirm_totp_secret(&self, user_id: Uuid) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        if let Some(secret) = inner.totp_secrets.get_mut(&user_id) {
            if secret.confirmed_utc.is_none() {
                secret.confirmed_utc = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), CoreError> {
        let mut inner = self.lock()?;
        inner.backup_codes.retain(|_, c| c.user_id != user_id);
        for code in codes {
            inner.backup_codes.insert(code.code_id, code.clone());
        }
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, CoreError> {
        let mut inner = self.lock()?;
        for code in inner.backup_codes.values_mut() {
            if code.user_id == user_id
                && code.consumed_utc.is_none()
                && constant_time_eq(&code.code_hash, code_hash)
            {
                code.consumed_utc = Some(Utc::now());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn insert_challenge(&self, challenge: &OtpChallenge) -> Result<(), CoreError> {
        self.lock()?
            .challenges
            .insert(challenge.challenge_id, challenge.clone());
        Ok(())
    }

    async fn find_open_challenge(&self, phone: &str) -> Result<Option<OtpChallenge>, CoreError> {
        let inner = self.lock()?;
        Ok(inner
            .challenges
            .values()
            .filter(|c| c.phone == phone && c.consumed_utc.is_none())
            .max_by_key(|c| c.issued_utc)
            .cloned())
    }

    async fn increment_challenge_attempts(&self, challenge_id: Uuid) -> Result<i32, CoreError> {
        let mut inner = self.lock()?;
        match inner.challenges.get_mut(&challenge_id) {
            Some(challenge) => {
                challenge.attempt_count += 1;
                Ok(challenge.attempt_count)
            }
            None => Ok(0),
        }
    }

    async fn consume_challenge(
        &self,
        challenge_id: Uuid,
        expected_hash: &str,
    ) -> Result<bool, CoreError> {
        let mut inner = self.lock()?;
        let Some(challenge) = inner.challenges.get_mut(&challenge_id) else {
            return Ok(false);
        };
        if challenge.consumed_utc.is_some()
            || !constant_time_eq(&challenge.code_hash, expected_hash)
        {
            return Ok(false);
        }
        challenge.consumed_utc = Some(Utc::now());
        Ok(true)
    }

    async fn delete_challenge(&self, challenge_id: Uuid) -> Result<(), CoreError> {
        self.lock()?.challenges.remove(&challenge_id);
        Ok(())
    }
}
