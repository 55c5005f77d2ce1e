//! Storage seam for the authorization core.
//!
//! The trait mirrors the operations the core needs from the shared store.
//! All mutations are single-row conditional updates; the compare-and-swap
//! operations (`rotate_session`, `consume_backup_code`,
//! `consume_challenge`) are the linearization points for their flows and
//! must be atomic in every implementation, since multiple service
//! instances may run concurrently.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, TenantScope};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BackupCode, LockoutState, OtpChallenge, Permission, RefreshSession, Role, RoleAssignment,
    Tenant, TotpSecret, User,
};
use crate::services::CoreError;
use crate::tenant::TenantContext;

/// Which stored hash a presented refresh token matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMatch {
    /// The live hash; normal rotation may proceed.
    Current,
    /// An already-superseded hash; reuse detected.
    Previous,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    // ==================== Tenants & users ====================

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), CoreError>;
    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, CoreError>;

    async fn insert_user(&self, user: &User) -> Result<(), CoreError>;
    /// Login-boundary lookup; the tenant is explicit because no context
    /// exists before authentication.
    async fn find_user_for_login(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, CoreError>;
    /// Phone numbers are globally unique; OTP login resolves the tenant
    /// from the user row.
    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, CoreError>;
    async fn find_user(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
    ) -> Result<Option<User>, CoreError>;
    async fn update_password_hash(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), CoreError>;
    async fn set_totp_enabled(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        enabled: bool,
    ) -> Result<(), CoreError>;

    // ==================== Refresh sessions ====================

    async fn insert_session(&self, session: &RefreshSession) -> Result<(), CoreError>;
    /// Locate a session by a presented token hash, current or previous.
    /// Revoked and expired sessions are returned too; the caller decides.
    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<(RefreshSession, HashMatch)>, CoreError>;
    /// Atomic rotation: replace `current_hash` with `new_hash` iff it still
    /// equals `expected_hash` and the session is unrevoked. Returns whether
    /// this caller won the swap.
    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, CoreError>;
    /// Idempotent single-session revocation.
    async fn revoke_session(&self, session_id: Uuid) -> Result<(), CoreError>;
    /// Bulk conditional revocation of every live session of a user
    /// (logout-all, password change, stolen-token containment).
    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<u64, CoreError>;
    async fn active_sessions_for_user(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
    ) -> Result<Vec<RefreshSession>, CoreError>;

    // ==================== Lockout ====================

    async fn load_lockout(&self, user_id: Uuid) -> Result<Option<LockoutState>, CoreError>;
    async fn upsert_lockout(&self, state: &LockoutState) -> Result<(), CoreError>;
    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), CoreError>;

    // ==================== Roles & permissions ====================

    async fn insert_role(&self, role: &Role) -> Result<(), CoreError>;
    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, CoreError>;
    /// All roles visible to the tenant: its own plus global system roles.
    async fn load_roles(&self, ctx: &TenantContext) -> Result<Vec<Role>, CoreError>;
    async fn insert_permission(&self, permission: &Permission) -> Result<(), CoreError>;
    async fn load_permission_catalogue(&self) -> Result<Vec<Permission>, CoreError>;
    async fn grant_role_permissions(
        &self,
        role_id: Uuid,
        perm_ids: &[Uuid],
    ) -> Result<(), CoreError>;
    /// Distinct permission keys granted to any of `role_ids`.
    async fn load_role_permission_keys(
        &self,
        role_ids: &[Uuid],
    ) -> Result<Vec<String>, CoreError>;

    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<(), CoreError>;
    /// Active (window contains now) assignments applicable to the branch:
    /// tenant-wide rows plus rows scoped to exactly `branch_id`.
    async fn find_active_assignments(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<RoleAssignment>, CoreError>;
    /// End an assignment now (explicit revocation).
    async fn end_assignment(
        &self,
        ctx: &TenantContext,
        assignment_id: Uuid,
    ) -> Result<(), CoreError>;

    // ==================== Two-factor material ====================

    async fn upsert_totp_secret(&self, secret: &TotpSecret) -> Result<(), CoreError>;
    async fn find_totp_secret(&self, user_id: Uuid) -> Result<Option<TotpSecret>, CoreError>;
    async fn confirm_totp_secret(&self, user_id: Uuid) -> Result<(), CoreError>;
    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), CoreError>;
    /// Atomically consume an unconsumed backup code matching `code_hash`.
    /// Returns whether a code was consumed; two concurrent uses of the same
    /// code cannot both return true.
    async fn consume_backup_code(&self, user_id: Uuid, code_hash: &str)
        -> Result<bool, CoreError>;

    // ==================== Phone OTP challenges ====================

    async fn insert_challenge(&self, challenge: &OtpChallenge) -> Result<(), CoreError>;
    /// The latest unconsumed challenge for a phone number, if any.
    async fn find_open_challenge(&self, phone: &str) -> Result<Option<OtpChallenge>, CoreError>;
    /// Increment the attempt counter, returning the new count.
    async fn increment_challenge_attempts(&self, challenge_id: Uuid) -> Result<i32, CoreError>;
    /// Atomically consume the challenge iff its hash still matches and it
    /// is unconsumed. Returns whether this caller consumed it.
    async fn consume_challenge(
        &self,
        challenge_id: Uuid,
        expected_hash: &str,
    ) -> Result<bool, CoreError>;
    async fn delete_challenge(&self, challenge_id: Uuid) -> Result<(), CoreError>;
}
