//! PostgreSQL store implementation.
//!
//! All compare-and-swap operations are single-row conditional UPDATEs; the
//! database is the linearization point, so no in-process locks are needed
//! even with multiple service instances.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{
    BackupCode, LockoutState, OtpChallenge, Permission, RefreshSession, Role, RoleAssignment,
    Tenant, TotpSecret, User,
};
use crate::services::CoreError;
use crate::store::{AuthStore, HashMatch};
use crate::tenant::TenantContext;

/// PostgreSQL-backed `AuthStore`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a tenant-scoped unit of work for collaborators (business
    /// modules) issuing their own queries.
    ///
    /// Sets the transaction-local `app.tenant_id` consumed by the
    /// row-level-security policies, so every query inside the scope is
    /// filtered to the tenant. Dropping the scope without committing rolls
    /// the transaction back, which also clears the setting, even on panic.
    pub async fn begin_scope(&self, ctx: &TenantContext) -> Result<TenantScope, CoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
            .bind(ctx.tenant_id.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(TenantScope { tx })
    }
}

/// A tenant-scoped transaction; see [`PgStore::begin_scope`].
pub struct TenantScope {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

impl TenantScope {
    /// Executor for queries inside the scope.
    pub fn executor(&mut self) -> &mut sqlx::PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), CoreError> {
        self.tx.commit().await.map_err(CoreError::from)
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, tenant_slug, tenant_label, tenant_state_code, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_slug)
        .bind(&tenant.tenant_label)
        .bind(&tenant.tenant_state_code)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, CoreError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)
    }

    async fn insert_user(&self, user: &User) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, tenant_id, email, phone, password_hash, user_state_code, totp_enabled, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.user_id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(&user.user_state_code)
        .bind(user.totp_enabled)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user_for_login(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, CoreError> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, CoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)
    }

    async fn find_user(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
    ) -> Result<Option<User>, CoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match user {
            None => Ok(None),
            Some(user) => {
                ctx.ensure_tenant(user.tenant_id)?;
                Ok(Some(user))
            }
        }
    }

    async fn update_password_hash(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2 AND tenant_id = $3")
            .bind(password_hash)
            .bind(user_id)
            .bind(ctx.tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_totp_enabled(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        enabled: bool,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE users SET totp_enabled = $1 WHERE user_id = $2 AND tenant_id = $3")
            .bind(enabled)
            .bind(user_id)
            .bind(ctx.tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_session(&self, session: &RefreshSession) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions
                (session_id, tenant_id, user_id, branch_id, client_fingerprint, current_hash,
                 previous_hash, rotation_count, revoked_utc, expiry_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.session_id)
        .bind(session.tenant_id)
        .bind(session.user_id)
        .bind(session.branch_id)
        .bind(&session.client_fingerprint)
        .bind(&session.current_hash)
        .bind(&session.previous_hash)
        .bind(session.rotation_count)
        .bind(session.revoked_utc)
        .bind(session.expiry_utc)
        .bind(session.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<(RefreshSession, HashMatch)>, CoreError> {
        let session = sqlx::query_as::<_, RefreshSession>(
            "SELECT * FROM refresh_sessions WHERE current_hash = $1 OR previous_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session.map(|s| {
            let matched = if s.current_hash == token_hash {
                HashMatch::Current
            } else {
                HashMatch::Previous
            };
            (s, matched)
        }))
    }

    async fn rotate_session(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        // The WHERE clause is the compare-and-swap; exactly one of any
        // concurrent rotations can match the current hash.
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET previous_hash = current_hash,
                current_hash = $1,
                rotation_count = rotation_count + 1,
                expiry_utc = $2
            WHERE session_id = $3 AND current_hash = $4 AND revoked_utc IS NULL
            "#,
        )
        .bind(new_hash)
        .bind(new_expiry)
        .bind(session_id)
        .bind(expected_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_session(&self, session_id: Uuid) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE refresh_sessions SET revoked_utc = NOW() WHERE session_id = $1 AND revoked_utc IS NULL",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_utc = NOW() WHERE user_id = $1 AND revoked_utc IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn active_sessions_for_user(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
    ) -> Result<Vec<RefreshSession>, CoreError> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT * FROM refresh_sessions
            WHERE user_id = $1 AND tenant_id = $2 AND revoked_utc IS NULL AND expiry_utc > NOW()
            ORDER BY created_utc DESC
            "#,
        )
        .bind(user_id)
        .bind(ctx.tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)
    }

    async fn load_lockout(&self, user_id: Uuid) -> Result<Option<LockoutState>, CoreError> {
        sqlx::query_as::<_, LockoutState>("SELECT * FROM lockout_states WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)
    }

    async fn upsert_lockout(&self, state: &LockoutState) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO lockout_states (user_id, failure_count, window_start_utc, locked_until_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET failure_count = EXCLUDED.failure_count,
                window_start_utc = EXCLUDED.window_start_utc,
                locked_until_utc = EXCLUDED.locked_until_utc
            "#,
        )
        .bind(state.user_id)
        .bind(state.failure_count)
        .bind(state.window_start_utc)
        .bind(state.locked_until_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM lockout_states WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, tenant_id, role_label, parent_role_id, is_system, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(role.role_id)
        .bind(role.tenant_id)
        .bind(&role.role_label)
        .bind(role.parent_role_id)
        .bind(role.is_system)
        .bind(role.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_role(&self, role_id: Uuid) -> Result<Option<Role>, CoreError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)
    }

    async fn load_roles(&self, ctx: &TenantContext) -> Result<Vec<Role>, CoreError> {
        sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 OR tenant_id IS NULL",
        )
        .bind(ctx.tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)
    }

    async fn insert_permission(&self, permission: &Permission) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO permissions (perm_id, perm_key) VALUES ($1, $2)")
            .bind(permission.perm_id)
            .bind(&permission.perm_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_permission_catalogue(&self) -> Result<Vec<Permission>, CoreError> {
        sqlx::query_as::<_, Permission>("SELECT * FROM permissions ORDER BY perm_key")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)
    }

    async fn grant_role_permissions(
        &self,
        role_id: Uuid,
        perm_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, perm_id)
            SELECT $1, perm_id FROM UNNEST($2::uuid[]) AS t(perm_id)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(perm_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_role_permission_keys(
        &self,
        role_ids: &[Uuid],
    ) -> Result<Vec<String>, CoreError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.perm_key
            FROM role_permissions rp
            JOIN permissions p ON p.perm_id = rp.perm_id
            WHERE rp.role_id = ANY($1)
            "#,
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)
    }

    async fn insert_assignment(&self, assignment: &RoleAssignment) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO role_assignments
                (assignment_id, tenant_id, user_id, role_id, branch_id, valid_from, valid_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(assignment.assignment_id)
        .bind(assignment.tenant_id)
        .bind(assignment.user_id)
        .bind(assignment.role_id)
        .bind(assignment.branch_id)
        .bind(assignment.valid_from)
        .bind(assignment.valid_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_assignments(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<RoleAssignment>, CoreError> {
        sqlx::query_as::<_, RoleAssignment>(
            r#"
            SELECT * FROM role_assignments
            WHERE tenant_id = $1
              AND user_id = $2
              AND (branch_id IS NULL OR branch_id = $3)
              AND valid_from <= NOW()
              AND (valid_until IS NULL OR valid_until > NOW())
            "#,
        )
        .bind(ctx.tenant_id)
        .bind(user_id)
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::from)
    }

    async fn end_assignment(
        &self,
        ctx: &TenantContext,
        assignment_id: Uuid,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE role_assignments SET valid_until = NOW()
            WHERE assignment_id = $1 AND tenant_id = $2
              AND (valid_until IS NULL OR valid_until > NOW())
            "#,
        )
        .bind(assignment_id)
        .bind(ctx.tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_totp_secret(&self, secret: &TotpSecret) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO totp_secrets (user_id, secret_base32, confirmed_utc, created_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET secret_base32 = EXCLUDED.secret_base32,
                confirmed_utc = EXCLUDED.confirmed_utc,
                created_utc = EXCLUDED.created_utc
            "#,
        )
        .bind(secret.user_id)
        .bind(&secret.secret_base32)
        .bind(secret.confirmed_utc)
        .bind(secret.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_totp_secret(&self, user_id: Uuid) -> Result<Option<TotpSecret>, CoreError> {
        sqlx::query_as::<_, TotpSecret>("SELECT * FROM totp_secrets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::from)
    }

    async fn confirm_totp_secret(&self, user_id: Uuid) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE totp_secrets SET confirmed_utc = NOW() WHERE user_id = $1 AND confirmed_utc IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for code in codes {
            sqlx::query(
                "INSERT INTO backup_codes (code_id, user_id, code_hash, consumed_utc) VALUES ($1, $2, $3, $4)",
            )
            .bind(code.code_id)
            .bind(code.user_id)
            .bind(&code.code_hash)
            .bind(code.consumed_utc)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, CoreError> {
        // Conditional update; two concurrent uses of one code cannot both
        // match the unconsumed row.
        let result = sqlx::query(
            r#"
            UPDATE backup_codes SET consumed_utc = NOW()
            WHERE code_id = (
                SELECT code_id FROM backup_codes
                WHERE user_id = $1 AND code_hash = $2 AND consumed_utc IS NULL
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_challenge(&self, challenge: &OtpChallenge) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO otp_challenges
                (challenge_id, phone, code_hash, attempt_count, expiry_utc, issued_utc, consumed_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(&challenge.phone)
        .bind(&challenge.code_hash)
        .bind(challenge.attempt_count)
        .bind(challenge.expiry_utc)
        .bind(challenge.issued_utc)
        .bind(challenge.consumed_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_open_challenge(&self, phone: &str) -> Result<Option<OtpChallenge>, CoreError> {
        sqlx::query_as::<_, OtpChallenge>(
            r#"
            SELECT * FROM otp_challenges
            WHERE phone = $1 AND consumed_utc IS NULL
            ORDER BY issued_utc DESC
            LIMIT 1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)
    }

    async fn increment_challenge_attempts(&self, challenge_id: Uuid) -> Result<i32, CoreError> {
        let count = sqlx::query_scalar::<_, i32>(
            "UPDATE otp_challenges SET attempt_count = attempt_count + 1 WHERE challenge_id = $1 RETURNING attempt_count",
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    async fn consume_challenge(
        &self,
        challenge_id: Uuid,
        expected_hash: &str,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE otp_challenges SET consumed_utc = NOW()
            WHERE challenge_id = $1 AND code_hash = $2 AND consumed_utc IS NULL
            "#,
        )
        .bind(challenge_id)
        .bind(expected_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_challenge(&self, challenge_id: Uuid) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM otp_challenges WHERE challenge_id = $1")
            .bind(challenge_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{create_pool, run_migrations};

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn scoped_queries_only_see_their_tenant() {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/auth_core_test".to_string()),
            max_connections: 5,
            min_connections: 1,
        };
        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = PgStore::new(pool);

        // Unique slugs and emails so reruns against the same database pass.
        let suffix = Uuid::new_v4().simple().to_string();
        let north = Tenant::new(format!("north-{suffix}"), "North Hill".to_string());
        let south = Tenant::new(format!("south-{suffix}"), "South Gate".to_string());
        store.insert_tenant(&north).await.unwrap();
        store.insert_tenant(&south).await.unwrap();

        let user_north = User::new(
            north.tenant_id,
            format!("north-{suffix}@example.test"),
            "x".to_string(),
        );
        let user_south = User::new(
            south.tenant_id,
            format!("south-{suffix}@example.test"),
            "x".to_string(),
        );
        store.insert_user(&user_north).await.unwrap();
        store.insert_user(&user_south).await.unwrap();

        let ctx = TenantContext::new(north.tenant_id, user_north.user_id, None);
        let mut scope = store.begin_scope(&ctx).await.unwrap();
        let visible: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM users WHERE email IN ($1, $2)")
                .bind(&user_north.email)
                .bind(&user_south.email)
                .fetch_all(scope.executor())
                .await
                .unwrap();
        assert_eq!(visible, vec![user_north.user_id]);
        scope.commit().await.unwrap();

        // Without a scope the same query sees both tenants' rows.
        let unscoped: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM users WHERE email IN ($1, $2)")
                .bind(&user_north.email)
                .bind(&user_south.email)
                .fetch_all(store.pool())
                .await
                .unwrap();
        assert_eq!(unscoped.len(), 2);
    }
}
