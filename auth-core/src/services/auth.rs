use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{CoreConfig, LockoutConfig, OtpConfig};
use crate::models::{SessionInfo, User};
use crate::services::credentials::ProvisioningData;
use crate::services::jwt::{AccessClaims, TokenIssuer, TokenPair};
use crate::services::{
    CoreError, CredentialService, LockoutTracker, OtpDelivery, RbacResolver, SecurityNotifier,
    SessionService,
};
use crate::store::AuthStore;
use crate::tenant::TenantContext;
use crate::utils::{hash_password, verify_password};

/// What a password login produced: either a full token pair, or an
/// intermediate token because a second factor is still owed.
#[derive(Debug)]
pub enum LoginOutcome {
    Complete(TokenPair),
    TwoFactorRequired { two_factor_token: String },
}

/// Knobs the facade needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct AuthServiceOptions {
    pub lockout: LockoutConfig,
    pub otp: OtpConfig,
    pub totp_issuer: String,
    pub refresh_token_expiry_days: i64,
    pub operation_timeout_seconds: u64,
}

impl AuthServiceOptions {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            lockout: config.lockout.clone(),
            otp: config.otp.clone(),
            totp_issuer: config.totp_issuer.clone(),
            refresh_token_expiry_days: config.token.refresh_token_expiry_days,
            operation_timeout_seconds: config.operation_timeout_seconds,
        }
    }
}

/// The authorization core facade: login, 2FA, refresh rotation, RBAC
/// checks and credential management behind one surface.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    issuer: TokenIssuer,
    sessions: SessionService,
    lockout: LockoutTracker,
    rbac: RbacResolver,
    credentials: CredentialService,
    operation_timeout: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        issuer: TokenIssuer,
        notifier: Arc<dyn SecurityNotifier>,
        delivery: Arc<dyn OtpDelivery>,
        options: AuthServiceOptions,
    ) -> Self {
        let sessions = SessionService::new(
            store.clone(),
            notifier.clone(),
            options.refresh_token_expiry_days,
        );
        let lockout = LockoutTracker::new(store.clone(), notifier.clone(), options.lockout);
        let rbac = RbacResolver::new(store.clone());
        let credentials = CredentialService::new(
            store.clone(),
            notifier,
            delivery,
            options.otp,
            options.totp_issuer,
        );
        Self {
            store,
            issuer,
            sessions,
            lockout,
            rbac,
            credentials,
            operation_timeout: Duration::from_secs(options.operation_timeout_seconds),
        }
    }

    /// Password login. Lockout is checked before the password and failures
    /// are counted after it; the caller learns only `InvalidCredentials`
    /// whether the tenant, the user or the password was the problem.
    pub async fn login(
        &self,
        tenant_id: Uuid,
        email: &str,
        password: &str,
        client_fingerprint: &str,
    ) -> Result<LoginOutcome, CoreError> {
        tokio::time::timeout(
            self.operation_timeout,
            self.login_inner(tenant_id, email, password, client_fingerprint),
        )
        .await
        .map_err(|_| CoreError::ServiceUnavailable)?
    }

    async fn login_inner(
        &self,
        tenant_id: Uuid,
        email: &str,
        password: &str,
        client_fingerprint: &str,
    ) -> Result<LoginOutcome, CoreError> {
        let tenant = self
            .store
            .find_tenant(tenant_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !tenant.accepts_logins() {
            tracing::info!(
                tenant_id = %tenant_id,
                state = tenant.tenant_state_code,
                "login refused, tenant does not accept logins"
            );
            return Err(CoreError::InvalidCredentials);
        }

        let user = self
            .store
            .find_user_for_login(tenant_id, email)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !user.is_active() {
            return Err(CoreError::InvalidCredentials);
        }

        self.lockout.check(user.user_id).await?;

        if !verify_password(password, &user.password_hash) {
            self.lockout.record_failure(tenant_id, user.user_id).await?;
            return Err(CoreError::InvalidCredentials);
        }
        self.lockout.record_success(user.user_id).await?;

        if user.totp_enabled {
            let two_factor_token = self.issuer.issue_two_factor_token(&user)?;
            return Ok(LoginOutcome::TwoFactorRequired { two_factor_token });
        }

        let pair = self.complete_login(&user, client_fingerprint).await?;
        Ok(LoginOutcome::Complete(pair))
    }

    /// Exchange an intermediate 2FA token plus a second-factor value for a
    /// full token pair. Wrong codes do not feed the password lockout; the
    /// intermediate token itself expires within minutes.
    pub async fn verify_two_factor(
        &self,
        two_factor_token: &str,
        code: &str,
        client_fingerprint: &str,
    ) -> Result<TokenPair, CoreError> {
        tokio::time::timeout(
            self.operation_timeout,
            self.verify_two_factor_inner(two_factor_token, code, client_fingerprint),
        )
        .await
        .map_err(|_| CoreError::ServiceUnavailable)?
    }

    async fn verify_two_factor_inner(
        &self,
        two_factor_token: &str,
        code: &str,
        client_fingerprint: &str,
    ) -> Result<TokenPair, CoreError> {
        let claims = self.issuer.verify_two_factor_token(two_factor_token)?;
        let tenant_id = Uuid::parse_str(&claims.tid).map_err(|_| CoreError::TokenInvalidSignature)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| CoreError::TokenInvalidSignature)?;

        let ctx = TenantContext::new(tenant_id, user_id, None);
        let user = self
            .store
            .find_user(&ctx, user_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !user.is_active() {
            return Err(CoreError::InvalidCredentials);
        }

        if !self.credentials.verify_second_factor(&user, code).await? {
            return Err(CoreError::InvalidCredentials);
        }

        self.complete_login(&user, client_fingerprint).await
    }

    async fn complete_login(
        &self,
        user: &User,
        client_fingerprint: &str,
    ) -> Result<TokenPair, CoreError> {
        let ctx = TenantContext::new(user.tenant_id, user.user_id, None);
        let roles = self.rbac.role_labels(&ctx).await?;
        let (_, refresh_token) = self.sessions.open_session(&ctx, client_fingerprint).await?;
        tracing::info!(user_id = %user.user_id, tenant_id = %user.tenant_id, "login completed");
        self.issuer.issue_pair(user, &ctx, roles, refresh_token)
    }

    /// Rotate a refresh token into a fresh token pair. Replays revoke the
    /// user's sessions; see [`SessionService::rotate`].
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, CoreError> {
        tokio::time::timeout(self.operation_timeout, self.refresh_inner(refresh_token))
            .await
            .map_err(|_| CoreError::ServiceUnavailable)?
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenPair, CoreError> {
        let (session, new_token) = self.sessions.rotate(refresh_token).await?;

        let ctx = TenantContext::new(session.tenant_id, session.user_id, session.branch_id);
        let user = self
            .store
            .find_user(&ctx, session.user_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !user.is_active() {
            self.sessions.revoke_all(user.user_id).await?;
            return Err(CoreError::InvalidCredentials);
        }
        let tenant = self
            .store
            .find_tenant(session.tenant_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !tenant.accepts_logins() {
            return Err(CoreError::InvalidCredentials);
        }

        let roles = self.rbac.role_labels(&ctx).await?;
        self.issuer.issue_pair(&user, &ctx, roles, new_token)
    }

    /// Revoke the session behind a refresh token. Idempotent.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), CoreError> {
        self.sessions.logout(refresh_token).await
    }

    /// Verify an access token and return its claims.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, CoreError> {
        self.issuer.verify_access_token(token)
    }

    /// Permission check; false on any doubt.
    pub async fn authorize(&self, ctx: &TenantContext, perm_key: &str) -> bool {
        self.rbac.authorize(ctx, perm_key).await
    }

    /// Change a password after re-proving the current one. Every live
    /// session of the user is revoked.
    pub async fn change_password(
        &self,
        ctx: &TenantContext,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), CoreError> {
        let user = self
            .store
            .find_user(ctx, ctx.user_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !verify_password(current_password, &user.password_hash) {
            return Err(CoreError::InvalidCredentials);
        }
        let new_hash = hash_password(new_password)?;
        self.store
            .update_password_hash(ctx, ctx.user_id, &new_hash)
            .await?;
        let revoked = self.sessions.revoke_all(ctx.user_id).await?;
        tracing::info!(user_id = %ctx.user_id, revoked, "password changed");
        Ok(())
    }

    /// Begin TOTP enrollment for the calling user.
    pub async fn enable_two_factor(
        &self,
        ctx: &TenantContext,
    ) -> Result<ProvisioningData, CoreError> {
        let user = self
            .store
            .find_user(ctx, ctx.user_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        self.credentials.begin_totp_enrollment(ctx, &user).await
    }

    /// Confirm TOTP enrollment; returns the plaintext backup codes.
    pub async fn confirm_two_factor(
        &self,
        ctx: &TenantContext,
        code: &str,
    ) -> Result<Vec<String>, CoreError> {
        let user = self
            .store
            .find_user(ctx, ctx.user_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        self.credentials.confirm_totp_enrollment(ctx, &user, code).await
    }

    /// Issue a phone OTP for a known phone number. Unknown numbers are
    /// rejected; phone login never creates accounts.
    pub async fn request_phone_otp(&self, phone: &str) -> Result<(), CoreError> {
        self.store
            .find_user_by_phone(phone)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        self.credentials.request_phone_challenge(phone).await
    }

    /// Answer a phone OTP challenge and log the user in.
    pub async fn verify_phone_otp(
        &self,
        phone: &str,
        code: &str,
        client_fingerprint: &str,
    ) -> Result<TokenPair, CoreError> {
        tokio::time::timeout(
            self.operation_timeout,
            self.verify_phone_otp_inner(phone, code, client_fingerprint),
        )
        .await
        .map_err(|_| CoreError::ServiceUnavailable)?
    }

    async fn verify_phone_otp_inner(
        &self,
        phone: &str,
        code: &str,
        client_fingerprint: &str,
    ) -> Result<TokenPair, CoreError> {
        let user = self
            .store
            .find_user_by_phone(phone)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !user.is_active() {
            return Err(CoreError::InvalidCredentials);
        }
        let tenant = self
            .store
            .find_tenant(user.tenant_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        if !tenant.accepts_logins() {
            return Err(CoreError::InvalidCredentials);
        }

        self.credentials.verify_phone_challenge(phone, code).await?;
        self.complete_login(&user, client_fingerprint).await
    }

    /// Live sessions of the calling user, for device management.
    pub async fn active_sessions(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<SessionInfo>, CoreError> {
        self.sessions.active_sessions(ctx, ctx.user_id).await
    }

    /// Role and permission administration.
    pub fn rbac(&self) -> &RbacResolver {
        &self.rbac
    }

    /// Session management beyond the calling user (admin revocation).
    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }
}
