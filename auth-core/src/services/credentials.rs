use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::config::OtpConfig;
use crate::models::{BackupCode, OtpChallenge, TotpSecret, User};
use crate::services::{CoreError, OtpDelivery, SecurityEvent, SecurityNotifier};
use crate::store::AuthStore;
use crate::tenant::TenantContext;
use crate::utils::{random_numeric_code, random_token_hex};

const BACKUP_CODE_COUNT: usize = 10;

/// Everything handed to the user when TOTP enrollment begins. The secret
/// is not yet active; it becomes active once a valid code confirms it.
#[derive(Debug)]
pub struct ProvisioningData {
    pub secret_base32: String,
    pub otpauth_url: String,
}

/// Second-factor credentials: TOTP secrets, backup codes and phone OTP
/// challenges.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn AuthStore>,
    notifier: Arc<dyn SecurityNotifier>,
    delivery: Arc<dyn OtpDelivery>,
    otp: OtpConfig,
    totp_issuer: String,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        notifier: Arc<dyn SecurityNotifier>,
        delivery: Arc<dyn OtpDelivery>,
        otp: OtpConfig,
        totp_issuer: String,
    ) -> Self {
        Self {
            store,
            notifier,
            delivery,
            otp,
            totp_issuer,
        }
    }

    fn build_totp(&self, secret_base32: &str, account: &str) -> Result<TOTP, CoreError> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("stored TOTP secret is not valid base32: {:?}", e))?;
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.totp_issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow::anyhow!("failed to build TOTP: {}", e).into())
    }

    /// Begin TOTP enrollment: mint a secret, store it unconfirmed, return
    /// the provisioning material for the authenticator app.
    pub async fn begin_totp_enrollment(
        &self,
        ctx: &TenantContext,
        user: &User,
    ) -> Result<ProvisioningData, CoreError> {
        ctx.ensure_tenant(user.tenant_id)?;

        let secret_base32 = Secret::generate_secret().to_encoded().to_string();
        let totp = self.build_totp(&secret_base32, &user.email)?;

        let record = TotpSecret::new(user.user_id, secret_base32.clone());
        self.store.upsert_totp_secret(&record).await?;

        Ok(ProvisioningData {
            otpauth_url: totp.get_url(),
            secret_base32,
        })
    }

    /// Confirm enrollment with a live code. On success the secret becomes
    /// active, 2FA is switched on and a fresh set of backup codes is
    /// returned in plaintext, the only time they are visible.
    pub async fn confirm_totp_enrollment(
        &self,
        ctx: &TenantContext,
        user: &User,
        code: &str,
    ) -> Result<Vec<String>, CoreError> {
        ctx.ensure_tenant(user.tenant_id)?;

        let secret = self
            .store
            .find_totp_secret(user.user_id)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;
        let totp = self.build_totp(&secret.secret_base32, &user.email)?;
        let valid = totp
            .check_current(code)
            .map_err(|e| anyhow::anyhow!("system clock error: {}", e))?;
        if !valid {
            return Err(CoreError::InvalidCredentials);
        }

        self.store.confirm_totp_secret(user.user_id).await?;
        self.store.set_totp_enabled(ctx, user.user_id, true).await?;

        let plaintexts: Vec<String> = (0..BACKUP_CODE_COUNT)
            .map(|_| random_token_hex(4))
            .collect();
        let records: Vec<BackupCode> = plaintexts
            .iter()
            .map(|code| BackupCode::new(user.user_id, BackupCode::hash_code(code)))
            .collect();
        self.store
            .replace_backup_codes(user.user_id, &records)
            .await?;

        tracing::info!(user_id = %user.user_id, "TOTP enrollment confirmed");
        self.notifier
            .notify(SecurityEvent::TwoFactorEnabled {
                tenant_id: user.tenant_id,
                user_id: user.user_id,
            })
            .await;
        Ok(plaintexts)
    }

    /// Check a second-factor value: a live TOTP code, or failing that a
    /// single-use backup code. Backup codes are consumed atomically, so a
    /// code can never be accepted twice.
    pub async fn verify_second_factor(&self, user: &User, code: &str) -> Result<bool, CoreError> {
        if let Some(secret) = self.store.find_totp_secret(user.user_id).await? {
            if secret.is_confirmed() {
                let totp = self.build_totp(&secret.secret_base32, &user.email)?;
                let valid = totp
                    .check_current(code)
                    .map_err(|e| anyhow::anyhow!("system clock error: {}", e))?;
                if valid {
                    return Ok(true);
                }
            }
        }
        self.store
            .consume_backup_code(user.user_id, &BackupCode::hash_code(code))
            .await
    }

    /// Issue a phone OTP challenge, subject to the resend cooldown, and
    /// hand the plaintext code to the delivery transport.
    pub async fn request_phone_challenge(&self, phone: &str) -> Result<(), CoreError> {
        if let Some(open) = self.store.find_open_challenge(phone).await? {
            if !open.is_expired() {
                if let Some(remaining) =
                    open.cooldown_remaining_seconds(self.otp.resend_cooldown_seconds)
                {
                    return Err(CoreError::OtpCooldown {
                        retry_after_seconds: remaining,
                    });
                }
            }
            // A replaced challenge stops being answerable.
            self.store.delete_challenge(open.challenge_id).await?;
        }

        let code = random_numeric_code(self.otp.code_length);
        let challenge = OtpChallenge::new(
            phone.to_string(),
            OtpChallenge::hash_code(&code),
            self.otp.expiry_seconds,
        );
        self.store.insert_challenge(&challenge).await?;
        tracing::info!(challenge_id = %challenge.challenge_id, "phone OTP challenge issued");
        self.delivery.deliver(phone, &code).await;
        Ok(())
    }

    /// Verify a phone OTP answer. Each wrong answer burns an attempt; the
    /// challenge dies after `max_attempts` or on expiry.
    pub async fn verify_phone_challenge(&self, phone: &str, code: &str) -> Result<(), CoreError> {
        let challenge = self
            .store
            .find_open_challenge(phone)
            .await?
            .ok_or(CoreError::InvalidCredentials)?;

        if challenge.is_expired() {
            self.store.delete_challenge(challenge.challenge_id).await?;
            return Err(CoreError::OtpExpired);
        }

        let attempts = self
            .store
            .increment_challenge_attempts(challenge.challenge_id)
            .await?;
        if attempts > self.otp.max_attempts {
            self.store.delete_challenge(challenge.challenge_id).await?;
            return Err(CoreError::OtpAttemptsExceeded);
        }

        let consumed = self
            .store
            .consume_challenge(challenge.challenge_id, &OtpChallenge::hash_code(code))
            .await?;
        if !consumed {
            if attempts >= self.otp.max_attempts {
                self.store.delete_challenge(challenge.challenge_id).await?;
                return Err(CoreError::OtpAttemptsExceeded);
            }
            return Err(CoreError::InvalidCredentials);
        }
        Ok(())
    }
}
