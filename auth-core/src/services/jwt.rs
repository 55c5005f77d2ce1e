use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::{RefreshSession, User};
use crate::services::CoreError;
use crate::tenant::TenantContext;
use crate::utils::random_token_hex;

/// Claim value marking a token as the intermediate 2FA step, not a grant.
const PURPOSE_TWO_FACTOR: &str = "2fa";

/// Issues and verifies signed access tokens and opaque refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
    two_factor_token_expiry_minutes: i64,
    issuer: String,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Tenant ID
    pub tid: String,
    /// Branch ID, when the session is branch-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<String>,
    /// Role labels active at issuance
    pub roles: Vec<String>,
    /// Issuer
    pub iss: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
}

/// Claims for the short-lived token bridging password check and 2FA check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTwoFactorClaims {
    pub sub: String,
    pub tid: String,
    /// Always `"2fa"`; an access token can never pass for one of these
    pub purpose: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Token pair returned to the client after a completed login or refresh
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenIssuer {
    /// Create a token issuer by loading RSA keys from the configured files.
    pub fn new(config: &TokenConfig) -> Result<Self, CoreError> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;
        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;

        let issuer = Self::from_rsa_pem(
            private_key_pem.as_bytes(),
            public_key_pem.as_bytes(),
            config.access_token_expiry_minutes,
            config.two_factor_token_expiry_minutes,
            &config.issuer,
        )?;
        tracing::info!("token issuer initialized with RS256 keys");
        Ok(issuer)
    }

    /// Create a token issuer from in-memory PEM key material.
    pub fn from_rsa_pem(
        private_key_pem: &[u8],
        public_key_pem: &[u8],
        access_token_expiry_minutes: i64,
        two_factor_token_expiry_minutes: i64,
        issuer: &str,
    ) -> Result<Self, CoreError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;
        Ok(Self {
            encoding_key,
            decoding_key,
            access_token_expiry_minutes,
            two_factor_token_expiry_minutes,
            issuer: issuer.to_string(),
        })
    }

    pub fn access_token_expiry_minutes(&self) -> i64 {
        self.access_token_expiry_minutes
    }

    /// Sign an access token for an authenticated user.
    pub fn issue_access_token(
        &self,
        user: &User,
        branch_id: Option<Uuid>,
        roles: Vec<String>,
    ) -> Result<String, CoreError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessClaims {
            sub: user.user_id.to_string(),
            tid: user.tenant_id.to_string(),
            bid: branch_id.map(|b| b.to_string()),
            roles,
            iss: self.issuer.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(Algorithm::RS256);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e).into())
    }

    /// Sign the intermediate token handed out when a password checks out but
    /// a second factor is still owed.
    pub fn issue_two_factor_token(&self, user: &User) -> Result<String, CoreError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.two_factor_token_expiry_minutes);

        let claims = PendingTwoFactorClaims {
            sub: user.user_id.to_string(),
            tid: user.tenant_id.to_string(),
            purpose: PURPOSE_TWO_FACTOR.to_string(),
            iss: self.issuer.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(Algorithm::RS256);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode 2FA token: {}", e).into())
    }

    /// Verify an access token's signature, expiry and issuer.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, CoreError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?;
        Ok(data.claims)
    }

    /// Verify the intermediate 2FA token, including its purpose claim.
    pub fn verify_two_factor_token(
        &self,
        token: &str,
    ) -> Result<PendingTwoFactorClaims, CoreError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<PendingTwoFactorClaims>(token, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?;
        if data.claims.purpose != PURPOSE_TWO_FACTOR {
            return Err(CoreError::TokenInvalidSignature);
        }
        Ok(data.claims)
    }

    /// Build a full token pair for an established session.
    pub fn issue_pair(
        &self,
        user: &User,
        ctx: &TenantContext,
        roles: Vec<String>,
        refresh_token: String,
    ) -> Result<TokenPair, CoreError> {
        let access_token = self.issue_access_token(user, ctx.branch_id, roles)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry_minutes * 60,
        })
    }
}

/// Mint a fresh opaque refresh token. Returns the plaintext handed to the
/// client and the digest that gets persisted.
pub fn new_refresh_token() -> (String, String) {
    let plain = random_token_hex(32);
    let hash = RefreshSession::hash_token(&plain);
    (plain, hash)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CoreError {
    match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => CoreError::TokenExpired,
        _ => CoreError::TokenInvalidSignature,
    }
}
