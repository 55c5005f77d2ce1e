use std::env;

use crate::services::CoreError;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub environment: Environment,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub token: TokenConfig,
    pub lockout: LockoutConfig,
    pub otp: OtpConfig,
    pub totp_issuer: String,
    /// Upper bound on login and refresh round trips before the caller gets
    /// a retryable service-unavailable answer.
    pub operation_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub two_factor_token_expiry_minutes: i64,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_failures: i32,
    pub window_minutes: i64,
    pub lock_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub code_length: usize,
    pub expiry_seconds: i64,
    pub max_attempts: i32,
    pub resend_cooldown_seconds: i64,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment = match env_str.as_str() {
            "prod" => Environment::Prod,
            _ => Environment::Dev,
        };
        let is_prod = environment == Environment::Prod;

        let config = CoreConfig {
            environment,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            token: TokenConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    "30",
                    is_prod,
                )?,
                two_factor_token_expiry_minutes: parse_env(
                    "JWT_TWO_FACTOR_TOKEN_EXPIRY_MINUTES",
                    "5",
                    is_prod,
                )?,
                issuer: get_env("JWT_ISSUER", Some("auth-core"), is_prod)?,
            },
            lockout: LockoutConfig {
                max_failures: parse_env("LOCKOUT_MAX_FAILURES", "5", is_prod)?,
                window_minutes: parse_env("LOCKOUT_WINDOW_MINUTES", "15", is_prod)?,
                lock_minutes: parse_env("LOCKOUT_LOCK_MINUTES", "30", is_prod)?,
            },
            otp: OtpConfig {
                code_length: parse_env("OTP_CODE_LENGTH", "6", is_prod)?,
                expiry_seconds: parse_env("OTP_EXPIRY_SECONDS", "300", is_prod)?,
                max_attempts: parse_env("OTP_MAX_ATTEMPTS", "3", is_prod)?,
                resend_cooldown_seconds: parse_env("OTP_RESEND_COOLDOWN_SECONDS", "60", is_prod)?,
            },
            totp_issuer: get_env("TOTP_ISSUER", Some("School Platform"), is_prod)?,
            operation_timeout_seconds: parse_env("OPERATION_TIMEOUT_SECONDS", "10", is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.token.access_token_expiry_minutes <= 0 {
            return Err(anyhow::anyhow!("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive").into());
        }
        if self.lockout.max_failures <= 0 {
            return Err(anyhow::anyhow!("LOCKOUT_MAX_FAILURES must be positive").into());
        }
        if self.otp.code_length < 4 || self.otp.code_length > 10 {
            return Err(anyhow::anyhow!("OTP_CODE_LENGTH must be between 4 and 10").into());
        }
        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, CoreError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(anyhow::anyhow!("{} is required in production but not set", key).into())
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(anyhow::anyhow!("{} is required but not set", key).into())
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e| anyhow::anyhow!("{} is not valid: {}", key, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_falls_back_to_default_outside_prod() {
        let value = get_env("AUTH_CORE_TEST_UNSET_KEY", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn missing_key_is_an_error_in_prod() {
        assert!(get_env("AUTH_CORE_TEST_UNSET_KEY", Some("fallback"), true).is_err());
    }
}
