//! Authorization and session core for a multi-tenant school platform.
//!
//! Verifies credentials, enforces lockout, issues RS256 access tokens with
//! rotating opaque refresh tokens, resolves role-based permissions with
//! inheritance, and threads tenant isolation through every operation.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod store;
pub mod tenant;
pub mod utils;

pub use services::{AuthService, AuthServiceOptions, CoreError, LoginOutcome, TokenIssuer};
pub use store::{AuthStore, MemoryStore, PgStore};
pub use tenant::TenantContext;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize structured JSON logging.
pub fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true),
        )
        .init();
}
