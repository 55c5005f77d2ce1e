//! Password login scenarios: token issuance, claims, tenant gating.

mod common;

use std::io::Write;

use auth_core::models::TenantState;
use auth_core::services::{CoreError, LoginOutcome, TokenIssuer};
use auth_core::store::AuthStore;
use auth_core::tenant::TenantContext;
use common::{harness, token_config_for_files, TEST_PASSWORD, TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};
use tempfile::NamedTempFile;

#[tokio::test]
async fn login_returns_access_and_refresh_tokens() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    let outcome = h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web:chrome")
        .await
        .unwrap();

    let pair = match outcome {
        LoginOutcome::Complete(pair) => pair,
        other => panic!("expected complete login, got {:?}", other),
    };
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 15 * 60);

    let claims = h.auth.verify_access_token(&pair.access_token).unwrap();
    assert_eq!(claims.sub, user.user_id.to_string());
    assert_eq!(claims.tid, tenant.tenant_id.to_string());

    let ctx = TenantContext::from_claims(&claims).unwrap();
    assert_eq!(ctx.user_id, user.user_id);
    assert_eq!(ctx.tenant_id, tenant.tenant_id);
}

#[tokio::test]
async fn login_email_is_case_insensitive() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    let outcome = h
        .auth
        .login(tenant.tenant_id, "Teacher@NorthHill.edu", TEST_PASSWORD, "web")
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Complete(_)));
}

#[tokio::test]
async fn wrong_password_and_unknown_user_look_identical() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    let wrong_password = h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", "wrong", "web")
        .await;
    let unknown_user = h
        .auth
        .login(tenant.tenant_id, "nobody@northhill.edu", TEST_PASSWORD, "web")
        .await;

    assert!(matches!(wrong_password, Err(CoreError::InvalidCredentials)));
    assert!(matches!(unknown_user, Err(CoreError::InvalidCredentials)));
}

#[tokio::test]
async fn suspended_tenant_refuses_logins_with_a_generic_error() {
    let h = harness();
    let mut tenant = h.seed_tenant("closed-school").await;
    tenant.tenant_state_code = TenantState::Suspended.as_str().to_string();
    h.store.insert_tenant(&tenant).await.unwrap();
    h.seed_user(tenant.tenant_id, "teacher@closed.edu").await;

    let result = h
        .auth
        .login(tenant.tenant_id, "teacher@closed.edu", TEST_PASSWORD, "web")
        .await;
    assert!(matches!(result, Err(CoreError::InvalidCredentials)));
}

#[tokio::test]
async fn suspended_user_cannot_login() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let mut user = h.seed_user(tenant.tenant_id, "gone@northhill.edu").await;
    user.user_state_code = "suspended".to_string();
    h.store.insert_user(&user).await.unwrap();

    let result = h
        .auth
        .login(tenant.tenant_id, "gone@northhill.edu", TEST_PASSWORD, "web")
        .await;
    assert!(matches!(result, Err(CoreError::InvalidCredentials)));
}

#[tokio::test]
async fn login_includes_assigned_role_labels_in_claims() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "head@northhill.edu").await;
    let (role, _) = h
        .seed_role_with_permission(tenant.tenant_id, "headteacher", "grades:entry:edit", None)
        .await;

    let admin_ctx = TenantContext::new(tenant.tenant_id, user.user_id, None);
    h.auth
        .rbac()
        .assign_role(&admin_ctx, user.user_id, role.role_id, None, None)
        .await
        .unwrap();

    let outcome = h
        .auth
        .login(tenant.tenant_id, "head@northhill.edu", TEST_PASSWORD, "web")
        .await
        .unwrap();
    let LoginOutcome::Complete(pair) = outcome else {
        panic!("expected complete login");
    };
    let claims = h.auth.verify_access_token(&pair.access_token).unwrap();
    assert_eq!(claims.roles, vec!["headteacher".to_string()]);
}

#[tokio::test]
async fn issuer_loads_keys_from_files() {
    let mut private_file = NamedTempFile::new().unwrap();
    private_file.write_all(TEST_PRIVATE_KEY.as_bytes()).unwrap();
    let mut public_file = NamedTempFile::new().unwrap();
    public_file.write_all(TEST_PUBLIC_KEY.as_bytes()).unwrap();

    let config = token_config_for_files(
        private_file.path().to_str().unwrap(),
        public_file.path().to_str().unwrap(),
    );
    let issuer = TokenIssuer::new(&config).unwrap();
    assert_eq!(issuer.access_token_expiry_minutes(), 15);
}

#[tokio::test]
async fn issuer_rejects_missing_key_files() {
    let config = token_config_for_files("/nonexistent/private.pem", "/nonexistent/public.pem");
    assert!(TokenIssuer::new(&config).is_err());
}
