//! Refresh rotation, replay detection and revocation scenarios.

mod common;

use auth_core::services::{CoreError, LoginOutcome, SecurityEvent, TokenPair};
use auth_core::tenant::TenantContext;
use common::{harness, TestHarness, TEST_PASSWORD};
use uuid::Uuid;

async fn login(h: &TestHarness, tenant_id: Uuid, email: &str) -> TokenPair {
    match h
        .auth
        .login(tenant_id, email, TEST_PASSWORD, "web:firefox")
        .await
        .unwrap()
    {
        LoginOutcome::Complete(pair) => pair,
        _ => panic!("expected complete login"),
    }
}

#[tokio::test]
async fn refresh_rotates_the_token_and_reissues_access() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    let pair0 = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;
    let pair1 = h.auth.refresh(&pair0.refresh_token).await.unwrap();
    let pair2 = h.auth.refresh(&pair1.refresh_token).await.unwrap();

    assert_ne!(pair0.refresh_token, pair1.refresh_token);
    assert_ne!(pair1.refresh_token, pair2.refresh_token);
    assert!(h.auth.verify_access_token(&pair2.access_token).is_ok());
}

#[tokio::test]
async fn replayed_token_kills_every_session_of_the_user() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    // Two devices, two independent sessions.
    let laptop = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;
    let phone = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;

    let rotated = h.auth.refresh(&laptop.refresh_token).await.unwrap();

    // Replaying the superseded laptop token is an attack signal.
    assert!(matches!(
        h.auth.refresh(&laptop.refresh_token).await,
        Err(CoreError::TokenReuseDetected)
    ));
    assert!(h
        .notifier
        .events()
        .iter()
        .any(|e| matches!(e, SecurityEvent::TokenReuseDetected { user_id, .. } if *user_id == user.user_id)));

    // Both families are dead, the untouched phone session included.
    assert!(h.auth.refresh(&rotated.refresh_token).await.is_err());
    assert!(h.auth.refresh(&phone.refresh_token).await.is_err());
}

#[tokio::test]
async fn concurrent_refreshes_of_one_token_have_a_single_winner() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;
    let pair = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let auth = h.auth.clone();
        let token = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move { auth.refresh(&token).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn logout_revokes_the_session_and_is_idempotent() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;
    let pair = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;

    h.auth.logout(&pair.refresh_token).await.unwrap();
    h.auth.logout(&pair.refresh_token).await.unwrap();
    h.auth.logout("never-issued-token").await.unwrap();

    assert!(h.auth.refresh(&pair.refresh_token).await.is_err());
}

#[tokio::test]
async fn unknown_refresh_token_is_rejected_quietly() {
    let h = harness();

    assert!(matches!(
        h.auth.refresh("fabricated").await,
        Err(CoreError::TokenInvalidSignature)
    ));
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn change_password_revokes_all_sessions() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    let laptop = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;
    let phone = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;

    let ctx = TenantContext::new(tenant.tenant_id, user.user_id, None);
    h.auth
        .change_password(&ctx, TEST_PASSWORD, "a whole new passphrase 42")
        .await
        .unwrap();

    assert!(h.auth.refresh(&laptop.refresh_token).await.is_err());
    assert!(h.auth.refresh(&phone.refresh_token).await.is_err());

    // Old password is gone, the new one works.
    assert!(h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web")
        .await
        .is_err());
    assert!(h
        .auth
        .login(
            tenant.tenant_id,
            "teacher@northhill.edu",
            "a whole new passphrase 42",
            "web"
        )
        .await
        .is_ok());
}

#[tokio::test]
async fn active_sessions_lists_live_devices_only() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;
    let ctx = TenantContext::new(tenant.tenant_id, user.user_id, None);

    let laptop = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;
    let _phone = login(&h, tenant.tenant_id, "teacher@northhill.edu").await;
    assert_eq!(h.auth.active_sessions(&ctx).await.unwrap().len(), 2);

    h.auth.logout(&laptop.refresh_token).await.unwrap();
    assert_eq!(h.auth.active_sessions(&ctx).await.unwrap().len(), 1);
}
