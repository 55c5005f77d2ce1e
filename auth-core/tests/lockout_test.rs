//! Failed-login lockout scenarios.

mod common;

use chrono::{Duration, Utc};
use auth_core::models::LockoutState;
use auth_core::services::{CoreError, SecurityEvent};
use common::{harness, TEST_PASSWORD};

#[tokio::test]
async fn fifth_failure_locks_the_account() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    for _ in 0..5 {
        let result = h
            .auth
            .login(tenant.tenant_id, "teacher@northhill.edu", "wrong", "web")
            .await;
        assert!(matches!(result, Err(CoreError::InvalidCredentials)));
    }

    // Locked now, even with the correct password.
    match h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web")
        .await
    {
        Err(CoreError::AccountLocked {
            retry_after_seconds,
        }) => {
            assert!(retry_after_seconds > 0 && retry_after_seconds <= 30 * 60);
        }
        other => panic!("expected AccountLocked, got {:?}", other.err()),
    }

    assert!(h
        .notifier
        .events()
        .iter()
        .any(|e| matches!(e, SecurityEvent::AccountLocked { user_id, .. } if *user_id == user.user_id)));
}

#[tokio::test]
async fn successful_login_resets_the_failure_count() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    for _ in 0..4 {
        let _ = h
            .auth
            .login(tenant.tenant_id, "teacher@northhill.edu", "wrong", "web")
            .await;
    }
    assert!(h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web")
        .await
        .is_ok());

    // The counter restarted; four more failures still do not lock.
    for _ in 0..4 {
        let _ = h
            .auth
            .login(tenant.tenant_id, "teacher@northhill.edu", "wrong", "web")
            .await;
    }
    assert!(h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web")
        .await
        .is_ok());
}

#[tokio::test]
async fn failures_outside_the_window_do_not_accumulate() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    // Four failures, backdated past the 15 minute window.
    let mut stale = LockoutState::first_failure(user.user_id);
    stale.failure_count = 4;
    stale.window_start_utc = Utc::now() - Duration::minutes(20);
    h.store.put_lockout(stale);

    // One fresh failure starts a new window instead of locking.
    let _ = h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", "wrong", "web")
        .await;
    assert!(h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web")
        .await
        .is_ok());
}

#[tokio::test]
async fn expired_lock_lets_the_user_back_in() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    let user = h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    let mut expired = LockoutState::first_failure(user.user_id);
    expired.failure_count = 5;
    expired.window_start_utc = Utc::now() - Duration::minutes(45);
    expired.locked_until_utc = Some(Utc::now() - Duration::minutes(1));
    h.store.put_lockout(expired);

    assert!(h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web")
        .await
        .is_ok());
}

#[tokio::test]
async fn lockout_gates_the_password_check_not_issued_tokens() {
    let h = harness();
    let tenant = h.seed_tenant("north-hill").await;
    h.seed_user(tenant.tenant_id, "teacher@northhill.edu").await;

    let pair = match h
        .auth
        .login(tenant.tenant_id, "teacher@northhill.edu", TEST_PASSWORD, "web")
        .await
        .unwrap()
    {
        auth_core::services::LoginOutcome::Complete(pair) => pair,
        _ => panic!("expected complete login"),
    };

    for _ in 0..5 {
        let _ = h
            .auth
            .login(tenant.tenant_id, "teacher@northhill.edu", "wrong", "web")
            .await;
    }

    // The lock stops new logins, not the session issued before it.
    assert!(h.auth.verify_access_token(&pair.access_token).is_ok());
    assert!(h.auth.refresh(&pair.refresh_token).await.is_ok());
}
