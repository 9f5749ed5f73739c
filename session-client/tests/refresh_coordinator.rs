mod support;

use std::time::Duration;

use common_auth::Role;
use session_client::terminator::DEFAULT_REVOKED_MESSAGE;
use session_client::{RefreshCoordinator, SessionError, SessionEvent, SessionState, StoreError};
use support::{mint, Harness};

fn coordinator(h: &Harness) -> RefreshCoordinator {
    RefreshCoordinator::new(
        h.api.clone(),
        h.store.clone(),
        h.terminator.clone(),
        h.metrics.clone(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_renewal() {
    let h = Harness::new();
    let stale = h.login(Role::User, "u1");
    let fresh = mint(Role::User, "u1-renewed");
    h.api.push_refresh(Ok(fresh.clone()));
    h.api.delay_refresh(Duration::from_millis(200));
    let refresh = coordinator(&h);

    let mut waiters = Vec::new();
    for _ in 0..6 {
        let refresh = refresh.clone();
        let stale = stale.clone();
        waiters.push(tokio::spawn(async move { refresh.refresh(&stale).await }));
    }
    for waiter in waiters {
        let token = waiter.await.expect("join").expect("renewed");
        assert_eq!(token, fresh);
    }

    assert_eq!(h.api.refreshes(), 1);
    assert!(!refresh.in_flight());
    assert_eq!(h.store.token(Role::User).as_deref(), Some(fresh.as_str()));
    assert_eq!(h.store.generic_token().as_deref(), Some(fresh.as_str()));
    assert_eq!(h.store.lifecycle().state(Role::User), SessionState::Authenticated);
}

#[tokio::test]
async fn failed_renewal_clears_slot_for_next_attempt() {
    let h = Harness::new();
    let stale = h.login(Role::User, "u1");
    let refresh = coordinator(&h);

    let err = refresh.refresh(&stale).await.unwrap_err();
    assert!(matches!(err, SessionError::RefreshRejected(401)));
    assert!(!refresh.in_flight());
    // The stored credential is left alone on failure.
    assert_eq!(h.store.token(Role::User).as_deref(), Some(stale.as_str()));

    let fresh = mint(Role::User, "u1-next");
    h.api.push_refresh(Ok(fresh.clone()));
    assert_eq!(refresh.refresh(&stale).await.unwrap(), fresh);
    assert_eq!(h.api.refreshes(), 2);
}

#[tokio::test]
async fn admin_renewed_into_another_role_is_logged_out() {
    let h = Harness::new();
    let mut events = h.terminator.subscribe();
    let stale = h.login(Role::VillageAdmin, "a1");
    let promoted = mint(Role::SuperAdmin, "a1");
    h.api.push_refresh(Ok(promoted.clone()));
    let refresh = coordinator(&h);

    let err = refresh.refresh(&stale).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::RoleMismatch {
            expected: Role::VillageAdmin,
            received: Some(Role::SuperAdmin)
        }
    ));

    assert!(h.store.token(Role::VillageAdmin).is_none());
    assert!(h.store.token(Role::SuperAdmin).is_none());
    assert!(h.store.role_of_token(&promoted).is_none());
    assert!(h.store.lifecycle().state(Role::VillageAdmin).is_terminated());

    let notice = h.store.take_notice().expect("notice");
    assert_eq!(notice.message, DEFAULT_REVOKED_MESSAGE);
    match events.recv().await.expect("event") {
        SessionEvent::Terminated { role, redirect, .. } => {
            assert_eq!(role, Role::VillageAdmin);
            assert_eq!(redirect, "/admin/login");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(h.forced_logouts(Role::VillageAdmin, "role_changed"), 1);
}

#[tokio::test]
async fn renewal_landing_after_forced_logout_is_discarded() {
    let h = Harness::new();
    let stale = h.login(Role::VillageAdmin, "a1");
    h.api.push_refresh(Ok(mint(Role::VillageAdmin, "a1-next")));
    h.api.delay_refresh(Duration::from_millis(50));
    let refresh = coordinator(&h);

    let pending = {
        let refresh = refresh.clone();
        let stale = stale.clone();
        tokio::spawn(async move { refresh.refresh(&stale).await })
    };
    tokio::task::yield_now().await;
    assert!(h.terminator.force_logout(
        Role::VillageAdmin,
        session_client::LogoutCause::Invalidated,
        "Your admin account was deleted by Super Admin."
    ));

    let err = pending.await.expect("join").unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(StoreError::SlotCleared(Role::VillageAdmin))
    ));
    assert!(h.store.token(Role::VillageAdmin).is_none());
}

#[tokio::test]
async fn malformed_renewal_is_rejected() {
    let h = Harness::new();
    let stale = h.login(Role::User, "u1");
    h.api.push_refresh(Ok("not-a-token".to_string()));
    let refresh = coordinator(&h);

    let err = refresh.refresh(&stale).await.unwrap_err();
    assert!(matches!(err, SessionError::MalformedRenewal));
    assert_eq!(h.store.token(Role::User).as_deref(), Some(stale.as_str()));
}

#[tokio::test]
async fn user_renewed_into_admin_token_is_not_adopted() {
    let h = Harness::new();
    let mut events = h.terminator.subscribe();
    let stale = h.login(Role::User, "u1");
    let admin = mint(Role::VillageAdmin, "a9");
    h.api.push_refresh(Ok(admin.clone()));
    let refresh = coordinator(&h);

    let err = refresh.refresh(&stale).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::RoleMismatch {
            expected: Role::User,
            received: Some(Role::VillageAdmin)
        }
    ));

    assert!(h.store.token(Role::User).is_none());
    assert!(h.store.generic_token().is_none());
    assert!(h.store.role_of_token(&admin).is_none());
    assert!(h.store.lifecycle().state(Role::User).is_terminated());
    match events.recv().await.expect("event") {
        SessionEvent::Terminated { role, cause, redirect, .. } => {
            assert_eq!(role, Role::User);
            assert_eq!(cause, session_client::LogoutCause::RoleChanged);
            assert_eq!(redirect, "/login");
        }
        other => panic!("unexpected event {other:?}"),
    }
    // Users are told about inactivity only.
    assert!(h.store.take_notice().is_none());
}
