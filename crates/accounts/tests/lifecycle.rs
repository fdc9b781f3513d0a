#![allow(clippy::unwrap_used)]

mod common;

use std::{sync::atomic::Ordering, time::Duration};

use {
    common::{PAIRED_JID, Script, code_event, harness},
    tokio_util::sync::CancellationToken,
    wamux_accounts::{AccountStatus, AccountStore, Error, ErrorKind, LoginResponse, WebhookConfig},
};

fn token() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn create_rejects_duplicate_and_keeps_original() {
    let h = harness(Script::default()).await;
    let created = h.service.create("acct1").await.unwrap();
    assert_eq!(created.status, AccountStatus::Disconnected);

    let err = h.service.create("acct1").await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));

    let stored = h.store.get("acct1").await.unwrap();
    assert_eq!(stored.created_at, created.created_at);
}

#[tokio::test]
async fn create_validates_id() {
    let h = harness(Script::default()).await;
    let long = "x".repeat(51);
    for bad in ["", "has space", "../up", long.as_str()] {
        let err = h.service.create(bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{bad:?}");
    }
}

#[tokio::test]
async fn login_when_already_paired_reports_marker() {
    let h = harness(Script {
        logged_in_on_connect: true,
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();

    let resp = h.service.login("acct1", &token()).await.unwrap();
    assert_eq!(resp.code, LoginResponse::ALREADY_LOGGED_IN);
    assert!(resp.image_path.is_none());

    let info = h.service.get("acct1").await.unwrap();
    assert_eq!(info.account.status, AccountStatus::LoggedIn);
    assert_eq!(info.account.device_id.as_deref(), Some(PAIRED_JID));
    assert_eq!(info.account.phone_number.as_deref(), Some("15551234567"));
    assert!(info.account.last_connected.is_some());
    assert!(info.is_connected);
    assert!(info.is_logged_in);
}

#[tokio::test]
async fn login_unknown_account_is_not_found() {
    let h = harness(Script::default()).await;
    let err = h.service.login("ghost", &token()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.connector.built_count(), 0);
}

#[tokio::test]
async fn qr_login_returns_code_and_image() {
    let h = harness(Script {
        auth_on_connect: vec![code_event("2@abc,def")],
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();

    let resp = h.service.login("acct1", &token()).await.unwrap();
    assert_eq!(resp.code, "2@abc,def");
    assert_eq!(resp.expires_in, Duration::from_secs(20));
    let image = resp.image_path.unwrap();
    assert!(image.exists());
    assert!(image.starts_with(&h.qr_dir));

    // Not paired yet.
    let account = h.store.get("acct1").await.unwrap();
    assert_eq!(account.status, AccountStatus::Disconnected);
    assert!(h.service.registry().contains("acct1"));

    let props = h.connector.last_props.lock().unwrap().clone().unwrap();
    assert!(props.os.starts_with("Wamux "));
}

#[tokio::test]
async fn qr_login_completes_when_pairing_succeeds() {
    let h = harness(Script {
        pair_after: Some(Duration::from_millis(30)),
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();

    let resp = h.service.login("acct1", &token()).await.unwrap();
    assert!(resp.is_success());

    let account = h.store.get("acct1").await.unwrap();
    assert_eq!(account.status, AccountStatus::LoggedIn);
    assert_eq!(account.device_id.as_deref(), Some(PAIRED_JID));
}

#[tokio::test]
async fn unexpected_auth_event_is_an_auth_failure() {
    let h = harness(Script {
        auth_on_connect: vec![wamux_whatsapp::AuthEvent::Other("err-client-outdated".into())],
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();

    let err = h.service.login("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::Auth(ref msg) if msg.contains("err-client-outdated")));
}

#[tokio::test]
async fn qr_timeout_keeps_session_for_retry() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();

    let err = h.service.login("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_retryable());
    assert!(h.service.registry().contains("acct1"));

    // Driving login again reuses the registered session.
    let err = h.service.login("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(h.connector.built_count(), 1);
    let inner = h.connector.last();
    assert_eq!(inner.connects.load(Ordering::SeqCst), 2);
    assert_eq!(inner.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_login_keeps_session() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();

    let cancel = token();
    cancel.cancel();
    let err = h.service.login("acct1", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(h.service.registry().contains("acct1"));
}

#[tokio::test]
async fn concurrent_logins_share_one_session() {
    let h = harness(Script {
        auth_on_connect: vec![code_event("2@abc")],
        connect_delay: Some(Duration::from_millis(50)),
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();

    let (first, second) = (token(), token());
    let (a, b) = tokio::join!(
        h.service.login("acct1", &first),
        h.service.login("acct1", &second),
    );
    assert_eq!(a.unwrap().code, "2@abc");
    assert_eq!(b.unwrap().code, "2@abc");
    assert_eq!(h.connector.built_count(), 1);
    assert_eq!(h.service.registry().len(), 1);
}

#[tokio::test]
async fn login_with_logged_in_session_conflicts() {
    let h = harness(Script {
        logged_in_on_connect: true,
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();
    h.service.login("acct1", &token()).await.unwrap();

    let err = h.service.login("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyLoggedIn(_)));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
}

#[tokio::test]
async fn pairing_code_login_records_phone() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();

    let code = h
        .service
        .login_with_code("acct1", "+15551234567", &token())
        .await
        .unwrap();
    assert_eq!(code, "ABCD-1234");

    let account = h.store.get("acct1").await.unwrap();
    assert_eq!(account.phone_number.as_deref(), Some("15551234567"));
    assert!(h.service.registry().contains("acct1"));
}

#[tokio::test]
async fn pairing_code_login_rejects_bad_phone() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();

    let err = h
        .service
        .login_with_code("acct1", "12-34", &token())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(h.connector.built_count(), 0);
}

#[tokio::test]
async fn pairing_code_login_when_paired_conflicts() {
    let h = harness(Script {
        logged_in_on_connect: true,
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();

    let err = h
        .service
        .login_with_code("acct1", "15551234567", &token())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyLoggedIn(_)));
    let account = h.store.get("acct1").await.unwrap();
    assert_eq!(account.status, AccountStatus::LoggedIn);
}

#[tokio::test]
async fn logout_clears_identity_and_session() {
    let h = harness(Script {
        logged_in_on_connect: true,
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();
    h.service.login("acct1", &token()).await.unwrap();
    assert!(h.credentials.account_dir("acct1").exists());

    h.service.logout("acct1", &token()).await.unwrap();

    let account = h.store.get("acct1").await.unwrap();
    assert_eq!(account.status, AccountStatus::Disconnected);
    assert!(account.device_id.is_none());
    assert!(account.phone_number.is_none());
    assert!(h.service.registry().get("acct1").is_none());
    assert!(!h.credentials.account_dir("acct1").exists());
    assert_eq!(h.connector.last().logouts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_without_session_fails() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();
    let err = h.service.logout("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));
}

#[tokio::test]
async fn failed_network_logout_leaves_state_in_place() {
    let h = harness(Script {
        logged_in_on_connect: true,
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();
    h.service.login("acct1", &token()).await.unwrap();
    h.connector.set_script(Script {
        logged_in_on_connect: true,
        fail_logout: true,
        ..Script::default()
    });

    let err = h.service.logout("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert!(h.service.registry().contains("acct1"));
    assert!(h.credentials.account_dir("acct1").exists());
    let account = h.store.get("acct1").await.unwrap();
    assert_eq!(account.status, AccountStatus::LoggedIn);
    assert!(account.device_id.is_some());
}

#[tokio::test]
async fn reconnect_requires_session() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();
    let err = h.service.reconnect("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));
}

#[tokio::test]
async fn reconnect_reflects_login_state() {
    let h = harness(Script {
        auth_on_connect: vec![code_event("2@abc")],
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();
    h.service.login("acct1", &token()).await.unwrap();

    let status = h.service.reconnect("acct1", &token()).await.unwrap();
    assert_eq!(status, AccountStatus::Connected);
    let inner = h.connector.last();
    assert_eq!(inner.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(inner.connects.load(Ordering::SeqCst), 2);

    h.connector.set_script(Script {
        logged_in_on_connect: true,
        ..Script::default()
    });
    let status = h.service.reconnect("acct1", &token()).await.unwrap();
    assert_eq!(status, AccountStatus::LoggedIn);
    let account = h.store.get("acct1").await.unwrap();
    assert_eq!(account.device_id.as_deref(), Some(PAIRED_JID));
}

#[tokio::test]
async fn reconnect_failure_is_surfaced() {
    let h = harness(Script {
        auth_on_connect: vec![code_event("2@abc")],
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();
    h.service.login("acct1", &token()).await.unwrap();
    h.connector.set_script(Script {
        fail_connect: true,
        ..Script::default()
    });

    let err = h.service.reconnect("acct1", &token()).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn delete_tears_down_live_session() {
    let h = harness(Script {
        auth_on_connect: vec![code_event("2@abc")],
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();
    let resp = h.service.login("acct1", &token()).await.unwrap();
    let image = resp.image_path.unwrap();
    let inner = h.connector.last();

    h.service.delete("acct1").await.unwrap();

    assert!(h.service.registry().get("acct1").is_none());
    assert!(!inner.connected.load(Ordering::SeqCst));
    assert!(matches!(
        h.service.get("acct1").await,
        Err(Error::NotFound(_))
    ));
    assert!(!image.exists());
    assert!(!h.credentials.account_dir("acct1").exists());
}

#[tokio::test]
async fn delete_without_session_only_drops_record() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();
    h.service.create("acct2").await.unwrap();

    h.service.delete("acct1").await.unwrap();
    assert!(h.store.get("acct1").await.is_err());
    assert!(h.store.get("acct2").await.is_ok());
    assert_eq!(h.connector.built_count(), 0);

    let err = h.service.delete("acct1").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn webhook_is_independent_of_session() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();

    h.service
        .set_webhook("acct1", WebhookConfig::new("https://hooks.example/acct1"))
        .await
        .unwrap();

    assert!(h.service.registry().get("acct1").is_none());
    let hook = h.service.get_webhook("acct1").await.unwrap().unwrap();
    assert_eq!(hook.url, "https://hooks.example/acct1");
    let info = h.service.get("acct1").await.unwrap();
    assert_eq!(info.webhook_url.as_deref(), Some("https://hooks.example/acct1"));
    assert!(!info.is_connected);
    assert!(!info.is_logged_in);
}

#[tokio::test]
async fn webhook_validation() {
    let h = harness(Script::default()).await;
    h.service.create("acct1").await.unwrap();

    let err = h
        .service
        .set_webhook("ghost", WebhookConfig::new("https://hooks.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    for bad in ["not a url", "ftp://hooks.example/x"] {
        let err = h
            .service
            .set_webhook("acct1", WebhookConfig::new(bad))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{bad}");
    }
}

#[tokio::test]
async fn list_reads_without_mutating() {
    let h = harness(Script {
        logged_in_on_connect: true,
        ..Script::default()
    })
    .await;
    h.service.create("acct1").await.unwrap();
    h.service.create("acct2").await.unwrap();
    h.service.login("acct2", &token()).await.unwrap();
    let before = h.store.list().await.unwrap();

    let infos = h.service.list().await.unwrap();
    assert_eq!(infos.len(), 2);
    let acct2 = infos.iter().find(|i| i.account.id == "acct2").unwrap();
    assert!(acct2.is_logged_in);
    let acct1 = infos.iter().find(|i| i.account.id == "acct1").unwrap();
    assert!(!acct1.is_connected);

    assert_eq!(h.store.list().await.unwrap(), before);
}

#[tokio::test]
async fn sessions_land_in_the_supplied_registry() {
    let h = harness(Script {
        auth_on_connect: vec![code_event("2@abc")],
        ..Script::default()
    })
    .await;
    assert!(std::sync::Arc::ptr_eq(h.service.registry(), &h.registry));

    h.service.create("acct1").await.unwrap();
    h.service.login("acct1", &token()).await.unwrap();

    assert!(h.registry.generation("acct1").is_some());
    assert_eq!(h.registry.len(), 1);
}
