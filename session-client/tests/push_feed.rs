mod support;

use std::time::Duration;

use session_client::{subscribe_frame, InvalidationAction, InvalidationHub, PushFeed};
use support::PushServer;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread")]
async fn feed_joins_namespace_subscribes_and_forwards_updates() {
    let mut server = PushServer::start().await;
    let hub = InvalidationHub::new();
    let subscription = hub.register("a1").expect("registration");
    let (tx, mut rx) = mpsc::channel(4);
    let feed = tokio::spawn(PushFeed::new(server.url.clone(), subscription).run(tx));

    assert_eq!(server.next_frame().await, (0, "40".to_string()));
    assert_eq!(server.next_frame().await, (0, subscribe_frame("a1")));

    server.send("2");
    assert_eq!(server.next_frame().await, (0, "3".to_string()));

    server.send(r#"42["admin-session:update",{"targetAdminIds":["a1"],"action":"updated"}]"#);
    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("feed open");
    assert!(event.targets("a1"));
    assert_eq!(event.action, InvalidationAction::Updated);

    drop(rx);
    feed.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_ignores_unrelated_packets() {
    let mut server = PushServer::start().await;
    let hub = InvalidationHub::new();
    let (tx, mut rx) = mpsc::channel(4);
    tokio::spawn(PushFeed::new(server.url.clone(), hub.register("a1").expect("registration")).run(tx));
    server.next_subscription("a1").await;

    server.send(r#"42["chat",{"targetAdminIds":["a1"]}]"#);
    server.send(r#"{"event":"admin-session:update","data":{"targetAdminIds":["a1"]}}"#);
    server.send(r#"42["admin-session:update",{"targetAdminIds":["a2"],"action":"deleted"}]"#);

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("feed open");
    assert_eq!(event.target_admin_ids, vec!["a2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_reconnects_after_server_closes() {
    let mut server = PushServer::start().await;
    let hub = InvalidationHub::new();
    let (tx, _rx) = mpsc::channel(4);
    let feed = tokio::spawn(PushFeed::new(server.url.clone(), hub.register("a1").expect("registration")).run(tx));

    assert_eq!(server.next_subscription("a1").await, 0);
    server.close_all();

    // First retry waits one second.
    assert_eq!(server.next_subscription("a1").await, 1);
    feed.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_stops_once_listener_is_gone() {
    let mut server = PushServer::start().await;
    let hub = InvalidationHub::new();
    let (tx, rx) = mpsc::channel(4);
    let feed = tokio::spawn(PushFeed::new(server.url.clone(), hub.register("a1").expect("registration")).run(tx));
    server.next_subscription("a1").await;

    drop(rx);
    timeout(Duration::from_secs(2), feed)
        .await
        .expect("feed stopped")
        .expect("join");
    assert!(!hub.is_registered("a1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_stops_during_backoff_when_listener_is_gone() {
    let hub = InvalidationHub::new();
    let (tx, rx) = mpsc::channel(4);
    // Nothing listens on port 9; every connect fails and the feed backs off.
    let feed = tokio::spawn(
        PushFeed::new("ws://127.0.0.1:9/socket.io/", hub.register("a1").expect("registration"))
            .run(tx),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    drop(rx);
    timeout(Duration::from_secs(2), feed)
        .await
        .expect("feed stopped")
        .expect("join");
}
