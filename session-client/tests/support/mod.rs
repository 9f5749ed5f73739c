#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use chrono::Utc;
use common_auth::{PortalRoutes, Role};
use common_observability::SessionMetrics;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use session_client::{
    Credential, CredentialStore, HeartbeatResult, SessionApi, SessionError, SessionResult,
    SessionTerminator, Tier,
};

#[derive(Serialize)]
struct TestClaims<'a> {
    id: &'a str,
    role: &'a str,
    exp: i64,
}

/// HS256 token carrying `id` and `role`. Signature is never checked client side.
pub fn mint(role: Role, id: &str) -> String {
    mint_raw(role.as_str(), id)
}

pub fn mint_raw(role: &str, id: &str) -> String {
    let claims = TestClaims {
        id,
        role,
        exp: Utc::now().timestamp() + 900,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"portal-test-secret"),
    )
    .expect("mint token")
}

/// Scripted stand-in for the auth endpoints that records every call.
#[derive(Default)]
pub struct RecordingApi {
    refresh_results: Mutex<VecDeque<SessionResult<String>>>,
    heartbeat_results: Mutex<VecDeque<SessionResult<HeartbeatResult>>>,
    refresh_delay: Mutex<Duration>,
    pub refresh_calls: AtomicUsize,
    pub heartbeat_calls: AtomicUsize,
    pub admin_logout_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
}

impl RecordingApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_refresh(&self, result: SessionResult<String>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub fn push_heartbeat(&self, result: SessionResult<HeartbeatResult>) {
        self.heartbeat_results.lock().unwrap().push_back(result);
    }

    pub fn delay_refresh(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub fn admin_logouts(&self) -> usize {
        self.admin_logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionApi for RecordingApi {
    async fn refresh(&self) -> SessionResult<String> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(SessionError::RefreshRejected(401)))
    }

    async fn heartbeat(&self, _token: &str) -> SessionResult<HeartbeatResult> {
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        self.heartbeat_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(HeartbeatResult::Alive))
    }

    async fn admin_logout(&self, _token: &str) -> SessionResult<()> {
        self.admin_logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> SessionResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub api: Arc<RecordingApi>,
    pub store: Arc<CredentialStore>,
    pub terminator: SessionTerminator,
    pub metrics: Arc<SessionMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        let api = RecordingApi::new();
        let store = Arc::new(CredentialStore::in_memory());
        let metrics = Arc::new(SessionMetrics::new().expect("metrics"));
        let terminator = SessionTerminator::new(
            store.clone(),
            api.clone(),
            PortalRoutes::default(),
            metrics.clone(),
        );
        Self {
            api,
            store,
            terminator,
            metrics,
        }
    }

    /// Log `role` in with a fresh token and return it.
    pub fn login(&self, role: Role, id: &str) -> String {
        let token = mint(role, id);
        self.store
            .put(role, Tier::Tab, Credential::new(role, token.clone()), None)
            .expect("store credential");
        self.terminator.begin_navigation(role);
        token
    }

    pub fn forced_logouts(&self, role: Role, cause: &str) -> u64 {
        self.metrics
            .forced_logout_total
            .with_label_values(&[role.as_str(), cause])
            .get()
    }
}

/// Let spawned tasks run on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone)]
pub enum ServerCommand {
    Send(String),
    Close,
}

/// Minimal Socket.IO-over-WebSocket endpoint. Records every client text
/// frame with the index of the connection it arrived on and broadcasts
/// commands to every live connection.
pub struct PushServer {
    pub url: String,
    frames: mpsc::UnboundedReceiver<(usize, String)>,
    commands: broadcast::Sender<ServerCommand>,
}

impl PushServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!(
            "ws://{}/socket.io/?EIO=4&transport=websocket",
            listener.local_addr().expect("addr")
        );
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(16);
        let commands_tx = commands.clone();

        tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                tokio::spawn(serve_connection(
                    connection,
                    ws,
                    frames_tx.clone(),
                    commands_tx.subscribe(),
                ));
                connection += 1;
            }
        });

        Self {
            url,
            frames,
            commands,
        }
    }

    pub fn send(&self, text: impl Into<String>) {
        let _ = self.commands.send(ServerCommand::Send(text.into()));
    }

    pub fn close_all(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    /// Next client frame, failing the test after five seconds.
    pub async fn next_frame(&mut self) -> (usize, String) {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("client frame in time")
            .expect("server running")
    }

    /// Skip frames until the subscription packet for `identity` arrives;
    /// returns the connection it came in on.
    pub async fn next_subscription(&mut self, identity: &str) -> usize {
        let expected = session_client::subscribe_frame(identity);
        loop {
            let (connection, frame) = self.next_frame().await;
            if frame == expected {
                return connection;
            }
        }
    }
}

async fn serve_connection(
    connection: usize,
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    frames: mpsc::UnboundedSender<(usize, String)>,
    mut commands: broadcast::Receiver<ServerCommand>,
) {
    let (mut sink, mut source) = ws.split();
    let open = r#"0{"sid":"test","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
    if sink.send(Message::Text(open.into())).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_string();
                    if text == "40" {
                        let _ = sink.send(Message::Text(r#"40{"sid":"ns"}"#.into())).await;
                    }
                    let _ = frames.send((connection, text));
                }
                Some(Ok(_)) => {}
                _ => return,
            },
            command = commands.recv() => match command {
                Ok(ServerCommand::Send(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(ServerCommand::Close) | Err(_) => {
                    let _ = sink.close().await;
                    return;
                }
            },
        }
    }
}
