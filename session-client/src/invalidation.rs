//! Server-pushed session invalidation.
//!
//! The push channel is broadcast to every administrator; each listener keeps
//! only events naming its own identity. The channel speaks Socket.IO over a
//! plain WebSocket (Engine.IO v4), so the push URL points at
//! `/socket.io/?EIO=4&transport=websocket`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common_auth::Role;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::terminator::{
    session_ended, LogoutCause, SessionEvent, SessionTerminator, DEFAULT_REVOKED_MESSAGE,
};

pub const UPDATE_EVENT: &str = "admin-session:update";
pub const SUBSCRIBE_EVENT: &str = "admin-session:subscribe";

const DELETED_MESSAGE: &str = "Your admin account was deleted by Super Admin.";
const BULK_DELETED_MESSAGE: &str = "Your admin account was removed by Super Admin.";
const ENDED_MESSAGE: &str = "Your admin session was ended by Super Admin. Please login again.";

// Engine.IO / Socket.IO packet prefixes.
const OPEN_PACKET: &str = "0";
const PING_PACKET: &str = "2";
const PONG_PACKET: &str = "3";
const CONNECT_PACKET: &str = "40";
const DISCONNECT_PACKET: &str = "41";
const EVENT_PACKET: &str = "42";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationAction {
    Deleted,
    BulkDeleted,
    Updated,
    Other(String),
}

impl Default for InvalidationAction {
    fn default() -> Self {
        InvalidationAction::Other(String::new())
    }
}

impl From<String> for InvalidationAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "deleted" => InvalidationAction::Deleted,
            "bulk_deleted" => InvalidationAction::BulkDeleted,
            "updated" => InvalidationAction::Updated,
            _ => InvalidationAction::Other(value),
        }
    }
}

impl InvalidationAction {
    pub fn canned_reason(&self) -> &'static str {
        match self {
            InvalidationAction::Deleted => DELETED_MESSAGE,
            InvalidationAction::BulkDeleted => BULK_DELETED_MESSAGE,
            InvalidationAction::Updated => DEFAULT_REVOKED_MESSAGE,
            InvalidationAction::Other(_) => ENDED_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    #[serde(default, alias = "targetIdentityIds")]
    pub target_admin_ids: Vec<String>,
    #[serde(default, deserialize_with = "action_from_string")]
    pub action: InvalidationAction,
    #[serde(default)]
    pub message: Option<String>,
}

fn action_from_string<'de, D>(deserializer: D) -> Result<InvalidationAction, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(InvalidationAction::from).unwrap_or_default())
}

impl InvalidationEvent {
    pub fn targets(&self, identity: &str) -> bool {
        self.target_admin_ids.iter().any(|id| id == identity)
    }

    /// Server-supplied message wins over the canned one.
    pub fn reason(&self) -> String {
        match self.message.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => message.to_string(),
            _ => self.action.canned_reason().to_string(),
        }
    }
}

/// Decode one Socket.IO event packet (`42["event", data]`). Anything that
/// is not an `admin-session:update` event is ignored.
pub fn parse_frame(text: &str) -> Option<InvalidationEvent> {
    let packet = text.trim().strip_prefix(EVENT_PACKET)?;
    let Value::Array(parts) = serde_json::from_str::<Value>(packet).ok()? else {
        return None;
    };
    let mut parts = parts.into_iter();
    if parts.next()?.as_str()? != UPDATE_EVENT {
        return None;
    }
    match serde_json::from_value(parts.next()?) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(%err, "ignoring malformed invalidation payload");
            None
        }
    }
}

/// Socket.IO event packet subscribing `identity` to its session updates.
pub fn subscribe_frame(identity: &str) -> String {
    let payload = json!([SUBSCRIBE_EVENT, { "adminId": identity }]);
    format!("{EVENT_PACKET}{payload}")
}

/// Tracks which identities already hold a push subscription.
///
/// Each registration carries a generation so that a subscription released
/// early and registered again is not undone when the stale one drops.
#[derive(Clone, Default)]
pub struct InvalidationHub {
    registrations: Arc<Mutex<HashMap<String, u64>>>,
    generations: Arc<AtomicU64>,
}

impl InvalidationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when `identity` is already subscribed.
    pub fn register(&self, identity: &str) -> Option<Subscription> {
        let mut guard = self.registrations.lock().expect("invalidation hub poisoned");
        if guard.contains_key(identity) {
            return None;
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        guard.insert(identity.to_string(), generation);
        Some(Subscription {
            identity: identity.to_string(),
            generation,
            registrations: self.registrations.clone(),
        })
    }

    /// Free `identity` now, even if its feed task has not wound down yet.
    pub fn release(&self, identity: &str) {
        let mut guard = self.registrations.lock().expect("invalidation hub poisoned");
        if guard.remove(identity).is_some() {
            debug!(identity, "push subscription released");
        }
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.registrations
            .lock()
            .expect("invalidation hub poisoned")
            .contains_key(identity)
    }
}

/// Releases the identity when dropped, unless it was registered again since.
pub struct Subscription {
    identity: String,
    generation: u64,
    registrations: Arc<Mutex<HashMap<String, u64>>>,
}

impl Subscription {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.registrations.lock() {
            if guard.get(&self.identity) == Some(&self.generation) {
                guard.remove(&self.identity);
            }
        }
    }
}

pub struct ForcedInvalidationListener {
    role: Role,
    identity: String,
    terminator: SessionTerminator,
}

impl ForcedInvalidationListener {
    pub fn new(role: Role, identity: impl Into<String>, terminator: SessionTerminator) -> Self {
        Self {
            role,
            identity: identity.into(),
            terminator,
        }
    }

    /// Apply one event. Returns whether it ended this session.
    pub fn handle(&self, event: &InvalidationEvent) -> bool {
        if !event.targets(&self.identity) {
            return false;
        }
        let reason = event.reason();
        info!(role = %self.role, identity = %self.identity, action = ?event.action, "session invalidated by server");
        self.terminator
            .force_logout(self.role, LogoutCause::Invalidated, &reason)
    }

    /// Consume events until the session ends or the feed closes.
    pub async fn run(self, mut rx: mpsc::Receiver<InvalidationEvent>) {
        let mut events: broadcast::Receiver<SessionEvent> = self.terminator.subscribe();
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => {
                        if self.handle(&event) {
                            return;
                        }
                    }
                    None => return,
                },
                _ = session_ended(&mut events, self.role) => return,
            }
        }
    }
}

/// WebSocket connection to the admin-session channel.
pub struct PushFeed {
    url: String,
    subscription: Subscription,
}

impl PushFeed {
    pub fn new(url: impl Into<String>, subscription: Subscription) -> Self {
        Self {
            url: url.into(),
            subscription,
        }
    }

    /// Forward decoded events into `tx`, reconnecting with backoff, until the
    /// receiving listener goes away.
    pub async fn run(self, tx: mpsc::Sender<InvalidationEvent>) {
        let mut backoff = INITIAL_BACKOFF;
        while !tx.is_closed() {
            match self.session(&tx).await {
                Ok(()) => backoff = INITIAL_BACKOFF,
                Err(err) => {
                    warn!(%err, url = %self.url, retry_in = ?backoff, "push channel disconnected");
                }
            }
            if tx.is_closed() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = tx.closed() => break,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        debug!(identity = self.subscription.identity(), "push feed stopped");
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<InvalidationEvent>,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut source) = stream.split();
        let identity = self.subscription.identity();

        loop {
            let frame = tokio::select! {
                frame = source.next() => frame,
                _ = tx.closed() => return Ok(()),
            };
            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(payload))) => {
                    sink.send(Message::Pong(payload)).await?;
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err),
            };
            let text = text.as_str();

            if text.starts_with(DISCONNECT_PACKET) {
                return Ok(());
            } else if text.starts_with(CONNECT_PACKET) {
                // Namespace joined; now the subscription can be emitted.
                sink.send(Message::Text(subscribe_frame(identity).into())).await?;
                info!(identity, "subscribed to admin session updates");
            } else if text.starts_with(EVENT_PACKET) {
                if let Some(event) = parse_frame(text) {
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            } else if text == PING_PACKET {
                sink.send(Message::Text(PONG_PACKET.into())).await?;
            } else if text.starts_with(OPEN_PACKET) {
                sink.send(Message::Text(CONNECT_PACKET.into())).await?;
            }
        }
    }
}
