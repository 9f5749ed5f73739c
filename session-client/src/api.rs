use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// Outcome of one liveness call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    Alive,
    /// The server revoked the session, optionally saying why.
    Revoked(Option<String>),
}

/// Auth endpoints the lifecycle talks to directly, outside the interceptor.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Exchange the ambient durable-session proof for a new access token.
    async fn refresh(&self) -> SessionResult<String>;
    async fn heartbeat(&self, token: &str) -> SessionResult<HeartbeatResult>;
    /// Clear administrator presence.
    async fn admin_logout(&self, token: &str) -> SessionResult<()>;
    /// Clear the cookie-backed session.
    async fn logout(&self) -> SessionResult<()>;
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken")]
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpSessionApi {
    client: Client,
    refresh_url: String,
    heartbeat_url: String,
    admin_logout_url: String,
    logout_url: String,
}

impl HttpSessionApi {
    /// `client` must carry the cookie jar holding the durable-session proof.
    pub fn new(client: Client, config: &SessionConfig) -> Self {
        Self {
            client,
            refresh_url: config.refresh_url(),
            heartbeat_url: config.heartbeat_url(),
            admin_logout_url: config.admin_logout_url(),
            logout_url: config.logout_url(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn refresh(&self) -> SessionResult<String> {
        let response = self.client.post(&self.refresh_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::RefreshRejected(status.as_u16()));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|err| SessionError::InvalidResponse(err.to_string()))?;
        Ok(body.token)
    }

    async fn heartbeat(&self, token: &str) -> SessionResult<HeartbeatResult> {
        let response = self
            .client
            .post(&self.heartbeat_url)
            .bearer_auth(token)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(HeartbeatResult::Alive);
        }
        if status == StatusCode::UNAUTHORIZED {
            let body = response.json::<MessageBody>().await.unwrap_or_default();
            let reason = body.message.filter(|message| !message.trim().is_empty());
            return Ok(HeartbeatResult::Revoked(reason));
        }
        Err(SessionError::Transport(format!("heartbeat returned HTTP {status}")))
    }

    async fn admin_logout(&self, token: &str) -> SessionResult<()> {
        let response = self
            .client
            .post(&self.admin_logout_url)
            .bearer_auth(token)
            .send()
            .await?;
        expect_success("admin logout", response.status())
    }

    async fn logout(&self) -> SessionResult<()> {
        let response = self.client.post(&self.logout_url).send().await?;
        expect_success("logout", response.status())
    }
}

fn expect_success(call: &str, status: StatusCode) -> SessionResult<()> {
    if status.is_success() {
        debug!(call, %status, "session call acknowledged");
        Ok(())
    } else {
        Err(SessionError::InvalidResponse(format!("{call} returned HTTP {status}")))
    }
}
