use std::sync::Arc;
use std::time::Duration;

use common_auth::Role;
use common_observability::SessionMetrics;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::api::{HeartbeatResult, SessionApi};
use crate::error::{SessionError, SessionResult};
use crate::store::{CredentialStore, StoreError};
use crate::terminator::{LogoutCause, SessionTerminator, DEFAULT_REVOKED_MESSAGE};

/// Periodic proof of presence for one administrator session.
///
/// A rejection means the server revoked the session and ends it with the
/// server's reason; it never triggers a renewal. Any other failure is retried
/// on the next tick.
pub struct LivenessHeartbeat {
    role: Role,
    every: Duration,
    api: Arc<dyn SessionApi>,
    store: Arc<CredentialStore>,
    terminator: SessionTerminator,
    metrics: Arc<SessionMetrics>,
}

impl LivenessHeartbeat {
    pub fn new(
        role: Role,
        every: Duration,
        api: Arc<dyn SessionApi>,
        store: Arc<CredentialStore>,
        terminator: SessionTerminator,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            role,
            every,
            api,
            store,
            terminator,
            metrics,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the session was just proven.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.beat().await {
                Ok(()) => {}
                Err(err @ (SessionError::Revoked { .. } | SessionError::Store(_))) => {
                    debug!(%err, role = %self.role, "heartbeat stopped");
                    break;
                }
                Err(err) => {
                    warn!(%err, role = %self.role, "heartbeat failed; retrying next tick");
                }
            }
        }
    }

    /// One liveness call. `Revoked` means the session was just torn down;
    /// `NoSession` means there was nothing left to prove. Any other error is
    /// transient.
    pub async fn beat(&self) -> SessionResult<()> {
        let Some(token) = self.store.token(self.role) else {
            return Err(StoreError::NoSession(self.role).into());
        };

        match self.api.heartbeat(&token).await {
            Ok(HeartbeatResult::Alive) => {
                self.metrics.heartbeat("alive");
                Ok(())
            }
            Ok(HeartbeatResult::Revoked(reason)) => {
                self.metrics.heartbeat("revoked");
                let reason = reason.unwrap_or_else(|| DEFAULT_REVOKED_MESSAGE.to_string());
                self.terminator
                    .force_logout(self.role, LogoutCause::Revoked, &reason);
                Err(SessionError::Revoked {
                    role: self.role,
                    reason,
                })
            }
            Err(err) => {
                self.metrics.heartbeat("transient");
                Err(err)
            }
        }
    }
}
