//! The one forced-logout primitive shared by every teardown path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use common_auth::{PortalRoutes, Role};
use common_observability::SessionMetrics;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::SessionApi;
use crate::store::{CredentialStore, LogoutNotice, Scope};

pub const DEFAULT_REVOKED_MESSAGE: &str =
    "Your admin access was changed by Super Admin. Please login again.";
pub const IDLE_MESSAGE: &str = "You have been logged out due to inactivity. Please login again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutCause {
    /// Heartbeat rejected by the server.
    Revoked,
    /// Matching push event.
    Invalidated,
    /// Renewal came back bound to another role.
    RoleChanged,
    Idle,
}

impl LogoutCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutCause::Revoked => "revoked",
            LogoutCause::Invalidated => "invalidated",
            LogoutCause::RoleChanged => "role_changed",
            LogoutCause::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn {
        role: Role,
    },
    Renewed {
        role: Option<Role>,
    },
    Terminated {
        role: Role,
        cause: LogoutCause,
        reason: String,
        redirect: String,
    },
    LoggedOut {
        role: Role,
        redirect: String,
    },
}

impl SessionEvent {
    /// True when this event ends the session held for `role`.
    pub fn ends(&self, role: Role) -> bool {
        match self {
            SessionEvent::Terminated { role: ended, .. } | SessionEvent::LoggedOut { role: ended, .. } => {
                *ended == role
            }
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct SessionTerminator {
    inner: Arc<TerminatorInner>,
}

struct TerminatorInner {
    store: Arc<CredentialStore>,
    api: Arc<dyn SessionApi>,
    routes: PortalRoutes,
    metrics: Arc<SessionMetrics>,
    events: broadcast::Sender<SessionEvent>,
    // Roles already torn down during the current navigation.
    fired: Mutex<HashSet<Role>>,
}

impl SessionTerminator {
    pub fn new(
        store: Arc<CredentialStore>,
        api: Arc<dyn SessionApi>,
        routes: PortalRoutes,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            inner: Arc::new(TerminatorInner {
                store,
                api,
                routes,
                metrics,
                events,
                fired: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn announce(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// A fresh login starts a new navigation for `role`.
    pub fn begin_navigation(&self, role: Role) {
        let mut guard = self.inner.fired.lock().expect("terminator lock poisoned");
        guard.remove(&role);
    }

    /// Tear down `role` locally, fire the remote teardown calls, leave `reason`
    /// for the next login screen and announce the redirect.
    ///
    /// Runs at most once per navigation; returns whether this call did the work.
    pub fn force_logout(&self, role: Role, cause: LogoutCause, reason: &str) -> bool {
        // Only a call that finds a session may claim the navigation's guard.
        let Some(token) = self.inner.store.token(role) else {
            debug!(%role, cause = cause.as_str(), "no live session; nothing to terminate");
            return false;
        };
        {
            let mut guard = self.inner.fired.lock().expect("terminator lock poisoned");
            if !guard.insert(role) {
                debug!(%role, cause = cause.as_str(), "forced logout already ran this navigation");
                return false;
            }
        }

        // Local clearance first and unconditionally.
        if let Err(err) = self.inner.store.terminate(role, reason) {
            warn!(?err, %role, "failed to clear terminated session");
        }
        if role.is_admin() || cause == LogoutCause::Idle {
            let notice = LogoutNotice {
                role,
                message: reason.to_string(),
            };
            if let Err(err) = self.inner.store.set_notice(&notice) {
                warn!(?err, %role, "failed to record logout notice");
            }
        }
        self.spawn_teardown(role, Some(token));

        self.inner.metrics.forced_logout(role.as_str(), cause.as_str());
        let redirect = self.inner.routes.login_for(role).to_string();
        warn!(%role, cause = cause.as_str(), reason, %redirect, "session terminated");
        self.announce(SessionEvent::Terminated {
            role,
            cause,
            reason: reason.to_string(),
            redirect,
        });
        true
    }

    /// Explicit logout: same teardown calls, no notice.
    pub fn logout(&self, role: Role) {
        let token = self.inner.store.token(role);
        if let Err(err) = self.inner.store.clear(Scope::Role(role)) {
            warn!(?err, %role, "failed to clear session on logout");
        }
        self.spawn_teardown(role, token);
        let redirect = self.inner.routes.login_for(role).to_string();
        info!(%role, "logged out");
        self.announce(SessionEvent::LoggedOut { role, redirect });
    }

    // Fire-and-forget: presence clear for admins, then the cookie session.
    fn spawn_teardown(&self, role: Role, token: Option<String>) {
        let api = self.inner.api.clone();
        tokio::spawn(async move {
            if let (true, Some(token)) = (role.is_admin(), token) {
                if let Err(err) = api.admin_logout(&token).await {
                    debug!(%err, %role, "admin presence teardown failed");
                }
            }
            if let Err(err) = api.logout().await {
                debug!(%err, %role, "session teardown failed");
            }
        });
    }
}

/// Resolve once `role`'s session ends or the event source goes away.
pub async fn session_ended(events: &mut broadcast::Receiver<SessionEvent>, role: Role) {
    loop {
        match events.recv().await {
            Ok(event) if event.ends(role) => return,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "session events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
