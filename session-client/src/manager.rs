//! Wires the session components together and owns their background tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use common_auth::{ensure_role, role_hint, subject_hint, GateDecision, Role};
use common_observability::SessionMetrics;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::activity::{ActivitySource, ActivityTracker};
use crate::api::{HttpSessionApi, SessionApi};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::heartbeat::LivenessHeartbeat;
use crate::inactivity::InactivityMonitor;
use crate::interceptor::{AuthorizedClient, SessionLayer};
use crate::invalidation::{ForcedInvalidationListener, InvalidationHub, PushFeed};
use crate::lifecycle::SessionState;
use crate::refresh::RefreshCoordinator;
use crate::store::{
    Credential, CredentialStore, FileTier, LogoutNotice, MemoryTier, Tier,
};
use crate::terminator::{SessionEvent, SessionTerminator};

const PUSH_BUFFER: usize = 16;

pub struct SessionManager {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    api: Arc<dyn SessionApi>,
    metrics: Arc<SessionMetrics>,
    activity: ActivityTracker,
    terminator: SessionTerminator,
    refresh: RefreshCoordinator,
    client: AuthorizedClient,
    hub: InvalidationHub,
    tasks: Mutex<HashMap<Role, Background>>,
}

// Tasks watching one role's session, plus the push identity they hold.
#[derive(Default)]
struct Background {
    handles: Vec<JoinHandle<()>>,
    identity: Option<String>,
}

impl SessionManager {
    /// File-backed durable tier, in-memory tab tier, HTTP endpoints from
    /// `config`.
    pub fn from_config(config: SessionConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;
        let durable = FileTier::open(&config.store_path).with_context(|| {
            format!("failed to open session store {}", config.store_path.display())
        })?;
        let store = Arc::new(CredentialStore::new(
            Arc::new(durable),
            Arc::new(MemoryTier::new()),
        ));
        let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(client.clone(), &config));
        Self::new(config, store, api, client)
    }

    pub fn new(
        config: SessionConfig,
        store: Arc<CredentialStore>,
        api: Arc<dyn SessionApi>,
        client: Client,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(SessionMetrics::new().context("failed to register session metrics")?);
        let activity = ActivityTracker::new();
        let terminator = SessionTerminator::new(
            store.clone(),
            api.clone(),
            config.routes.clone(),
            metrics.clone(),
        );
        let refresh = RefreshCoordinator::new(
            api.clone(),
            store.clone(),
            terminator.clone(),
            metrics.clone(),
        );
        let layer = SessionLayer::new(
            refresh.clone(),
            store.clone(),
            activity.clone(),
            metrics.clone(),
        );
        let client = AuthorizedClient::new(client, &layer, store.clone());

        Ok(Self {
            config,
            store,
            api,
            metrics,
            activity,
            terminator,
            refresh,
            client,
            hub: InvalidationHub::new(),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Adopt a token issued by the login exchange and start watching it.
    pub fn login(
        &self,
        role: Role,
        tier: Tier,
        token: impl Into<String>,
        profile: Option<Value>,
    ) -> SessionResult<()> {
        let token = token.into();
        if let Some(claimed) = role_hint(&token) {
            if claimed != role {
                return Err(SessionError::RoleMismatch {
                    expected: role,
                    received: Some(claimed),
                });
            }
        }

        self.store
            .put(role, tier, Credential::new(role, token), profile)?;
        self.store.set_active_role(role)?;
        self.terminator.begin_navigation(role);
        info!(%role, ?tier, "session started");
        self.terminator.announce(SessionEvent::LoggedIn { role });
        self.start_background(role);
        Ok(())
    }

    /// Pick up sessions persisted by an earlier run. Returns the roles resumed.
    pub fn resume(&self) -> Vec<Role> {
        let held = self.store.held_roles();
        for role in &held {
            self.store.lifecycle().authenticated(*role);
            self.terminator.begin_navigation(*role);
            self.start_background(*role);
        }
        if !held.is_empty() {
            info!(roles = ?held, "resumed stored sessions");
        }
        held
    }

    pub fn logout(&self, role: Role) {
        self.stop_background(role);
        self.terminator.logout(role);
    }

    /// Route guard: admit or redirect based on the sessions held right now.
    pub fn gate(&self, required: &[Role]) -> GateDecision {
        ensure_role(required, &self.store.held_roles(), &self.config.routes)
    }

    pub fn record_activity(&self, source: ActivitySource) {
        self.activity.record(source);
    }

    pub fn client(&self) -> &AuthorizedClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.terminator.subscribe()
    }

    pub fn state(&self, role: Role) -> SessionState {
        self.store.lifecycle().state(role)
    }

    /// Reason left by the last forced logout, consumed on read.
    pub fn take_logout_notice(&self) -> Option<LogoutNotice> {
        self.store.take_notice()
    }

    fn start_background(&self, role: Role) {
        self.stop_background(role);

        let mut background = Background::default();
        background.handles.push(
            InactivityMonitor::new(
                role,
                self.config.idle_timeout,
                self.activity.subscribe(),
                self.terminator.clone(),
            )
            .spawn(),
        );

        if role.is_admin() {
            background.handles.push(
                LivenessHeartbeat::new(
                    role,
                    self.config.heartbeat_interval,
                    self.api.clone(),
                    self.store.clone(),
                    self.terminator.clone(),
                    self.metrics.clone(),
                )
                .spawn(),
            );
            self.start_push(role, &mut background);
        }

        debug!(%role, tasks = background.handles.len(), "background session tasks started");
        self.tasks
            .lock()
            .expect("session tasks poisoned")
            .insert(role, background);
    }

    fn start_push(&self, role: Role, background: &mut Background) {
        let Some(url) = self.config.push_url.clone() else {
            return;
        };
        let Some(identity) = self.store.token(role).as_deref().and_then(subject_hint) else {
            debug!(%role, "no identity in token; push invalidation disabled");
            return;
        };
        let Some(subscription) = self.hub.register(&identity) else {
            debug!(%role, %identity, "identity already subscribed");
            return;
        };

        let (tx, rx) = mpsc::channel(PUSH_BUFFER);
        let listener =
            ForcedInvalidationListener::new(role, identity.clone(), self.terminator.clone());
        background.handles.push(tokio::spawn(listener.run(rx)));
        background
            .handles
            .push(tokio::spawn(PushFeed::new(url, subscription).run(tx)));
        background.identity = Some(identity);
    }

    // Aborting is asynchronous, so the push identity is released here rather
    // than when the aborted feed drops its subscription.
    fn stop_background(&self, role: Role) {
        let background = self
            .tasks
            .lock()
            .expect("session tasks poisoned")
            .remove(&role);
        let Some(background) = background else {
            return;
        };
        if let Some(identity) = &background.identity {
            self.hub.release(identity);
        }
        for handle in background.handles {
            handle.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain().flat_map(|(_, background)| background.handles) {
                handle.abort();
            }
        }
    }
}
