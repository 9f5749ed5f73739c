//! Single-flight credential renewal.
//!
//! One pending-operation slot guards the renewal endpoint: the first caller
//! launches the network call on its own task, later callers clone the shared
//! handle and await the same outcome. The slot is cleared when the operation
//! settles, so a later failure can start a fresh attempt. The launched task
//! always runs to completion even if every caller goes away.
//!
//! No timeout wraps the renewal call; a hung endpoint stalls every waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use common_auth::{has_jwt_shape, role_hint, Role, UnverifiedClaims};
use common_observability::SessionMetrics;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::SessionApi;
use crate::error::{SessionError, SessionResult};
use crate::store::CredentialStore;
use crate::terminator::{LogoutCause, SessionEvent, SessionTerminator, DEFAULT_REVOKED_MESSAGE};

type Flight = Shared<BoxFuture<'static, SessionResult<String>>>;

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    api: Arc<dyn SessionApi>,
    store: Arc<CredentialStore>,
    terminator: SessionTerminator,
    metrics: Arc<SessionMetrics>,
    pending: Mutex<Option<(u64, Flight)>>,
    flights: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn SessionApi>,
        store: Arc<CredentialStore>,
        terminator: SessionTerminator,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                api,
                store,
                terminator,
                metrics,
                pending: Mutex::new(None),
                flights: AtomicU64::new(0),
            }),
        }
    }

    /// Renew the credential that `stale_token` was, joining any renewal
    /// already in flight. Resolves to the new access token.
    pub async fn refresh(&self, stale_token: &str) -> SessionResult<String> {
        let flight = {
            let mut slot = self.inner.pending.lock().expect("refresh slot poisoned");
            match slot.as_ref() {
                Some((id, flight)) => {
                    debug!(flight = id, "joining in-flight renewal");
                    flight.clone()
                }
                None => {
                    let id = self.inner.flights.fetch_add(1, Ordering::Relaxed) + 1;
                    let flight = self.launch(id, stale_token.to_string());
                    *slot = Some((id, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    pub fn in_flight(&self) -> bool {
        let slot = self.inner.pending.lock().expect("refresh slot poisoned");
        slot.is_some()
    }

    fn launch(&self, id: u64, stale_token: String) -> Flight {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.renew(&stale_token).await;
            inner.settle(id);
            result
        });
        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(SessionError::RefreshAborted(err.to_string())),
            }
        }
        .boxed()
        .shared()
    }
}

impl CoordinatorInner {
    fn settle(&self, id: u64) {
        let mut slot = self.pending.lock().expect("refresh slot poisoned");
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
    }

    async fn renew(&self, stale_token: &str) -> SessionResult<String> {
        // Undecodable old token: skip role-change detection, renew normally.
        let previous_role = UnverifiedClaims::decode(stale_token)
            .ok()
            .and_then(|claims| claims.role);
        let slot_role = self.store.role_of_token(stale_token).or(previous_role);

        if let Some(role) = slot_role {
            self.store.lifecycle().begin_refresh(role);
        }
        let result = self.exchange(stale_token, previous_role, slot_role).await;
        if let Some(role) = slot_role {
            self.store.lifecycle().end_refresh(role);
        }
        result
    }

    async fn exchange(
        &self,
        stale_token: &str,
        previous_role: Option<Role>,
        slot_role: Option<Role>,
    ) -> SessionResult<String> {
        let fresh = match self.api.refresh().await {
            Ok(token) => token,
            Err(err) => {
                self.metrics.refresh("failed");
                warn!(%err, "credential renewal failed");
                return Err(err);
            }
        };
        if !has_jwt_shape(&fresh) {
            self.metrics.refresh("malformed");
            return Err(SessionError::MalformedRenewal);
        }

        if let Some(expected) = previous_role.or(slot_role) {
            let received = role_hint(&fresh);
            // An admin token must prove its role; a user token without one is
            // accepted as is.
            let changed = match received {
                Some(role) => role != expected,
                None => expected.is_admin(),
            };
            if changed {
                self.metrics.refresh("role_changed");
                self.terminator
                    .force_logout(expected, LogoutCause::RoleChanged, DEFAULT_REVOKED_MESSAGE);
                return Err(SessionError::RoleMismatch { expected, received });
            }
        }

        match self.store.apply_renewal(stale_token, &fresh, slot_role) {
            Ok(slots) => {
                self.metrics.refresh("success");
                info!(role = ?slot_role, slots, "credential renewed");
                self.terminator.announce(SessionEvent::Renewed { role: slot_role });
                Ok(fresh)
            }
            Err(err) => {
                self.metrics.refresh("discarded");
                warn!(%err, role = ?slot_role, "renewed credential discarded");
                Err(err.into())
            }
        }
    }
}
