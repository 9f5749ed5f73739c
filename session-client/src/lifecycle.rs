use std::collections::HashMap;
use std::sync::RwLock;

use common_auth::Role;
use tracing::debug;

/// Per-role session state.
///
/// `Terminated` is absorbing: only a fresh login leaves it, never a renewal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated,
    Refreshing,
    Terminated(String),
}

impl SessionState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionState::Terminated(_))
    }
}

#[derive(Debug, Default)]
pub struct SessionLifecycle {
    states: RwLock<HashMap<Role, SessionState>>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, role: Role) -> SessionState {
        let guard = self.states.read().expect("lifecycle lock poisoned");
        guard.get(&role).cloned().unwrap_or_default()
    }

    /// Fresh login; the only way out of `Terminated`.
    pub fn authenticated(&self, role: Role) {
        self.set(role, SessionState::Authenticated);
    }

    /// `Authenticated → Refreshing`. Returns false from any other state.
    pub fn begin_refresh(&self, role: Role) -> bool {
        let mut guard = self.states.write().expect("lifecycle lock poisoned");
        let entry = guard.entry(role).or_default();
        if *entry == SessionState::Authenticated {
            *entry = SessionState::Refreshing;
            true
        } else {
            debug!(%role, state = ?entry, "refresh not started from current state");
            false
        }
    }

    /// `Refreshing → Authenticated`, whatever the renewal outcome. A role
    /// terminated while the renewal was in flight stays terminated.
    pub fn end_refresh(&self, role: Role) {
        let mut guard = self.states.write().expect("lifecycle lock poisoned");
        if let Some(entry) = guard.get_mut(&role) {
            if *entry == SessionState::Refreshing {
                *entry = SessionState::Authenticated;
            }
        }
    }

    pub fn terminated(&self, role: Role, reason: impl Into<String>) {
        self.set(role, SessionState::Terminated(reason.into()));
    }

    /// Explicit logout; a recorded termination is kept so its reason survives.
    pub fn signed_out(&self, role: Role) {
        let mut guard = self.states.write().expect("lifecycle lock poisoned");
        let entry = guard.entry(role).or_default();
        if !entry.is_terminated() {
            *entry = SessionState::Anonymous;
        }
    }

    fn set(&self, role: Role, state: SessionState) {
        let mut guard = self.states.write().expect("lifecycle lock poisoned");
        guard.insert(role, state);
    }
}
