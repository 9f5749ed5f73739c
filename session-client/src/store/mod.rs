//! Role-scoped credential persistence across two durability tiers.
//!
//! Each role owns one slot per tier holding a [`SessionRecord`] as JSON. The
//! user role's token is mirrored into a generic session slot, so one physical
//! token may live in several slots at once; renewal swaps it everywhere by
//! value. The active-role marker and the logout notice live only in the
//! tab-scoped tier.

mod tier;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common_auth::{has_jwt_shape, role_hint, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::lifecycle::SessionLifecycle;

pub use tier::{FileTier, MemoryTier, StorageTier};

const GENERIC_TOKEN_KEY: &str = "session.token";
const ACTIVE_ROLE_KEY: &str = "active_role";
const LOGOUT_NOTICE_KEY: &str = "logout_notice";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("failed to (de)serialize stored session: {0}")]
    Serialization(String),
    #[error("token is not three non-empty dot-separated segments")]
    MalformedToken,
    #[error("credential for {credential} cannot be stored in the {slot} slot")]
    SlotMismatch { slot: Role, credential: Role },
    #[error("{0} session was cleared; renewal discarded")]
    SlotCleared(Role),
    #[error("no slot holds the renewed token")]
    NoMatchingSlot,
    #[error("no session held for {0}")]
    NoSession(Role),
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Survives a restart.
    Durable,
    /// Scoped to the current tab.
    Tab,
}

impl Tier {
    fn other(self) -> Tier {
        match self {
            Tier::Durable => Tier::Tab,
            Tier::Tab => Tier::Durable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub role: Role,
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(role: Role, access_token: impl Into<String>) -> Self {
        Self {
            role,
            access_token: access_token.into(),
            issued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub credential: Credential,
    pub profile: Option<Value>,
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    token: String,
    issued_at: DateTime<Utc>,
    #[serde(default)]
    profile: Option<Value>,
}

/// Reason shown on the next login screen after a forced logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutNotice {
    pub role: Role,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Role(Role),
    All,
}

pub struct CredentialStore {
    durable: Arc<dyn StorageTier>,
    tab: Arc<dyn StorageTier>,
    lifecycle: SessionLifecycle,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn StorageTier>, tab: Arc<dyn StorageTier>) -> Self {
        Self {
            durable,
            tab,
            lifecycle: SessionLifecycle::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTier::new()), Arc::new(MemoryTier::new()))
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    /// Store a freshly issued credential, overwriting whatever the slot held.
    pub fn put(
        &self,
        role: Role,
        tier: Tier,
        credential: Credential,
        profile: Option<Value>,
    ) -> StoreResult<()> {
        if credential.role != role {
            return Err(StoreError::SlotMismatch {
                slot: role,
                credential: credential.role,
            });
        }
        if !has_jwt_shape(&credential.access_token) {
            return Err(StoreError::MalformedToken);
        }

        let record = SessionRecord {
            token: credential.access_token.clone(),
            issued_at: credential.issued_at,
            profile,
        };
        let key = slot_key(role);
        self.tier(tier).write(&key, serde_json::to_string(&record)?)?;
        self.tier(tier.other()).remove(&key)?;
        if role == Role::User {
            self.tier(tier).write(GENERIC_TOKEN_KEY, credential.access_token)?;
            self.tier(tier.other()).remove(GENERIC_TOKEN_KEY)?;
        }

        self.lifecycle.authenticated(role);
        debug!(%role, ?tier, "stored credential");
        Ok(())
    }

    /// Session for `role`, durable tier first. Anything failing validation is
    /// purged on the spot and reported as absent.
    pub fn get(&self, role: Role) -> Option<Session> {
        let key = slot_key(role);
        for tier in [Tier::Durable, Tier::Tab] {
            let storage = self.tier(tier);
            let Some(raw) = storage.read(&key) else {
                continue;
            };
            match validate_record(role, &raw) {
                Ok(record) => {
                    return Some(Session {
                        credential: Credential {
                            role,
                            access_token: record.token,
                            issued_at: record.issued_at,
                        },
                        profile: record.profile,
                        tier,
                    })
                }
                Err(reason) => {
                    warn!(%role, ?tier, reason, "purging invalid stored credential");
                    if let Err(err) = storage.remove(&key) {
                        warn!(?err, %role, "failed to purge invalid credential");
                    }
                }
            }
        }
        None
    }

    pub fn token(&self, role: Role) -> Option<String> {
        self.get(role).map(|session| session.credential.access_token)
    }

    /// Token in the generic session slot, if structurally valid.
    pub fn generic_token(&self) -> Option<String> {
        for tier in [Tier::Durable, Tier::Tab] {
            let storage = self.tier(tier);
            let Some(token) = storage.read(GENERIC_TOKEN_KEY) else {
                continue;
            };
            if has_jwt_shape(&token) {
                return Some(token);
            }
            warn!(?tier, "purging malformed generic session token");
            if let Err(err) = storage.remove(GENERIC_TOKEN_KEY) {
                warn!(?err, "failed to purge generic session token");
            }
        }
        None
    }

    /// Role whose slot currently holds exactly `token`.
    pub fn role_of_token(&self, token: &str) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|role| self.token(*role).as_deref() == Some(token))
    }

    /// Roles holding a session, the active role first.
    pub fn held_roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|role| self.get(*role).is_some())
            .collect();
        if let Some(active) = self.active_role() {
            roles.retain(|role| *role != active);
            roles.insert(0, active);
        }
        roles
    }

    pub fn clear(&self, scope: Scope) -> StoreResult<()> {
        match scope {
            Scope::Role(role) => self.clear_role(role),
            Scope::All => {
                for role in Role::ALL {
                    self.clear_role(role)?;
                }
                self.tab.remove(ACTIVE_ROLE_KEY)
            }
        }
    }

    /// Clear `role` and mark it terminated so in-flight renewals cannot
    /// resurrect it.
    pub fn terminate(&self, role: Role, reason: &str) -> StoreResult<()> {
        self.lifecycle.terminated(role, reason);
        self.clear_role(role)
    }

    fn clear_role(&self, role: Role) -> StoreResult<()> {
        let key = slot_key(role);
        self.durable.remove(&key)?;
        self.tab.remove(&key)?;
        if role == Role::User {
            self.durable.remove(GENERIC_TOKEN_KEY)?;
            self.tab.remove(GENERIC_TOKEN_KEY)?;
        }
        if self.raw_active_role() == Some(role) {
            self.tab.remove(ACTIVE_ROLE_KEY)?;
        }
        self.lifecycle.signed_out(role);
        debug!(%role, "cleared credential");
        Ok(())
    }

    pub fn set_active_role(&self, role: Role) -> StoreResult<()> {
        if self.get(role).is_none() {
            return Err(StoreError::NoSession(role));
        }
        self.tab.write(ACTIVE_ROLE_KEY, role.as_str().to_string())
    }

    /// Role in focus. A marker naming a role without a session is dropped.
    pub fn active_role(&self) -> Option<Role> {
        let role = self.raw_active_role()?;
        if self.get(role).is_some() {
            return Some(role);
        }
        debug!(%role, "dropping stale active-role marker");
        if let Err(err) = self.tab.remove(ACTIVE_ROLE_KEY) {
            warn!(?err, "failed to drop stale active-role marker");
        }
        None
    }

    fn raw_active_role(&self) -> Option<Role> {
        self.tab
            .read(ACTIVE_ROLE_KEY)
            .and_then(|raw| raw.parse::<Role>().ok())
    }

    /// Swap the literal token `old` for `new` in every slot holding it.
    /// Returns how many slots changed.
    ///
    /// Slots whose role differs from the role `new` claims are left alone.
    pub fn replace_everywhere(&self, old: &str, new: &str) -> StoreResult<usize> {
        let claimed = role_hint(new);
        let fits = |role: Role| claimed.map_or(true, |claimed| claimed == role);
        let mut replaced = 0;
        for tier in [Tier::Durable, Tier::Tab] {
            let storage = self.tier(tier);
            if fits(Role::User) && storage.read(GENERIC_TOKEN_KEY).as_deref() == Some(old) {
                storage.write(GENERIC_TOKEN_KEY, new.to_string())?;
                replaced += 1;
            }
            for role in Role::ALL.into_iter().filter(|role| fits(*role)) {
                let key = slot_key(role);
                let Some(raw) = storage.read(&key) else {
                    continue;
                };
                let Ok(mut record) = serde_json::from_str::<SessionRecord>(&raw) else {
                    continue;
                };
                if record.token != old {
                    continue;
                }
                record.token = new.to_string();
                record.issued_at = Utc::now();
                storage.write(&key, serde_json::to_string(&record)?)?;
                replaced += 1;
            }
        }
        Ok(replaced)
    }

    /// Persist a renewed token in place of `old`.
    ///
    /// Rejected when `role` was terminated or cleared meanwhile, so a renewal
    /// that settles after a forced logout never brings the session back.
    pub fn apply_renewal(&self, old: &str, new: &str, role: Option<Role>) -> StoreResult<usize> {
        if !has_jwt_shape(new) {
            return Err(StoreError::MalformedToken);
        }
        if let Some(role) = role {
            if self.lifecycle.state(role).is_terminated() {
                return Err(StoreError::SlotCleared(role));
            }
            if let Some(credential) = role_hint(new).filter(|claimed| *claimed != role) {
                return Err(StoreError::SlotMismatch {
                    slot: role,
                    credential,
                });
            }
        }

        let replaced = self.replace_everywhere(old, new)?;
        if replaced > 0 {
            return Ok(replaced);
        }

        // The slot moved on (another renewal or a re-login) but still exists.
        let Some(role) = role else {
            return Err(StoreError::NoMatchingSlot);
        };
        let Some(session) = self.get(role) else {
            return Err(StoreError::SlotCleared(role));
        };
        self.replace_everywhere(&session.credential.access_token, new)
    }

    pub fn set_notice(&self, notice: &LogoutNotice) -> StoreResult<()> {
        self.tab
            .write(LOGOUT_NOTICE_KEY, serde_json::to_string(notice)?)
    }

    /// Consume the pending logout notice, if any.
    pub fn take_notice(&self) -> Option<LogoutNotice> {
        let raw = self.tab.read(LOGOUT_NOTICE_KEY)?;
        if let Err(err) = self.tab.remove(LOGOUT_NOTICE_KEY) {
            warn!(?err, "failed to clear logout notice");
        }
        serde_json::from_str(&raw).ok()
    }

    fn tier(&self, tier: Tier) -> &dyn StorageTier {
        match tier {
            Tier::Durable => self.durable.as_ref(),
            Tier::Tab => self.tab.as_ref(),
        }
    }
}

fn slot_key(role: Role) -> String {
    format!("{}.session", role.as_str())
}

fn validate_record(role: Role, raw: &str) -> Result<SessionRecord, &'static str> {
    let record: SessionRecord = serde_json::from_str(raw).map_err(|_| "unparseable record")?;
    if !has_jwt_shape(&record.token) {
        return Err("malformed token");
    }
    // Undecodable claims fail open; only a decoded, different role is rejected.
    match role_hint(&record.token) {
        Some(embedded) if embedded != role => Err("embedded role does not match slot"),
        _ => Ok(record),
    }
}
