use common_auth::Role;
use thiserror::Error;

use crate::store::StoreError;

pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced by the credential lifecycle.
///
/// Cloneable so that a single in-flight renewal can hand the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Network-level failure; background loops swallow it and retry next tick.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server ended the session; `reason` is shown on the next login.
    #[error("session for {role} revoked: {reason}")]
    Revoked { role: Role, reason: String },
    #[error("renewed credential is malformed")]
    MalformedRenewal,
    #[error("renewed credential role {received:?} does not match {expected}")]
    RoleMismatch { expected: Role, received: Option<Role> },
    #[error("renewal endpoint rejected the session with HTTP {0}")]
    RefreshRejected(u16),
    #[error("renewal task ended before settling: {0}")]
    RefreshAborted(String),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<reqwest::Error> for SessionError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}
