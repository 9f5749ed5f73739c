pub mod activity;
pub mod api;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod inactivity;
pub mod interceptor;
pub mod invalidation;
pub mod lifecycle;
pub mod manager;
pub mod refresh;
pub mod store;
pub mod terminator;

pub use activity::{ActivitySource, ActivityTracker};
pub use api::{HeartbeatResult, HttpSessionApi, SessionApi};
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use heartbeat::LivenessHeartbeat;
pub use inactivity::InactivityMonitor;
pub use interceptor::{AuthorizedClient, SessionLayer, SessionService};
pub use invalidation::{
    parse_frame, subscribe_frame, ForcedInvalidationListener, InvalidationAction,
    InvalidationEvent, InvalidationHub, PushFeed, Subscription,
};
pub use lifecycle::{SessionLifecycle, SessionState};
pub use manager::SessionManager;
pub use refresh::RefreshCoordinator;
pub use store::{
    Credential, CredentialStore, FileTier, LogoutNotice, MemoryTier, Scope, Session, StorageTier,
    StoreError, Tier,
};
pub use terminator::{LogoutCause, SessionEvent, SessionTerminator};
