use anyhow::{Context, Result};
use common_auth::{PortalRoutes, Role};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const HEARTBEAT_PATH: &str = "/api/auth/admins/heartbeat";
pub const ADMIN_LOGOUT_PATH: &str = "/api/auth/admins/logout";
pub const LOGOUT_PATH: &str = "/api/auth/logout";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub store_path: PathBuf,
    pub push_url: Option<String>,
    pub routes: PortalRoutes,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base(&base_url.into()),
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60 * 60),
            store_path: PathBuf::from(".portal-session.json"),
            push_url: None,
            routes: PortalRoutes::new(),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    pub fn from_env() -> Result<Self> {
        let base_url =
            env::var("PORTAL_API_BASE_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());
        let heartbeat_secs = env::var("SESSION_HEARTBEAT_SECONDS")
            .ok()
            .map(|value| value.trim().parse::<u64>())
            .transpose()
            .context("Failed to parse SESSION_HEARTBEAT_SECONDS")?
            .unwrap_or(30);
        let idle_minutes = env::var("SESSION_IDLE_TIMEOUT_MINUTES")
            .ok()
            .map(|value| value.trim().parse::<u64>())
            .transpose()
            .context("Failed to parse SESSION_IDLE_TIMEOUT_MINUTES")?
            .unwrap_or(60);
        let store_path = env::var("SESSION_STORE_PATH")
            .ok()
            .and_then(|value| normalize_optional(&value))
            .unwrap_or_else(|| ".portal-session.json".to_string());
        let push_url = env::var("SESSION_PUSH_URL")
            .ok()
            .and_then(|value| normalize_optional(&value));

        let mut routes = PortalRoutes::new();
        if let Some(path) = path_from_env("PORTAL_USER_LOGIN_PATH") {
            routes = routes.with_user_login(path);
        }
        if let Some(path) = path_from_env("PORTAL_ADMIN_LOGIN_PATH") {
            routes = routes.with_admin_login(path);
        }
        for (key, role) in [
            ("PORTAL_USER_HOME_PATH", Role::User),
            ("PORTAL_VILLAGE_ADMIN_HOME_PATH", Role::VillageAdmin),
            ("PORTAL_SUPER_ADMIN_HOME_PATH", Role::SuperAdmin),
        ] {
            if let Some(path) = path_from_env(key) {
                routes = routes.with_home(role, path);
            }
        }

        Ok(Self {
            base_url: normalize_base(&base_url),
            heartbeat_interval: Duration::from_secs(heartbeat_secs.max(5)),
            idle_timeout: Duration::from_secs(idle_minutes.max(1) * 60),
            store_path: PathBuf::from(store_path),
            push_url,
            routes,
        })
    }

    pub fn refresh_url(&self) -> String {
        format!("{}{REFRESH_PATH}", self.base_url)
    }

    pub fn heartbeat_url(&self) -> String {
        format!("{}{HEARTBEAT_PATH}", self.base_url)
    }

    pub fn admin_logout_url(&self) -> String {
        format!("{}{ADMIN_LOGOUT_PATH}", self.base_url)
    }

    pub fn logout_url(&self) -> String {
        format!("{}{LOGOUT_PATH}", self.base_url)
    }
}

fn normalize_base(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn path_from_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| normalize_optional(&value))
}
