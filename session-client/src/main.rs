use std::env;

use anyhow::{Context, Result};
use common_auth::{role_hint, Role};
use session_client::{SessionConfig, SessionEvent, SessionManager, Tier};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SessionConfig::from_env()?;
    info!(base_url = %config.base_url, store = %config.store_path.display(), "starting session agent");
    let manager = SessionManager::from_config(config)?;
    let mut events = manager.subscribe();

    if let Some(notice) = manager.take_logout_notice() {
        info!(role = %notice.role, message = %notice.message, "previous session ended");
    }

    match env::var("SESSION_BOOTSTRAP_TOKEN") {
        Ok(token) => {
            let role = match env::var("SESSION_BOOTSTRAP_ROLE") {
                Ok(raw) => raw
                    .parse::<Role>()
                    .with_context(|| format!("invalid SESSION_BOOTSTRAP_ROLE {raw:?}"))?,
                Err(_) => role_hint(&token)
                    .context("SESSION_BOOTSTRAP_ROLE unset and token carries no role")?,
            };
            manager
                .login(role, Tier::Durable, token, None)
                .context("failed to adopt bootstrap token")?;
        }
        Err(_) => {
            let resumed = manager.resume();
            if resumed.is_empty() {
                warn!("no stored session; set SESSION_BOOTSTRAP_TOKEN to start one");
            }
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Terminated { role, cause, reason, redirect }) => {
                    warn!(%role, cause = cause.as_str(), %reason, %redirect, "session terminated");
                }
                Ok(event) => info!(?event, "session event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "session events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    match manager.metrics().render() {
        Ok(rendered) => info!(metrics = %rendered, "final session metrics"),
        Err(err) => warn!(%err, "failed to render metrics"),
    }
    Ok(())
}
