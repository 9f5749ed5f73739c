use std::time::Duration;

use common_auth::Role;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::terminator::{
    session_ended, LogoutCause, SessionEvent, SessionTerminator, IDLE_MESSAGE,
};

/// Idle deadline for one role, pushed back by every activity signal.
pub struct InactivityMonitor {
    role: Role,
    timeout: Duration,
    activity: watch::Receiver<Instant>,
    events: broadcast::Receiver<SessionEvent>,
    terminator: SessionTerminator,
}

impl InactivityMonitor {
    pub fn new(
        role: Role,
        timeout: Duration,
        activity: watch::Receiver<Instant>,
        terminator: SessionTerminator,
    ) -> Self {
        let events = terminator.subscribe();
        Self {
            role,
            timeout,
            activity,
            events,
            terminator,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut deadline = Instant::now() + self.timeout;
        let mut source_alive = true;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    info!(role = %self.role, timeout = ?self.timeout, "session idle; logging out");
                    self.terminator.force_logout(self.role, LogoutCause::Idle, IDLE_MESSAGE);
                    return;
                }
                changed = self.activity.changed(), if source_alive => {
                    if changed.is_err() {
                        source_alive = false;
                        continue;
                    }
                    let seen = *self.activity.borrow_and_update();
                    deadline = seen + self.timeout;
                }
                _ = session_ended(&mut self.events, self.role) => {
                    debug!(role = %self.role, "session ended elsewhere; idle monitor stopping");
                    return;
                }
            }
        }
    }
}
