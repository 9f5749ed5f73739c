use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySource {
    Pointer,
    Click,
    Scroll,
    Key,
    /// A request/response cycle completed through the interceptor.
    Request,
}

/// Latest moment of observed activity, fanned out to idle monitors.
#[derive(Clone)]
pub struct ActivityTracker {
    tx: Arc<watch::Sender<Instant>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Instant::now());
        Self { tx: Arc::new(tx) }
    }

    pub fn record(&self, source: ActivitySource) {
        trace!(?source, "activity observed");
        self.tx.send_replace(Instant::now());
    }

    pub fn subscribe(&self) -> watch::Receiver<Instant> {
        self.tx.subscribe()
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
