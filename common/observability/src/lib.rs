use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct SessionMetrics {
    pub registry: Registry,
    pub refresh_total: IntCounterVec,
    pub request_retries_total: IntCounterVec,
    pub heartbeat_total: IntCounterVec,
    pub forced_logout_total: IntCounterVec,
}

impl SessionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let refresh_total = IntCounterVec::new(
            Opts::new(
                "session_refresh_total",
                "Credential renewal network calls grouped by outcome",
            ),
            &["outcome"],
        )?;
        let request_retries_total = IntCounterVec::new(
            Opts::new(
                "session_request_retries_total",
                "Requests reissued after an authorization failure, grouped by outcome",
            ),
            &["outcome"],
        )?;
        let heartbeat_total = IntCounterVec::new(
            Opts::new(
                "session_heartbeat_total",
                "Administrator liveness calls grouped by outcome",
            ),
            &["outcome"],
        )?;
        let forced_logout_total = IntCounterVec::new(
            Opts::new(
                "session_forced_logout_total",
                "Sessions torn down without an explicit logout",
            ),
            &["role", "cause"],
        )?;
        registry.register(Box::new(refresh_total.clone()))?;
        registry.register(Box::new(request_retries_total.clone()))?;
        registry.register(Box::new(heartbeat_total.clone()))?;
        registry.register(Box::new(forced_logout_total.clone()))?;
        Ok(SessionMetrics { registry, refresh_total, request_retries_total, heartbeat_total, forced_logout_total })
    }

    pub fn refresh(&self, outcome: &str) {
        self.refresh_total.with_label_values(&[outcome]).inc();
    }

    pub fn retry(&self, outcome: &str) {
        self.request_retries_total.with_label_values(&[outcome]).inc();
    }

    pub fn heartbeat(&self, outcome: &str) {
        self.heartbeat_total.with_label_values(&[outcome]).inc();
    }

    pub fn forced_logout(&self, role: &str, cause: &str) {
        self.forced_logout_total.with_label_values(&[role, cause]).inc();
    }

    /// Text exposition of everything registered.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = SessionMetrics::new().expect("metrics");
        metrics.refresh("success");
        metrics.forced_logout("village_admin", "revoked");

        let text = metrics.render().expect("render");
        assert!(text.contains("session_refresh_total{outcome=\"success\"} 1"));
        assert!(text.contains("session_forced_logout_total"));
    }
}
