use std::{sync::Arc, time::Instant};

use switchboard_sessions::{BroadcastNotifier, SessionService};

/// Shared state behind every handler.
pub struct GatewayState {
    pub sessions: Arc<SessionService>,
    /// Same notifier the service reports into; `/api/events` subscribes here.
    pub events: Arc<BroadcastNotifier>,
    pub version: String,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(sessions: Arc<SessionService>, events: Arc<BroadcastNotifier>) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            events,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
