//! Notification channel and status callback.

use {
    base64::Engine,
    dashmap::DashMap,
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    switchboard_protocol::CloseCause,
    tokio::sync::broadcast,
    tracing::{debug, info},
};

/// Coarse status reported through the status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    WaitingQr,
    Connected,
    Inactive,
}

/// Reason attached to `session-inactive-<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveReason {
    LoggedOut,
    ConnectionClosed,
}

/// Event published on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Qr { session_id: String, code: String },
    Active { session_id: String },
    Inactive { session_id: String, reason: InactiveReason },
    Degraded { session_id: String, consecutive_cold_starts: u32 },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Qr { session_id, .. }
            | Self::Active { session_id }
            | Self::Inactive { session_id, .. }
            | Self::Degraded { session_id, .. } => session_id,
        }
    }

    /// Channel name, e.g. `qr-tenant1`.
    pub fn name(&self) -> String {
        let prefix = match self {
            Self::Qr { .. } => "qr",
            Self::Active { .. } => "session-active",
            Self::Inactive { .. } => "session-inactive",
            Self::Degraded { .. } => "session-degraded",
        };
        format!("{prefix}-{}", self.session_id())
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Qr { code, .. } => json!({ "qr": code, "image": render_qr_data_url(code) }),
            Self::Active { .. } => Value::Null,
            Self::Inactive { reason, .. } => json!({ "reason": reason }),
            Self::Degraded {
                consecutive_cold_starts,
                ..
            } => json!({ "consecutiveColdStarts": consecutive_cold_starts }),
        }
    }
}

/// Render a pairing code as an SVG data URL. `None` when the code does not
/// fit in a QR symbol.
pub fn render_qr_data_url(code: &str) -> Option<String> {
    let qr = qrcode::QrCode::new(code.as_bytes()).ok()?;
    let svg = qr
        .render::<qrcode::render::svg::Color<'_>>()
        .min_dimensions(256, 256)
        .build();
    let encoded = base64::engine::general_purpose::STANDARD.encode(svg);
    Some(format!("data:image/svg+xml;base64,{encoded}"))
}

/// Outbound notification boundary. Both calls are fire-and-forget.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: SessionEvent);

    fn status(&self, session_id: &str, status: SessionStatus, cause: Option<&CloseCause>);

    /// Most recent status reported for `session_id`, when tracked.
    fn last_status(&self, _session_id: &str) -> Option<SessionStatus> {
        None
    }
}

/// Serialized frame relayed to real-time subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EventFrame {
    pub event: String,
    pub payload: Value,
}

/// Notifier backed by a tokio broadcast channel.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<EventFrame>,
    last_status: DashMap<String, SessionStatus>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            last_status: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for BroadcastNotifier {
    fn emit(&self, event: SessionEvent) {
        let frame = EventFrame {
            event: event.name(),
            payload: event.payload(),
        };
        debug!(event = %frame.event, "notify");
        // No subscribers is fine.
        let _ = self.tx.send(frame);
    }

    fn status(&self, session_id: &str, status: SessionStatus, cause: Option<&CloseCause>) {
        match cause {
            Some(cause) => info!(session_id, ?status, %cause, "session status"),
            None => info!(session_id, ?status, "session status"),
        }
        self.last_status.insert(session_id.to_string(), status);
    }

    fn last_status(&self, session_id: &str) -> Option<SessionStatus> {
        self.last_status.get(session_id).map(|s| *s)
    }
}
