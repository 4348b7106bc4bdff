//! Connection lifecycle: constructing a generation and reacting to its events.
//!
//! [`transition`] is a pure state-machine step: it mutates the entry and
//! returns the [`Effect`]s to run. [`LifecycleController::execute`] runs the
//! immediate ones; delayed recovery is handed back to the registry, which
//! owns restarting a session.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    switchboard_config::SessionsConfig,
    switchboard_protocol::{
        CloseCause, CloseReason, ConnectParams, Connection, Connector, LinkState, ProtocolEvent,
        ProtocolVersion,
    },
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use crate::{
    entry::{SessionEntry, SessionHandle, SessionSlot, SessionState},
    error::{Result, SessionError},
    notify::{InactiveReason, Notifier, SessionEvent, SessionStatus},
    readiness::ReadinessGate,
    snapshot::{AuthSnapshotMirror, RestoreOutcome},
    store::SnapshotStatus,
};

/// Reasons after which the stored credentials are useless.
const TERMINAL_REASONS: &[CloseReason] = &[CloseReason::LoggedOut, CloseReason::Forbidden];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Credentials revoked: purge and pair again.
    Terminal,
    /// Anything else: keep credentials and reconnect.
    Transient,
}

pub fn classify(cause: &CloseCause) -> CloseClass {
    if TERMINAL_REASONS.contains(&cause.reason) {
        CloseClass::Terminal
    } else {
        CloseClass::Transient
    }
}

/// Error a waiter sees when the generation it waited on closed.
pub fn close_error(session_id: &str, cause: CloseCause) -> SessionError {
    let id = session_id.to_string();
    match classify(&cause) {
        CloseClass::Terminal => SessionError::TerminalAuth { id, cause },
        CloseClass::Transient => SessionError::TransientClose { id, cause },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    /// Reconnect with the stored credentials after the backoff.
    Reconnect,
    /// Purge credentials after the grace period, then pair again.
    Relogin,
}

/// Delayed recovery scheduled by the registry. No-ops if `generation` is no
/// longer current when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    pub kind: RecoveryKind,
    pub generation: u64,
    pub delay: Duration,
}

/// Side effect produced by [`transition`].
#[derive(Debug)]
pub enum Effect {
    OpenGate(Arc<ReadinessGate>),
    FailGate(Arc<ReadinessGate>, SessionError),
    Emit(SessionEvent),
    Status(SessionStatus, Option<CloseCause>),
    Backup(SnapshotStatus),
    Recover {
        kind: RecoveryKind,
        generation: u64,
    },
}

/// Apply `event`, tagged with the generation that produced it, to `entry`.
///
/// Events from any generation other than the entry's current one are
/// dropped, as are duplicate opens and closes.
pub fn transition(entry: &mut SessionEntry, generation: u64, event: &ProtocolEvent) -> Vec<Effect> {
    if generation != entry.generation {
        debug!(
            session_id = %entry.id,
            event_generation = generation,
            current = entry.generation,
            "ignoring event from superseded generation"
        );
        return Vec::new();
    }

    match event {
        ProtocolEvent::CredentialsUpdated => {
            let status = if entry.state == SessionState::Open {
                SnapshotStatus::Active
            } else {
                SnapshotStatus::Inactive
            };
            vec![Effect::Backup(status)]
        },
        ProtocolEvent::QrChallenge(code) => {
            if entry.state != SessionState::Connecting {
                debug!(session_id = %entry.id, state = ?entry.state, "ignoring pairing challenge");
                return Vec::new();
            }
            vec![
                Effect::Emit(SessionEvent::Qr {
                    session_id: entry.id.clone(),
                    code: code.clone(),
                }),
                Effect::Status(SessionStatus::WaitingQr, None),
            ]
        },
        ProtocolEvent::ConnectionStateChanged {
            state: LinkState::Connecting,
            ..
        } => Vec::new(),
        ProtocolEvent::ConnectionStateChanged {
            state: LinkState::Open,
            ..
        } => on_open(entry),
        ProtocolEvent::ConnectionStateChanged {
            state: LinkState::Close,
            cause,
        } => {
            let cause = cause
                .clone()
                .unwrap_or_else(|| CloseCause::new(CloseReason::Unknown, "closed without a cause"));
            on_close(entry, cause)
        },
    }
}

fn on_open(entry: &mut SessionEntry) -> Vec<Effect> {
    if entry.state != SessionState::Connecting {
        debug!(session_id = %entry.id, state = ?entry.state, "ignoring open");
        return Vec::new();
    }
    entry.state = SessionState::Open;
    entry.last_close_cause = None;
    info!(session_id = %entry.id, generation = entry.generation, "session open");

    let mut effects = Vec::with_capacity(4);
    if let Some(gate) = entry.readiness.take() {
        effects.push(Effect::OpenGate(gate));
    }
    effects.push(Effect::Emit(SessionEvent::Active {
        session_id: entry.id.clone(),
    }));
    effects.push(Effect::Status(SessionStatus::Connected, None));
    effects.push(Effect::Backup(SnapshotStatus::Active));
    effects
}

fn on_close(entry: &mut SessionEntry, cause: CloseCause) -> Vec<Effect> {
    if matches!(entry.state, SessionState::Closed | SessionState::Idle) {
        debug!(session_id = %entry.id, %cause, "ignoring duplicate close");
        return Vec::new();
    }
    let class = classify(&cause);
    match class {
        CloseClass::Terminal => {
            warn!(session_id = %entry.id, generation = entry.generation, %cause, "session logged out")
        },
        CloseClass::Transient => {
            info!(session_id = %entry.id, generation = entry.generation, %cause, "session closed")
        },
    }

    entry.state = SessionState::Closed;
    entry.handle = None;
    entry.last_close_cause = Some(cause.clone());

    let mut effects = Vec::with_capacity(5);
    if let Some(gate) = entry.readiness.take() {
        effects.push(Effect::FailGate(gate, close_error(&entry.id, cause.clone())));
    }
    effects.push(Effect::Status(SessionStatus::Inactive, Some(cause)));
    match class {
        CloseClass::Terminal => {
            entry.relogin_pending = true;
            effects.push(Effect::Recover {
                kind: RecoveryKind::Relogin,
                generation: entry.generation,
            });
        },
        CloseClass::Transient => {
            effects.push(Effect::Backup(SnapshotStatus::Inactive));
            effects.push(Effect::Emit(SessionEvent::Inactive {
                session_id: entry.id.clone(),
                reason: InactiveReason::ConnectionClosed,
            }));
            effects.push(Effect::Recover {
                kind: RecoveryKind::Reconnect,
                generation: entry.generation,
            });
        },
    }
    effects
}

// ── Controller ──────────────────────────────────────────────────────

/// Timing and identity settings for connection construction.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub auth_dir: PathBuf,
    pub warmup: Duration,
    pub ready_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub logout_grace: Duration,
    pub connect_timeout: Duration,
    pub protocol_version: Option<String>,
    pub browser: Vec<String>,
}

impl From<&SessionsConfig> for LifecycleSettings {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            auth_dir: config.auth_dir.clone(),
            warmup: config.warmup(),
            ready_timeout: config.ready_timeout(),
            reconnect_backoff: config.reconnect_backoff(),
            logout_grace: config.logout_grace(),
            connect_timeout: config.connect_timeout(),
            protocol_version: config.protocol_version.clone(),
            browser: config.browser.clone(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

/// A generation whose connection object exists but may not be open yet.
pub(crate) struct Started {
    pub generation: u64,
    pub events: mpsc::UnboundedReceiver<ProtocolEvent>,
}

/// Builds connection generations and runs their effects.
pub struct LifecycleController {
    connector: Arc<dyn Connector>,
    mirror: AuthSnapshotMirror,
    notifier: Arc<dyn Notifier>,
    settings: LifecycleSettings,
}

impl LifecycleController {
    pub fn new(
        connector: Arc<dyn Connector>,
        mirror: AuthSnapshotMirror,
        notifier: Arc<dyn Notifier>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            connector,
            mirror,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn mirror(&self) -> &AuthSnapshotMirror {
        &self.mirror
    }

    pub fn credentials_dir(&self, session_id: &str) -> PathBuf {
        self.settings.auth_dir.join(session_id)
    }

    /// Begin a new generation: Idle/Closed → Connecting, restore credentials
    /// and construct the connection.
    pub(crate) async fn start(&self, slot: &SessionSlot) -> Result<Started> {
        let id = slot.id();
        let (generation, stale, relogin) = {
            let mut entry = slot.entry();
            entry.generation += 1;
            entry.state = SessionState::Connecting;
            let gate = ReadinessGate::new(entry.generation);
            if let Some(prev) = entry.readiness.replace(gate) {
                prev.fail(SessionError::Superseded {
                    id: id.to_string(),
                    generation: prev.generation(),
                });
            }
            let relogin = std::mem::take(&mut entry.relogin_pending);
            (entry.generation, entry.handle.take(), relogin)
        };
        info!(session_id = id, generation, backend = self.connector.name(), "connecting");

        // At most one live connection per session.
        if let Some(stale) = stale {
            debug!(session_id = id, stale_generation = stale.generation(), "closing previous connection");
            if let Err(e) = stale.close().await {
                debug!(session_id = id, error = %e, "close of previous connection failed");
            }
        }
        if relogin {
            self.purge_credentials(id).await;
        }

        let connection = match self.open_connection(id).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(session_id = id, generation, error = %e, "connection construction failed");
                let current = {
                    let mut entry = slot.entry();
                    let current = entry.generation == generation;
                    if current {
                        entry.state = SessionState::Closed;
                        entry.last_close_cause = None;
                        if let Some(gate) = entry.readiness.take() {
                            gate.fail(e.clone());
                        }
                    }
                    current
                };
                if current {
                    self.notifier.status(id, SessionStatus::Inactive, None);
                }
                return Err(e);
            },
        };

        let Connection { handle, events } = connection;
        let installed = {
            let mut entry = slot.entry();
            if entry.generation == generation {
                entry.handle = Some(SessionHandle::new(id, generation, Arc::clone(&handle)));
                true
            } else {
                false
            }
        };
        if !installed {
            debug!(session_id = id, generation, "superseded during construction, closing");
            if let Err(e) = handle.close().await {
                debug!(session_id = id, error = %e, "close of superseded connection failed");
            }
            return Err(SessionError::Superseded {
                id: id.to_string(),
                generation,
            });
        }

        Ok(Started { generation, events })
    }

    async fn open_connection(&self, id: &str) -> Result<Connection> {
        let dir = self.credentials_dir(id);
        match self.mirror.restore(id, &dir).await? {
            RestoreOutcome::Restored { files } => {
                info!(session_id = id, files, "restored credentials from snapshot")
            },
            outcome => debug!(session_id = id, ?outcome, "no restore needed"),
        }
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            SessionError::Store(format!("failed to create {}: {e}", dir.display()))
        })?;

        let version = match &self.settings.protocol_version {
            Some(v) => ProtocolVersion(v.clone()),
            None => self
                .connector
                .latest_version()
                .await
                .map_err(|e| SessionError::protocol(id, e))?,
        };
        debug!(session_id = id, version = %version.0, "resolved protocol version");

        self.connector
            .connect(ConnectParams {
                session_id: id.to_string(),
                version,
                credentials_dir: dir,
                browser: self.settings.browser.clone(),
                connect_timeout: self.settings.connect_timeout,
            })
            .await
            .map_err(|e| SessionError::protocol(id, e))
    }

    /// Run one effect. Delayed recovery comes back to the caller.
    pub async fn execute(&self, session_id: &str, effect: Effect) -> Option<Recovery> {
        match effect {
            Effect::OpenGate(gate) => gate.open(),
            Effect::FailGate(gate, error) => gate.fail(error),
            Effect::Emit(event) => self.notifier.emit(event),
            Effect::Status(status, cause) => self.notifier.status(session_id, status, cause.as_ref()),
            Effect::Backup(status) => {
                let dir = self.credentials_dir(session_id);
                if let Err(e) = self.mirror.backup(session_id, &dir, status).await {
                    warn!(session_id, error = %e, "credential backup failed");
                }
            },
            Effect::Recover { kind, generation } => {
                let delay = match kind {
                    RecoveryKind::Reconnect => self.settings.reconnect_backoff,
                    RecoveryKind::Relogin => self.settings.logout_grace,
                };
                return Some(Recovery {
                    kind,
                    generation,
                    delay,
                });
            },
        }
        None
    }

    /// Drop local and durable credentials after a logout. Runs at the start
    /// of the next construction, whoever triggers it.
    pub async fn purge_credentials(&self, session_id: &str) {
        let dir = self.credentials_dir(session_id);
        if let Err(e) = self.mirror.purge(session_id, &dir).await {
            warn!(session_id, error = %e, "failed to purge credentials");
        }
        self.notifier.emit(SessionEvent::Inactive {
            session_id: session_id.to_string(),
            reason: InactiveReason::LoggedOut,
        });
    }
}
