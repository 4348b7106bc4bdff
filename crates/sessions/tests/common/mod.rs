//! Scripted connector and recording notifier shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    switchboard_config::SessionsConfig,
    switchboard_protocol::{
        CloseCause, ConnectParams, Connection, ConnectionHandle, Connector, GroupSummary, Jid,
        MessageReceipt, OutboundContent, ProtocolError, ProtocolEvent, ProtocolVersion,
    },
    switchboard_sessions::{
        Notifier, SessionEvent, SessionService, SessionStatus, SnapshotStore, SqliteSnapshotStore,
    },
    tempfile::TempDir,
    tokio::sync::mpsc,
};

// ── Fake connection ─────────────────────────────────────────────────

pub struct FakeHandle {
    pub sent: Mutex<Vec<(Jid, OutboundContent)>>,
    /// Scripted outcomes for upcoming sends; `None` lets the send through.
    plan: Mutex<VecDeque<Option<ProtocolError>>>,
    pub closed: AtomicBool,
    events: mpsc::UnboundedSender<ProtocolEvent>,
}

impl FakeHandle {
    /// Make the next send fail with `error`.
    pub fn fail_next(&self, error: ProtocolError) {
        self.plan.lock().unwrap().push_back(Some(error));
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectionHandle for FakeHandle {
    async fn send(
        &self,
        to: &Jid,
        content: &OutboundContent,
    ) -> Result<MessageReceipt, ProtocolError> {
        if let Some(Some(error)) = self.plan.lock().unwrap().pop_front() {
            return Err(error);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::connection_closed());
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.clone(), content.clone()));
        Ok(MessageReceipt {
            message_id: format!("msg-{}", sent.len()),
            to: to.clone(),
        })
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupSummary>, ProtocolError> {
        Ok(vec![GroupSummary {
            id: "team@g.us".into(),
            name: "Team".into(),
            participants: 3,
        }])
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self
                .events
                .send(ProtocolEvent::closed(CloseCause::from_code(428, "closed by client")));
        }
        Ok(())
    }
}

/// One `connect` call: the handle it returned and a sender for scripting
/// further events on its stream.
pub struct FakeLink {
    pub handle: Arc<FakeHandle>,
    pub events: mpsc::UnboundedSender<ProtocolEvent>,
    pub params: ConnectParams,
}

impl FakeLink {
    pub fn emit(&self, event: ProtocolEvent) {
        self.events.send(event).unwrap();
    }
}

// ── Fake connector ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Script {
    /// Open automatically after this delay; `None` leaves it to the test.
    pub auto_open: Option<Duration>,
    /// Emit a QR challenge before anything else.
    pub qr_first: bool,
    /// Write `creds.json` and report a credential update before opening.
    pub write_creds: bool,
    /// Preloaded into every new handle's send plan.
    pub send_plan: Vec<Option<ProtocolError>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            auto_open: Some(Duration::from_millis(20)),
            qr_first: false,
            write_creds: true,
            send_plan: Vec::new(),
        }
    }
}

pub struct FakeConnector {
    script: Mutex<Script>,
    pub connects: AtomicUsize,
    pub links: Mutex<Vec<Arc<FakeLink>>>,
}

impl FakeConnector {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            connects: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn link(&self, index: usize) -> Arc<FakeLink> {
        Arc::clone(&self.links.lock().unwrap()[index])
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn name(&self) -> &str {
        "fake"
    }

    async fn latest_version(&self) -> Result<ProtocolVersion, ProtocolError> {
        Ok(ProtocolVersion("test".into()))
    }

    async fn connect(&self, params: ConnectParams) -> Result<Connection, ProtocolError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self.script.lock().unwrap().clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(FakeHandle {
            sent: Mutex::new(Vec::new()),
            plan: Mutex::new(script.send_plan.iter().cloned().collect()),
            closed: AtomicBool::new(false),
            events: tx.clone(),
        });
        self.links.lock().unwrap().push(Arc::new(FakeLink {
            handle: Arc::clone(&handle),
            events: tx.clone(),
            params: params.clone(),
        }));

        if script.qr_first {
            let _ = tx.send(ProtocolEvent::QrChallenge(format!("qr-{n}")));
        }
        if let Some(delay) = script.auto_open {
            let dir = params.credentials_dir.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if script.write_creds {
                    let body = format!("{{\"connect\":{n}}}");
                    let _ = tokio::fs::write(dir.join("creds.json"), body).await;
                    let _ = tx.send(ProtocolEvent::CredentialsUpdated);
                }
                let _ = tx.send(ProtocolEvent::opened());
            });
        }

        Ok(Connection {
            handle,
            events: rx,
        })
    }
}

// ── Recording notifier ──────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<SessionEvent>>,
    pub statuses: Mutex<Vec<(String, SessionStatus)>>,
}

impl RecordingNotifier {
    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.event_names().iter().any(|n| n == name)
    }
}

impl Notifier for RecordingNotifier {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn status(&self, session_id: &str, status: SessionStatus, _cause: Option<&CloseCause>) {
        self.statuses
            .lock()
            .unwrap()
            .push((session_id.to_string(), status));
    }

    fn last_status(&self, session_id: &str) -> Option<SessionStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == session_id)
            .map(|(_, s)| *s)
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub service: SessionService,
    pub connector: Arc<FakeConnector>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<SqliteSnapshotStore>,
    pub config: SessionsConfig,
    pub auth: TempDir,
}

pub fn test_config(auth_dir: &std::path::Path) -> SessionsConfig {
    SessionsConfig {
        auth_dir: auth_dir.to_path_buf(),
        warmup_ms: 5,
        ready_timeout_ms: 1_000,
        reconnect_backoff_ms: 40,
        logout_grace_ms: 40,
        connect_timeout_ms: 1_000,
        cold_start_alert_threshold: 2,
        protocol_version: None,
        ..SessionsConfig::default()
    }
}

pub async fn memory_store() -> Arc<SqliteSnapshotStore> {
    Arc::new(SqliteSnapshotStore::in_memory().await.unwrap())
}

pub async fn harness(script: Script) -> Harness {
    harness_with(script, |_| {}).await
}

pub async fn harness_with(script: Script, tweak: impl FnOnce(&mut SessionsConfig)) -> Harness {
    let auth = tempfile::tempdir().unwrap();
    let mut config = test_config(auth.path());
    tweak(&mut config);
    let connector = FakeConnector::new(script);
    let notifier = Arc::new(RecordingNotifier::default());
    let store = memory_store().await;
    let service = SessionService::new(
        &config,
        Arc::clone(&connector) as Arc<dyn Connector>,
        Arc::clone(&store) as Arc<dyn SnapshotStore>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    Harness {
        service,
        connector,
        notifier,
        store,
        config,
        auth,
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}
