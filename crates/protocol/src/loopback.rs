//! Loopback backend: a local stand-in for the chat network.
//!
//! Without stored credentials a connection first emits a QR challenge, then
//! "pairs" after `pair_delay` by writing `creds.json` and reporting a
//! credential update. Sends are acknowledged and logged, nothing leaves the
//! process.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::{
    connector::{ConnectParams, Connection, ConnectionHandle, Connector},
    error::ProtocolError,
    event::{CloseCause, CloseReason, ProtocolEvent},
    types::{GroupSummary, Jid, MessageReceipt, OutboundContent, ProtocolVersion},
};

const CREDS_FILE: &str = "creds.json";
const LOOPBACK_VERSION: &str = "2.3000.0";

pub struct LoopbackConnector {
    pair_delay: Duration,
}

impl LoopbackConnector {
    pub fn new(pair_delay: Duration) -> Self {
        Self { pair_delay }
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_500))
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn latest_version(&self) -> Result<ProtocolVersion, ProtocolError> {
        Ok(ProtocolVersion(LOOPBACK_VERSION.into()))
    }

    async fn connect(&self, params: ConnectParams) -> Result<Connection, ProtocolError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(LoopbackHandle {
            session_id: params.session_id.clone(),
            closed: AtomicBool::new(false),
            events: tx.clone(),
        });

        debug!(
            session_id = %params.session_id,
            version = %params.version,
            dir = %params.credentials_dir.display(),
            "loopback connect"
        );

        let pair_delay = self.pair_delay;
        let task_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            let creds = params.credentials_dir.join(CREDS_FILE);
            if !tokio::fs::try_exists(&creds).await.unwrap_or(false) {
                let challenge = format!(
                    "loopback:{}:{}",
                    params.session_id,
                    uuid::Uuid::new_v4().simple()
                );
                if tx.send(ProtocolEvent::QrChallenge(challenge)).is_err() {
                    return;
                }
                tokio::time::sleep(pair_delay).await;
                if task_handle.is_closed() {
                    return;
                }
                if let Err(e) = write_creds(&creds, &params.session_id).await {
                    let _ = tx.send(ProtocolEvent::closed(CloseCause::new(
                        CloseReason::BadSession,
                        format!("failed to store credentials: {e}"),
                    )));
                    return;
                }
                let _ = tx.send(ProtocolEvent::CredentialsUpdated);
            }
            if !task_handle.is_closed() {
                let _ = tx.send(ProtocolEvent::opened());
            }
        });

        Ok(Connection {
            handle,
            events: rx,
        })
    }
}

async fn write_creds(path: &Path, session_id: &str) -> std::io::Result<()> {
    let paired_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let body = serde_json::json!({
        "me": format!("{session_id}@loopback"),
        "pairedAt": paired_at,
    });
    tokio::fs::write(path, body.to_string()).await
}

struct LoopbackHandle {
    session_id: String,
    closed: AtomicBool,
    events: mpsc::UnboundedSender<ProtocolEvent>,
}

impl LoopbackHandle {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandle for LoopbackHandle {
    async fn send(
        &self,
        to: &Jid,
        content: &OutboundContent,
    ) -> Result<MessageReceipt, ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::connection_closed());
        }
        info!(
            session_id = %self.session_id,
            to = %to,
            content = %content.describe(),
            "loopback send"
        );
        Ok(MessageReceipt {
            message_id: uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
            to: to.clone(),
        })
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupSummary>, ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::connection_closed());
        }
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ProtocolEvent::closed(CloseCause::new(
                CloseReason::ConnectionClosed,
                "closed by gateway",
            )));
        }
        Ok(())
    }
}
