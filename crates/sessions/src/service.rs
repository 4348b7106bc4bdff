//! Facade the HTTP layer and CLI talk to.

use std::sync::Arc;

use {
    serde::Serialize,
    switchboard_config::SessionsConfig,
    switchboard_protocol::{CloseCause, Connector, GroupSummary, Jid, MessageReceipt, OutboundContent},
    tracing::{info, warn},
};

use crate::{
    entry::{SessionHandle, SessionState},
    error::{Result, SessionError},
    lifecycle::{LifecycleController, LifecycleSettings},
    notify::{Notifier, SessionStatus},
    registry::SessionRegistry,
    send::{BatchMessage, BatchReport, SendCoordinator},
    snapshot::AuthSnapshotMirror,
    store::SnapshotStore,
};

/// Result of asking a session to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    AlreadyActive,
    /// Construction continues in the background.
    Starting,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub session_id: String,
    pub active: bool,
    pub state: Option<SessionState>,
    pub generation: u64,
    pub last_status: Option<SessionStatus>,
    pub last_close_cause: Option<CloseCause>,
}

pub struct SessionService {
    registry: SessionRegistry,
    sender: SendCoordinator,
    notifier: Arc<dyn Notifier>,
}

impl SessionService {
    pub fn new(
        config: &SessionsConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let controller = LifecycleController::new(
            connector,
            AuthSnapshotMirror::new(store),
            Arc::clone(&notifier),
            LifecycleSettings::from(config),
        );
        let registry = SessionRegistry::new(controller);
        let sender = SendCoordinator::new(
            registry.clone(),
            Arc::clone(&notifier),
            config.cold_start_alert_threshold,
        );
        Self {
            registry,
            sender,
            notifier,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn sender(&self) -> &SendCoordinator {
        &self.sender
    }

    /// Kick off construction without waiting for it.
    pub fn start(&self, session_id: &str) -> StartOutcome {
        if self.registry.is_active(session_id) {
            return StartOutcome::AlreadyActive;
        }
        info!(session_id, "starting session");
        let registry = self.registry.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = registry.get_or_create(&id).await {
                warn!(session_id = %id, error = %e, "background start did not reach open");
            }
        });
        StartOutcome::Starting
    }

    pub fn status(&self, session_id: &str) -> StatusReport {
        let view = self.registry.view(session_id);
        StatusReport {
            session_id: session_id.to_string(),
            active: view.as_ref().is_some_and(|v| v.state == SessionState::Open),
            state: view.as_ref().map(|v| v.state),
            generation: view.as_ref().map_or(0, |v| v.generation),
            last_status: self.notifier.last_status(session_id),
            last_close_cause: view.and_then(|v| v.last_close_cause),
        }
    }

    /// Open connection, if there is one right now.
    pub fn connection(&self, session_id: &str) -> Option<SessionHandle> {
        self.registry.connection(session_id)
    }

    pub async fn wait_for_connection(&self, session_id: &str) -> Result<SessionHandle> {
        self.registry.get_or_create(session_id).await
    }

    pub async fn send(
        &self,
        session_id: &str,
        to: &Jid,
        content: &OutboundContent,
    ) -> Result<MessageReceipt> {
        self.sender.send(session_id, to, content).await
    }

    pub async fn send_batch(&self, session_id: &str, messages: &[BatchMessage]) -> Result<BatchReport> {
        self.sender.send_batch(session_id, messages).await
    }

    pub async fn recreate(&self, session_id: &str) -> Result<SessionHandle> {
        self.registry.recreate(session_id).await
    }

    pub async fn groups(&self, session_id: &str) -> Result<Vec<GroupSummary>> {
        let handle = self
            .registry
            .connection(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        handle
            .fetch_groups()
            .await
            .map_err(|e| SessionError::protocol(session_id, e))
    }

    pub fn list_active(&self) -> Vec<String> {
        self.registry.list_active()
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.registry.remove(session_id).await
    }
}
