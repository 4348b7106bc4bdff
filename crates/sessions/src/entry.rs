use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use {
    futures::future::{BoxFuture, Shared},
    serde::Serialize,
    switchboard_protocol::{
        CloseCause, ConnectionHandle, GroupSummary, Jid, MessageReceipt, OutboundContent,
        ProtocolError,
    },
};

use crate::{error::SessionError, readiness::ReadinessGate};

/// Connection state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Cloneable reference to one connection generation.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Arc<str>,
    generation: u64,
    inner: Arc<dyn ConnectionHandle>,
}

impl SessionHandle {
    pub(crate) fn new(session_id: &str, generation: u64, inner: Arc<dyn ConnectionHandle>) -> Self {
        Self {
            session_id: Arc::from(session_id),
            generation,
            inner,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn send(
        &self,
        to: &Jid,
        content: &OutboundContent,
    ) -> Result<MessageReceipt, ProtocolError> {
        self.inner.send(to, content).await
    }

    pub async fn fetch_groups(&self) -> Result<Vec<GroupSummary>, ProtocolError> {
        self.inner.fetch_groups().await
    }

    pub(crate) async fn close(&self) -> Result<(), ProtocolError> {
        self.inner.close().await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .finish()
    }
}

pub(crate) type ConstructionFuture = Shared<BoxFuture<'static, Result<(), SessionError>>>;

/// The single outstanding construction for an entry. `token` tells a
/// finishing construction whether the marker is still its own.
pub(crate) struct InFlight {
    pub token: u64,
    pub future: ConstructionFuture,
}

/// Per-session state, owned by the registry.
pub struct SessionEntry {
    pub(crate) id: String,
    pub(crate) state: SessionState,
    pub(crate) handle: Option<SessionHandle>,
    pub(crate) generation: u64,
    pub(crate) creation_in_flight: Option<InFlight>,
    pub(crate) readiness: Option<Arc<ReadinessGate>>,
    pub(crate) last_close_cause: Option<CloseCause>,
    /// Set by a logout; the next construction purges credentials first.
    pub(crate) relogin_pending: bool,
}

impl SessionEntry {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: SessionState::Idle,
            handle: None,
            generation: 0,
            creation_in_flight: None,
            readiness: None,
            last_close_cause: None,
            relogin_pending: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open && self.handle.is_some()
    }

    /// Readiness for the current generation, created on first use.
    pub(crate) fn readiness_gate(&mut self) -> Arc<ReadinessGate> {
        let generation = self.generation;
        Arc::clone(
            self.readiness
                .get_or_insert_with(|| ReadinessGate::new(generation)),
        )
    }

    pub fn view(&self) -> EntryView {
        EntryView {
            id: self.id.clone(),
            state: self.state,
            generation: self.generation,
            connecting: self.creation_in_flight.is_some(),
            last_close_cause: self.last_close_cause.clone(),
        }
    }
}

/// Read-only copy of an entry for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub id: String,
    pub state: SessionState,
    pub generation: u64,
    pub connecting: bool,
    pub last_close_cause: Option<CloseCause>,
}

/// Registry slot: an entry behind a lock that is never held across `.await`.
pub(crate) struct SessionSlot {
    id: String,
    entry: Mutex<SessionEntry>,
}

impl SessionSlot {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            entry: Mutex::new(SessionEntry::new(id)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry(&self) -> MutexGuard<'_, SessionEntry> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
