//! Readiness gate: lets callers wait until a generation reaches Open.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    entry::{SessionHandle, SessionSlot, SessionState},
    error::{Result, SessionError},
    lifecycle::close_error,
};

#[derive(Debug, Clone)]
enum GateState {
    Pending,
    Open,
    Failed(SessionError),
}

/// One-shot Open signal for a single generation. Settles once; later
/// `open`/`fail` calls are ignored.
#[derive(Debug)]
pub struct ReadinessGate {
    generation: u64,
    tx: watch::Sender<GateState>,
}

impl ReadinessGate {
    pub fn new(generation: u64) -> Arc<Self> {
        let (tx, _) = watch::channel(GateState::Pending);
        Arc::new(Self { generation, tx })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.tx.borrow(), GateState::Pending)
    }

    pub fn open(&self) {
        self.settle(GateState::Open);
    }

    pub fn fail(&self, error: SessionError) {
        self.settle(GateState::Failed(error));
    }

    fn settle(&self, next: GateState) {
        self.tx.send_if_modified(|state| {
            if matches!(state, GateState::Pending) {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Wait for the gate to settle. Timing out only abandons this waiter.
    pub async fn wait(&self, session_id: &str, timeout: Duration) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let settled = async move {
            rx.wait_for(|s| !matches!(s, GateState::Pending))
                .await
                .map(|s| (*s).clone())
        };

        match tokio::time::timeout(timeout, settled).await {
            Err(_) => Err(SessionError::ConnectionTimeout {
                id: session_id.to_string(),
                after: timeout,
            }),
            Ok(Ok(GateState::Open)) => Ok(()),
            Ok(Ok(GateState::Failed(e))) => Err(e),
            // The sender lives as long as `self`; a closed channel means the
            // gate was torn down without settling.
            Ok(Ok(GateState::Pending) | Err(_)) => Err(SessionError::Superseded {
                id: session_id.to_string(),
                generation: self.generation,
            }),
        }
    }
}

/// Wait until the slot's connection is Open and return its handle.
///
/// An already-open connection still gets the `warmup` pause. A closed entry
/// with nothing pending fails fast with its classified close cause.
pub(crate) async fn wait_until_ready(
    slot: &SessionSlot,
    timeout: Duration,
    warmup: Duration,
) -> Result<SessionHandle> {
    let gate = {
        let mut entry = slot.entry();
        if entry.is_open() {
            None
        } else if entry.state == SessionState::Closed && entry.readiness.is_none() {
            return Err(match &entry.last_close_cause {
                Some(cause) => close_error(slot.id(), cause.clone()),
                None => SessionError::SessionNotFound(slot.id().to_string()),
            });
        } else {
            Some(entry.readiness_gate())
        }
    };

    match gate {
        Some(gate) => gate.wait(slot.id(), timeout).await?,
        None => tokio::time::sleep(warmup).await,
    }

    // Re-read: the entry may have moved on while we were suspended.
    let entry = slot.entry();
    match (entry.state, &entry.handle) {
        (SessionState::Open, Some(handle)) => Ok(handle.clone()),
        _ => Err(SessionError::SessionNotFound(slot.id().to_string())),
    }
}
