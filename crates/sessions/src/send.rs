//! Outbound sends with cold-start recovery.

use std::sync::Arc;

use {
    dashmap::DashMap,
    serde::Serialize,
    switchboard_protocol::{Jid, MessageReceipt, OutboundContent},
    tracing::{debug, error, warn},
};

use crate::{
    error::{Result, SessionError},
    notify::{Notifier, SessionEvent},
    registry::SessionRegistry,
};

/// One item of a batch send.
#[derive(Debug, Clone)]
pub struct BatchMessage {
    pub to: Jid,
    pub content: OutboundContent,
}

/// Outcome of a batch that ran to completion.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub receipts: Vec<MessageReceipt>,
    /// The session was recreated once mid-batch.
    pub recreated: bool,
}

/// Sends through the registry, recreating the session once when the
/// transport turns out to have dropped before the send.
pub struct SendCoordinator {
    registry: SessionRegistry,
    notifier: Arc<dyn Notifier>,
    alert_threshold: u32,
    cold_starts: DashMap<String, u32>,
}

impl SendCoordinator {
    pub fn new(registry: SessionRegistry, notifier: Arc<dyn Notifier>, alert_threshold: u32) -> Self {
        Self {
            registry,
            notifier,
            alert_threshold,
            cold_starts: DashMap::new(),
        }
    }

    pub async fn send(
        &self,
        session_id: &str,
        to: &Jid,
        content: &OutboundContent,
    ) -> Result<MessageReceipt> {
        let handle = self.registry.get_or_create(session_id).await?;
        match handle.send(to, content).await {
            Ok(receipt) => {
                self.cold_starts.remove(session_id);
                Ok(receipt)
            },
            Err(e) if e.is_cold_start_close() => {
                warn!(
                    session_id,
                    generation = handle.generation(),
                    error = %e,
                    "connection dropped before send, recreating"
                );
                self.record_cold_start(session_id);
                let handle = self.registry.recreate(session_id).await?;
                handle
                    .send(to, content)
                    .await
                    .map_err(|e| SessionError::protocol(session_id, e))
            },
            Err(e) => Err(SessionError::protocol(session_id, e)),
        }
    }

    /// Send `messages` in order. At most one recreate per batch; any other
    /// failure stops the batch.
    pub async fn send_batch(&self, session_id: &str, messages: &[BatchMessage]) -> Result<BatchReport> {
        let mut handle = self.registry.get_or_create(session_id).await?;
        let mut report = BatchReport::default();

        for (index, message) in messages.iter().enumerate() {
            let receipt = match handle.send(&message.to, &message.content).await {
                Ok(receipt) => receipt,
                Err(e) if e.is_cold_start_close() && !report.recreated => {
                    warn!(
                        session_id,
                        index,
                        generation = handle.generation(),
                        error = %e,
                        "connection dropped mid-batch, recreating"
                    );
                    self.record_cold_start(session_id);
                    handle = self.registry.recreate(session_id).await?;
                    report.recreated = true;
                    handle
                        .send(&message.to, &message.content)
                        .await
                        .map_err(|e| SessionError::protocol(session_id, e))?
                },
                Err(e) => {
                    warn!(session_id, index, sent = report.receipts.len(), error = %e, "batch aborted");
                    return Err(SessionError::protocol(session_id, e));
                },
            };
            report.receipts.push(receipt);
        }

        if !report.recreated {
            self.cold_starts.remove(session_id);
        }
        debug!(session_id, sent = report.receipts.len(), recreated = report.recreated, "batch sent");
        Ok(report)
    }

    /// Consecutive cold-start recoveries since the last clean send.
    pub fn consecutive_cold_starts(&self, session_id: &str) -> u32 {
        self.cold_starts.get(session_id).map(|c| *c).unwrap_or(0)
    }

    fn record_cold_start(&self, session_id: &str) {
        let count = {
            let mut count = self.cold_starts.entry(session_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if count == self.alert_threshold {
            error!(
                session_id,
                consecutive_cold_starts = count,
                "session keeps dropping before sends"
            );
            self.notifier.emit(SessionEvent::Degraded {
                session_id: session_id.to_string(),
                consecutive_cold_starts: count,
            });
        }
    }
}
