//! Process-wide registry of sessions with single-flight construction.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    dashmap::DashMap,
    futures::FutureExt,
    switchboard_protocol::{CloseCause, CloseReason, ProtocolEvent},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{
    entry::{ConstructionFuture, EntryView, InFlight, SessionHandle, SessionSlot, SessionState},
    error::{Result, SessionError},
    lifecycle::{LifecycleController, Recovery, transition},
    readiness::wait_until_ready,
};

enum Step {
    /// Already open: return after the warmup pause.
    Warm,
    /// A previous construction gave up waiting but its connection is still
    /// pairing: wait on that generation's readiness.
    Pending,
    /// Join the outstanding construction.
    Join(ConstructionFuture),
}

struct Inner {
    slots: DashMap<String, Arc<SessionSlot>>,
    controller: LifecycleController,
    flights: AtomicU64,
}

/// Owns every session entry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(controller: LifecycleController) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                controller,
                flights: AtomicU64::new(0),
            }),
        }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.inner.controller
    }

    fn slot(&self, id: &str) -> Arc<SessionSlot> {
        Arc::clone(
            self.inner
                .slots
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(SessionSlot::new(id)))
                .value(),
        )
    }

    fn existing(&self, id: &str) -> Option<Arc<SessionSlot>> {
        self.inner.slots.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Return an open handle for `id`, constructing one if needed.
    ///
    /// Concurrent callers for the same id share a single construction.
    pub async fn get_or_create(&self, id: &str) -> Result<SessionHandle> {
        let settings = self.inner.controller.settings();
        let slot = self.slot(id);

        // One retry covers a connection that closed during the warmup pause.
        for attempt in 0..2 {
            let step = {
                let mut entry = slot.entry();
                if entry.is_open() {
                    Step::Warm
                } else if let Some(flight) = &entry.creation_in_flight {
                    debug!(session_id = id, token = flight.token, "joining construction");
                    Step::Join(flight.future.clone())
                } else if entry.state == SessionState::Connecting && entry.handle.is_some() {
                    debug!(session_id = id, generation = entry.generation, "waiting on pending connection");
                    Step::Pending
                } else {
                    let token = self.inner.flights.fetch_add(1, Ordering::Relaxed) + 1;
                    let future = self.spawn_construction(Arc::clone(&slot), token);
                    entry.creation_in_flight = Some(InFlight {
                        token,
                        future: future.clone(),
                    });
                    Step::Join(future)
                }
            };

            match step {
                Step::Warm => {
                    match wait_until_ready(&slot, settings.ready_timeout, settings.warmup).await {
                        Err(SessionError::SessionNotFound(_)) if attempt == 0 => continue,
                        result => return result,
                    }
                },
                Step::Pending => {
                    return wait_until_ready(&slot, settings.ready_timeout, settings.warmup).await;
                },
                Step::Join(future) => {
                    future.await?;
                    let entry = slot.entry();
                    return match (entry.state, &entry.handle) {
                        (SessionState::Open, Some(handle)) => Ok(handle.clone()),
                        _ => Err(SessionError::SessionNotFound(id.to_string())),
                    };
                },
            }
        }
        Err(SessionError::SessionNotFound(id.to_string()))
    }

    /// Spawn a construction task and wrap its result so any number of
    /// callers can await it. Dropping every waiter does not cancel it.
    fn spawn_construction(
        &self,
        slot: Arc<SessionSlot>,
        token: u64,
    ) -> ConstructionFuture {
        let this = self.clone();
        let task = tokio::spawn(async move { this.construct(slot, token).await });
        async move {
            task.await
                .unwrap_or_else(|e| Err(SessionError::Internal(format!("construction task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    async fn construct(&self, slot: Arc<SessionSlot>, token: u64) -> Result<()> {
        let settings = self.inner.controller.settings();
        let result = async {
            let started = self.inner.controller.start(&slot).await?;
            self.spawn_dispatcher(Arc::clone(&slot), started.generation, started.events);
            wait_until_ready(&slot, settings.ready_timeout, settings.warmup)
                .await
                .map(|_| ())
        }
        .await;

        {
            let mut entry = slot.entry();
            if entry
                .creation_in_flight
                .as_ref()
                .is_some_and(|f| f.token == token)
            {
                entry.creation_in_flight = None;
            }
        }

        match &result {
            Ok(()) => debug!(session_id = slot.id(), token, "construction finished"),
            Err(e) => warn!(session_id = slot.id(), token, error = %e, "construction did not reach open"),
        }
        result
    }

    fn spawn_dispatcher(
        &self,
        slot: Arc<SessionSlot>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ProtocolEvent>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.dispatch(&slot, generation, &event).await;
            }

            // A stream that ends without a close still ends the generation.
            let live = {
                let entry = slot.entry();
                entry.generation == generation
                    && matches!(entry.state, SessionState::Connecting | SessionState::Open)
            };
            if live {
                debug!(session_id = slot.id(), generation, "event stream ended without close");
                let cause = CloseCause::new(CloseReason::ConnectionLost, "event stream ended");
                this.dispatch(&slot, generation, &ProtocolEvent::closed(cause))
                    .await;
            }
        });
    }

    async fn dispatch(&self, slot: &Arc<SessionSlot>, generation: u64, event: &ProtocolEvent) {
        let effects = {
            let mut entry = slot.entry();
            transition(&mut entry, generation, event)
        };
        for effect in effects {
            if let Some(recovery) = self.inner.controller.execute(slot.id(), effect).await {
                self.schedule(slot.id().to_string(), recovery);
            }
        }
    }

    fn schedule(&self, id: String, recovery: Recovery) {
        let this = self.clone();
        debug!(session_id = %id, ?recovery, "scheduling recovery");
        tokio::spawn(async move {
            tokio::time::sleep(recovery.delay).await;
            if !this.closed_at(&id, recovery.generation) {
                debug!(session_id = %id, generation = recovery.generation, "recovery superseded");
                return;
            }
            // A pending relogin purges credentials inside `start`.
            info!(session_id = %id, kind = ?recovery.kind, "restarting session");
            if let Err(e) = this.get_or_create(&id).await {
                warn!(session_id = %id, error = %e, "restart did not reach open");
            }
        });
    }

    fn closed_at(&self, id: &str, generation: u64) -> bool {
        self.existing(id).is_some_and(|slot| {
            let entry = slot.entry();
            entry.generation == generation && entry.state == SessionState::Closed
        })
    }

    /// Tear down the current generation and construct a fresh one.
    ///
    /// The previous generation's readiness is rejected with `Superseded` and
    /// any late events it emits are ignored.
    pub async fn recreate(&self, id: &str) -> Result<SessionHandle> {
        let slot = self.slot(id);
        let old = Self::reset(&slot);
        info!(session_id = id, "recreating session");
        if let Some(handle) = old
            && let Err(e) = handle.close().await
        {
            debug!(session_id = id, error = %e, "close of replaced connection failed");
        }
        self.get_or_create(id).await
    }

    /// Drop the entry entirely. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let Some((_, slot)) = self.inner.slots.remove(id) else {
            return false;
        };
        let old = Self::reset(&slot);
        if let Some(handle) = old
            && let Err(e) = handle.close().await
        {
            debug!(session_id = id, error = %e, "close of removed connection failed");
        }
        info!(session_id = id, "session removed");
        true
    }

    /// Invalidate the current generation and return its handle, if any.
    fn reset(slot: &SessionSlot) -> Option<SessionHandle> {
        let mut entry = slot.entry();
        let old = entry.handle.take();
        if let Some(gate) = entry.readiness.take() {
            gate.fail(SessionError::Superseded {
                id: slot.id().to_string(),
                generation: gate.generation(),
            });
        }
        entry.state = SessionState::Idle;
        entry.creation_in_flight = None;
        entry.generation += 1;
        old
    }

    /// Open handle for `id` without waiting or constructing.
    pub fn connection(&self, id: &str) -> Option<SessionHandle> {
        let slot = self.existing(id)?;
        let entry = slot.entry();
        if entry.is_open() {
            entry.handle.clone()
        } else {
            None
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.connection(id).is_some()
    }

    pub fn view(&self, id: &str) -> Option<EntryView> {
        self.existing(id).map(|slot| slot.entry().view())
    }

    /// Every known session id, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.slots.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Ids whose connection is currently open, sorted.
    pub fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .slots
            .iter()
            .filter(|s| s.value().entry().is_open())
            .map(|s| s.key().clone())
            .collect();
        ids.sort();
        ids
    }
}
