//! Session lifecycle coordination for the gateway.
//!
//! One [`SessionRegistry`] owns every tenant session. Each session moves
//! through connection generations driven by the lifecycle controller, with
//! credentials mirrored into a durable [`SnapshotStore`] so a restarted
//! process can reconnect without pairing again.

pub mod entry;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod readiness;
pub mod registry;
pub mod send;
pub mod service;
pub mod snapshot;
pub mod store;

pub use {
    entry::{EntryView, SessionEntry, SessionHandle, SessionState},
    error::{Result, SessionError},
    lifecycle::{CloseClass, LifecycleController, LifecycleSettings, classify},
    notify::{BroadcastNotifier, EventFrame, InactiveReason, Notifier, SessionEvent, SessionStatus},
    readiness::ReadinessGate,
    registry::SessionRegistry,
    send::{BatchMessage, BatchReport, SendCoordinator},
    service::{SessionService, StartOutcome, StatusReport},
    snapshot::{AuthSnapshotMirror, RestoreOutcome},
    store::{SnapshotRecord, SnapshotStatus, SnapshotStore, SnapshotSummary, SqliteSnapshotStore},
};
