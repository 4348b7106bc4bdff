//! Boundary to the chat-network protocol library.
//!
//! The gateway never interprets wire bytes. A backend implements
//! [`Connector`] to build one connection per session generation; the
//! connection hands back a [`ConnectionHandle`] for sends and queries and a
//! stream of [`ProtocolEvent`]s describing its lifecycle.

pub mod connector;
pub mod error;
pub mod event;
pub mod loopback;
pub mod types;

pub use {
    connector::{ConnectParams, Connection, ConnectionHandle, Connector},
    error::{ABNORMAL_CLOSURE, ProtocolError, ProtocolErrorKind},
    event::{CloseCause, CloseReason, LinkState, ProtocolEvent},
    loopback::LoopbackConnector,
    types::{GroupSummary, Jid, MediaKind, MessageReceipt, OutboundContent, ProtocolVersion},
};
