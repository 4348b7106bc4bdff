use std::{path::PathBuf, sync::Arc, time::Duration};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    error::ProtocolError,
    event::ProtocolEvent,
    types::{GroupSummary, Jid, MessageReceipt, OutboundContent, ProtocolVersion},
};

/// Everything a backend needs to open one connection generation.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub session_id: String,
    pub version: ProtocolVersion,
    /// Directory holding the session's credential files. The backend reads
    /// stored credentials from here and rewrites them in place, emitting
    /// [`ProtocolEvent::CredentialsUpdated`] afterwards.
    pub credentials_dir: PathBuf,
    pub browser: Vec<String>,
    pub connect_timeout: Duration,
}

/// A freshly constructed connection and its event stream.
pub struct Connection {
    pub handle: Arc<dyn ConnectionHandle>,
    pub events: mpsc::UnboundedReceiver<ProtocolEvent>,
}

/// Live transport object for one connection generation.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    async fn send(
        &self,
        to: &Jid,
        content: &OutboundContent,
    ) -> Result<MessageReceipt, ProtocolError>;

    /// Groups this account participates in.
    async fn fetch_groups(&self) -> Result<Vec<GroupSummary>, ProtocolError>;

    /// Terminate the connection. The event stream ends with a close event.
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// Factory for connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Latest protocol version the network accepts.
    async fn latest_version(&self) -> Result<ProtocolVersion, ProtocolError>;

    /// Construct a connection. Returning does not mean the connection is
    /// open; the event stream reports when it is.
    async fn connect(&self, params: ConnectParams) -> Result<Connection, ProtocolError>;
}
