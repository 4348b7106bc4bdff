use thiserror::Error;

/// Close code the transport reports for an abnormal socket closure.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Failure categories a backend reports for sends and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// The connection was already closed when the call was made.
    ConnectionClosed,
    /// The transport was torn down while the call was in progress.
    ConnectionTerminated,
    /// The call did not complete in time.
    Timeout,
    /// The request was rejected by the network (bad recipient, media, ...).
    Rejected,
    Other,
}

/// Error reported by the protocol library.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub code: Option<u16>,
    pub message: String,
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn connection_closed() -> Self {
        Self::new(ProtocolErrorKind::ConnectionClosed, "Connection Closed")
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::Other, message)
    }

    /// A handle that looked ready but whose transport had already dropped.
    pub fn is_cold_start_close(&self) -> bool {
        matches!(
            self.kind,
            ProtocolErrorKind::ConnectionClosed | ProtocolErrorKind::ConnectionTerminated
        ) || self.code == Some(ABNORMAL_CLOSURE)
    }
}
