use std::time::Duration;

use {
    switchboard_protocol::{CloseCause, ProtocolError},
    thiserror::Error,
};

/// Errors surfaced by the session coordinator.
///
/// `Clone` because one construction result is shared by every caller that
/// joined it.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("session '{0}' is not active or does not exist")]
    SessionNotFound(String),

    /// The waiter gave up; the construction itself keeps running.
    #[error("session '{id}' was not ready after {}ms", after.as_millis())]
    ConnectionTimeout { id: String, after: Duration },

    /// Send hit a handle whose transport had already dropped.
    #[error("session '{id}' connection dropped before send: {source}")]
    ColdStartClose {
        id: String,
        #[source]
        source: ProtocolError,
    },

    #[error("session '{id}' was logged out: {cause}")]
    TerminalAuth { id: String, cause: CloseCause },

    #[error("session '{id}' connection closed: {cause}")]
    TransientClose { id: String, cause: CloseCause },

    /// Durable snapshot could not be decoded. Not retried with the same blob.
    #[error("session '{id}' credential snapshot is unusable: {message}")]
    SnapshotRestore { id: String, message: String },

    /// A newer generation replaced the one being waited on.
    #[error("session '{id}' generation {generation} was superseded")]
    Superseded { id: String, generation: u64 },

    #[error("session '{id}' protocol error: {source}")]
    Protocol {
        id: String,
        #[source]
        source: ProtocolError,
    },

    #[error("snapshot store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn protocol(id: &str, source: ProtocolError) -> Self {
        if source.is_cold_start_close() {
            Self::ColdStartClose {
                id: id.to_string(),
                source,
            }
        } else {
            Self::Protocol {
                id: id.to_string(),
                source,
            }
        }
    }

    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            Self::ColdStartClose { .. } => "COLD_START_CLOSE",
            Self::TerminalAuth { .. } => "TERMINAL_AUTH",
            Self::TransientClose { .. } => "TRANSIENT_CLOSE",
            Self::SnapshotRestore { .. } => "SNAPSHOT_RESTORE",
            Self::Superseded { .. } => "SUPERSEDED",
            Self::Protocol { .. } => "PROTOCOL",
            Self::Store(_) => "STORE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_cold_start_close(&self) -> bool {
        matches!(self, Self::ColdStartClose { .. })
    }
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use {super::*, switchboard_protocol::ProtocolErrorKind};

    #[test]
    fn protocol_errors_split_on_cold_start() {
        let cold = SessionError::protocol("s1", ProtocolError::connection_closed());
        assert!(cold.is_cold_start_close());
        assert_eq!(cold.code(), "COLD_START_CLOSE");

        let other = SessionError::protocol(
            "s1",
            ProtocolError::new(ProtocolErrorKind::Rejected, "bad jid"),
        );
        assert!(!other.is_cold_start_close());
        assert_eq!(other.code(), "PROTOCOL");
    }

    #[test]
    fn timeout_message_mentions_duration() {
        let err = SessionError::ConnectionTimeout {
            id: "s1".into(),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "session 's1' was not ready after 250ms");
    }
}
