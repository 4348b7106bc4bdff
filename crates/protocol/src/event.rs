//! Lifecycle events emitted by a connection.

use serde::{Deserialize, Serialize};

/// Structured reason attached to a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    LoggedOut,
    Forbidden,
    BadSession,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    TimedOut,
    MultideviceMismatch,
    RestartRequired,
    UnavailableService,
    Unknown,
}

/// Close code → reason table. `408` is shared by a lost connection and a
/// timeout; the library tells them apart only by message, so both map to
/// [`CloseReason::ConnectionLost`].
const CLOSE_CODES: &[(u16, CloseReason)] = &[
    (401, CloseReason::LoggedOut),
    (403, CloseReason::Forbidden),
    (408, CloseReason::ConnectionLost),
    (411, CloseReason::MultideviceMismatch),
    (428, CloseReason::ConnectionClosed),
    (440, CloseReason::ConnectionReplaced),
    (500, CloseReason::BadSession),
    (503, CloseReason::UnavailableService),
    (515, CloseReason::RestartRequired),
];

impl CloseReason {
    pub fn from_code(code: u16) -> Self {
        CLOSE_CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, reason)| *reason)
            .unwrap_or(Self::Unknown)
    }

    pub fn code(self) -> Option<u16> {
        CLOSE_CODES
            .iter()
            .find(|(_, reason)| *reason == self)
            .map(|(c, _)| *c)
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCause {
    pub code: Option<u16>,
    pub reason: CloseReason,
    pub message: String,
}

impl CloseCause {
    /// Build a cause from a numeric close code, resolving the reason through
    /// the close-code table.
    pub fn from_code(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: CloseReason::from_code(code),
            message: message.into(),
        }
    }

    pub fn new(reason: CloseReason, message: impl Into<String>) -> Self {
        Self {
            code: reason.code(),
            reason,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?} ({code}): {}", self.reason, self.message),
            None => write!(f, "{:?}: {}", self.reason, self.message),
        }
    }
}

/// Transport-level connection state as reported by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connecting,
    Open,
    Close,
}

/// Event emitted by one connection generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Credential files under the session's directory were rewritten.
    CredentialsUpdated,
    /// `cause` is set when `state` is [`LinkState::Close`].
    ConnectionStateChanged {
        state: LinkState,
        cause: Option<CloseCause>,
    },
    /// Pairing challenge to be rendered as a QR code.
    QrChallenge(String),
}

impl ProtocolEvent {
    pub fn opened() -> Self {
        Self::ConnectionStateChanged {
            state: LinkState::Open,
            cause: None,
        }
    }

    pub fn closed(cause: CloseCause) -> Self {
        Self::ConnectionStateChanged {
            state: LinkState::Close,
            cause: Some(cause),
        }
    }
}
