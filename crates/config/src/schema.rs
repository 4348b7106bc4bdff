/// Config schema types (server, sessions, store, protocol backend).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub store: StoreConfig,
    pub protocol: ProtocolConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8001,
            cors_origins: Vec::new(),
        }
    }
}

/// Session lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Base directory holding one credential directory per session id.
    pub auth_dir: PathBuf,
    /// Pause applied before handing out an already-open connection.
    pub warmup_ms: u64,
    /// Upper bound a caller waits for a connection to reach Open.
    pub ready_timeout_ms: u64,
    /// Delay before reconnecting after a transient close.
    pub reconnect_backoff_ms: u64,
    /// Delay before purging credentials after a logout.
    pub logout_grace_ms: u64,
    /// Connect timeout passed down to the protocol library.
    pub connect_timeout_ms: u64,
    /// Consecutive cold-start recoveries before a session is reported degraded.
    pub cold_start_alert_threshold: u32,
    /// Pinned protocol version. `None` asks the library for its latest.
    pub protocol_version: Option<String>,
    /// Browser identity advertised to the chat network.
    pub browser: Vec<String>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("./auth"),
            warmup_ms: 750,
            ready_timeout_ms: 60_000,
            reconnect_backoff_ms: 5_000,
            logout_grace_ms: 2_000,
            connect_timeout_ms: 60_000,
            cold_start_alert_threshold: 3,
            protocol_version: None,
            browser: vec!["Windows".into(), "Edge".into(), "120.0.0.0".into()],
        }
    }
}

impl SessionsConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn logout_grace(&self) -> Duration {
        Duration::from_millis(self.logout_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Durable snapshot store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://switchboard.db?mode=rwc".into(),
        }
    }
}

/// Which protocol backend drives the sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Known values: "loopback".
    pub backend: String,
    /// How long the loopback backend waits before simulating a QR scan.
    pub loopback_pair_delay_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            backend: "loopback".into(),
            loopback_pair_delay_ms: 1_500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_sections_keep_defaults() {
        let cfg: SwitchboardConfig = toml::from_str(
            r#"
            [sessions]
            warmup_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sessions.warmup(), Duration::from_millis(10));
        assert_eq!(cfg.sessions.reconnect_backoff_ms, 5_000);
        assert_eq!(cfg.server.port, 8001);
        assert_eq!(cfg.protocol.backend, "loopback");
    }

    #[test]
    fn default_browser_identity() {
        let cfg = SessionsConfig::default();
        assert_eq!(cfg.browser, vec!["Windows", "Edge", "120.0.0.0"]);
        assert!(cfg.protocol_version.is_none());
    }
}
