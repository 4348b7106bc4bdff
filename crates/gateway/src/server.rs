use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::{Context, bail},
    axum::{
        Router,
        extract::State,
        http::HeaderValue,
        response::{IntoResponse, Json},
        routing::get,
    },
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    switchboard_config::SwitchboardConfig,
    switchboard_protocol::{Connector, LoopbackConnector},
    switchboard_sessions::{
        BroadcastNotifier, Notifier, SessionService, SnapshotStore, SqliteSnapshotStore,
    },
};

use crate::{events::ws_upgrade_handler, messages, sessions, state::GatewayState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// An empty `cors_origins` allows any origin.
pub fn build_gateway_app(state: Arc<GatewayState>, cors_origins: &[String]) -> Router {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    let cors = if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/events", get(ws_upgrade_handler))
        .nest("/api/sessions", sessions::router())
        .nest("/api/messages", messages::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Pick the protocol backend named in config.
pub fn build_connector(config: &SwitchboardConfig) -> anyhow::Result<Arc<dyn Connector>> {
    match config.protocol.backend.as_str() {
        "loopback" => Ok(Arc::new(LoopbackConnector::new(Duration::from_millis(
            config.protocol.loopback_pair_delay_ms,
        )))),
        other => bail!("unknown protocol backend '{other}'"),
    }
}

/// Start the gateway HTTP + WebSocket server.
pub async fn start_gateway(config: SwitchboardConfig) -> anyhow::Result<()> {
    let store = SqliteSnapshotStore::connect(&config.store.database_url)
        .await
        .with_context(|| format!("failed to open snapshot store {}", config.store.database_url))?;
    let connector = build_connector(&config)?;
    let backend = connector.name().to_string();

    let events = Arc::new(BroadcastNotifier::default());
    let sessions = Arc::new(SessionService::new(
        &config.sessions,
        connector,
        Arc::new(store) as Arc<dyn SnapshotStore>,
        Arc::clone(&events) as Arc<dyn Notifier>,
    ));
    let state = GatewayState::new(sessions, Arc::clone(&events));
    let app = build_gateway_app(Arc::clone(&state), &config.server.cors_origins);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("switchboard gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("protocol backend: {backend}"),
        format!("credentials: {}", config.sessions.auth_dir.display()),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "uptimeSecs": state.uptime_secs(),
        "activeSessions": state.sessions.list_active().len(),
    }))
}
