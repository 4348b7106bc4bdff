//! `/api/events`: WebSocket relay of notifier frames.

use std::sync::Arc;

use {
    axum::{
        extract::{
            State,
            ws::{Message, WebSocket, WebSocketUpgrade},
        },
        response::Response,
    },
    futures::{SinkExt, StreamExt},
    tokio::sync::broadcast::error::RecvError,
    tracing::{debug, warn},
};

use crate::state::GatewayState;

pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    ws.on_upgrade(move |socket| relay(socket, state))
}

/// Forward every frame until either side goes away. Client messages are
/// read only to notice a close.
async fn relay(socket: WebSocket, state: Arc<GatewayState>) {
    let mut frames = state.events.subscribe();
    let (mut sink, mut stream) = socket.split();
    debug!("event subscriber connected");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize event frame");
                            continue;
                        },
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging, frames dropped");
                },
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {},
            },
        }
    }
    debug!("event subscriber disconnected");
}
