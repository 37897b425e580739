pub mod dispatch;
pub mod events;
pub mod hub;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use crate::auth::Authenticator;
use crate::state::AppState;
use hub::{ConnectionId, Hub, OutboundReceiver};
use session::Session;

/// Largest inbound message accepted before the transport drops the socket.
pub const MAX_FRAME_SIZE: usize = 4096;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(MAX_FRAME_SIZE)
        .max_frame_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound, outbound_rx) = hub::outbound(state.gateway.outbound_queue);
    let id = state.hub.register(outbound);
    let mut shutdown = outbound_rx.shutdown_signal();

    let (ws_sink, mut ws_stream) = socket.split();
    let writer = tokio::spawn(write_loop(id, state.hub.clone(), ws_sink, outbound_rx));

    let auth: Arc<dyn Authenticator> = state.auth.clone();
    let mut session = Session::new(id, state.hub.clone(), auth);

    loop {
        tokio::select! {
            // Fires once the hub has torn this connection down: eviction,
            // heartbeat timeout or a full queue.
            _ = shutdown.changed() => {
                tracing::debug!(connection_id = %id, "connection closed by hub");
                break;
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = session.handle_frame(text.as_str()).await {
                            tracing::debug!(connection_id = %id, "closing connection: {e}");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(connection_id = %id, "closing connection: binary frame");
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, "websocket read failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    session.close();
    let _ = writer.await;
}

/// Drain the outbound queue into the socket until the hub drops the
/// connection or a write fails.
async fn write_loop(
    id: ConnectionId,
    hub: Arc<Hub>,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
) {
    while let Some(frame) = outbound.recv().await {
        let send = ws_sink.send(Message::Text(frame.as_ref().into()));
        match tokio::time::timeout(WRITE_TIMEOUT, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %id, "websocket write failed: {e}");
                break;
            }
            Err(_) => {
                tracing::warn!(connection_id = %id, "websocket write timed out");
                break;
            }
        }
    }

    // No-op when the hub already removed it; otherwise wakes the reader.
    hub.unregister(id);
    let _ = tokio::time::timeout(WRITE_TIMEOUT, ws_sink.send(Message::Close(None))).await;
}
