//! WebSocket server handler using Axum.

use crate::admission::{client_address, AdmissionGuard, ConnectionAdmission};
use crate::client::{ClientRegistry, ClientState, Group, Outbound, Outbox, OutboxReceiver};
use crate::connection::{Connection, Handlers};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{future, Sink, SinkExt, StreamExt};
use metrics::counter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// How long the writer may keep flushing after the connection ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest a single socket write may block before the client is dropped.
pub const WRITER_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub admission: Arc<ConnectionAdmission>,
    pub handlers: Arc<Handlers>,
    /// Best-effort outbound capacity per client, in frames.
    pub client_buffer_size: usize,
    pub ping_interval: Duration,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.registry.client_count(),
        "joined": state.registry.group_size(Group::Audience),
    }))
}

/// WebSocket upgrade handler. Admission is decided before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let address = client_address(&headers);
    let guard = match state.admission.admit(&address) {
        Ok(guard) => guard,
        Err(rejected) => {
            return (StatusCode::TOO_MANY_REQUESTS, rejected.to_string()).into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, guard))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, guard: AdmissionGuard) {
    let (ws_tx, ws_rx) = socket.split();

    let (outbox, outbox_rx) = Outbox::channel(state.client_buffer_size);
    let client = Arc::new(ClientState::new(guard.address(), outbox));
    let client_id = state.registry.register(client.clone());

    info!("Client {} connected from {}", client_id, client.address);

    let mut writer = tokio::spawn(forward_outbox(ws_tx, outbox_rx, state.ping_interval));

    let incoming = ws_rx
        .take_while(move |msg| {
            if let Err(e) = msg {
                warn!("WebSocket error for {}: {:?}", client_id, e);
            }
            future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_))))
        })
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                Ok(Message::Binary(data)) => String::from_utf8(data.to_vec()).ok(),
                _ => None,
            })
        })
        .boxed();

    // A writer that gives up ends the connection too
    let connection = Connection::new(client.clone(), state.handlers.clone());
    let writer_done = tokio::select! {
        biased;

        reason = connection.run(incoming) => {
            debug!("Client {} connection ended: {:?}", client_id, reason);
            false
        }
        _ = &mut writer => {
            debug!("Client {} writer stopped", client_id);
            true
        }
    };

    // Cleanup
    state.registry.unregister(&client_id);
    client.outbox.close();
    guard.release();
    if !writer_done && timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        "Client {} disconnected after {}ms",
        client_id,
        chrono::Utc::now().timestamp_millis() - client.connected_at
    );
}

/// Forward queued frames to the socket, pinging on every interval.
///
/// Returns when the outbox closes, the socket fails, or one write stays
/// blocked for longer than [`WRITER_SEND_TIMEOUT`].
async fn forward_outbox<S>(mut sink: S, mut outbox_rx: OutboxReceiver, ping_every: Duration)
where
    S: Sink<Message> + Unpin,
{
    let mut ping_interval = interval(ping_every);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let message = tokio::select! {
            biased;

            item = outbox_rx.recv() => match item {
                Some(Outbound::Frame(text)) => Message::Text(text.to_string().into()),
                Some(Outbound::Close) | None => {
                    send_within(&mut sink, Message::Close(None)).await;
                    return;
                }
            },

            _ = ping_interval.tick() => Message::Ping(vec![].into()),
        };

        if !send_within(&mut sink, message).await {
            return;
        }
    }
}

/// Write one message, giving up after [`WRITER_SEND_TIMEOUT`].
async fn send_within<S>(sink: &mut S, message: Message) -> bool
where
    S: Sink<Message> + Unpin,
{
    match timeout(WRITER_SEND_TIMEOUT, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            warn!("Socket write blocked for {:?}, dropping client", WRITER_SEND_TIMEOUT);
            counter!("gateway_stalled_writers_total").increment(1);
            false
        }
    }
}
