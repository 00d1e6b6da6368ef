use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::api::SharedState;
use crate::interrupt::{InterruptBroker, PromptEvent, PromptTransport};
use crate::progress::{ChannelSubscriber, ProgressEvent};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Outbound buffer per connection for progress and prompt events.
const CHANNEL_CAPACITY: usize = 256;

// ── Client → server frames ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Submit { value: String },
    Cancel,
}

// ── Server → client acknowledgements ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AckMessage {
    PromptResolved { success: bool },
    InvalidMessage { error: String },
}

/// Prompt transport backed by one WebSocket connection.
struct SocketPromptTransport {
    tx: mpsc::Sender<PromptEvent>,
}

#[async_trait]
impl PromptTransport for SocketPromptTransport {
    async fn send(&self, _session_id: &str, event: &PromptEvent) -> anyhow::Result<()> {
        self.tx
            .try_send(event.clone())
            .map_err(|e| anyhow::anyhow!("WebSocket prompt channel unavailable: {}", e))
    }
}

pub async fn session_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session_socket(socket, session_id, state))
}

/// Wire one socket into a session: progress subscriber, prompt transport,
/// and inbound submit/cancel frames.
async fn handle_session_socket(socket: WebSocket, session_id: String, state: SharedState) {
    let (sender, receiver) = socket.split();

    let (subscriber, progress_rx) = ChannelSubscriber::channel(CHANNEL_CAPACITY);
    let reporter = state.progress.reporter(&session_id);
    let subscriber_id = reporter.connect(Arc::new(subscriber)).await;

    let (prompt_tx, prompt_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let transport: Arc<dyn PromptTransport> = Arc::new(SocketPromptTransport {
        tx: prompt_tx.clone(),
    });
    state
        .broker
        .register_transport(&session_id, Arc::clone(&transport));
    // A prompt raised before this client connected is replayed to it.
    if let Some(pending) = state.broker.get_pending_prompt(&session_id) {
        let _ = prompt_tx.try_send(pending.event());
    }

    tracing::info!(session_id = %session_id, "WebSocket client connected");
    run_socket_loop(
        sender,
        receiver,
        progress_rx,
        prompt_rx,
        &session_id,
        &state.broker,
    )
    .await;

    reporter.disconnect(subscriber_id).await;
    state.broker.unregister_transport(&session_id, &transport);
    tracing::info!(session_id = %session_id, "WebSocket client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards progress and prompt events to the client, maps client
/// submit/cancel frames onto the broker, and sends periodic pings. If no
/// Pong arrives within [`PONG_TIMEOUT`] after a Ping, the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut progress_rx: mpsc::Receiver<ProgressEvent>,
    mut prompt_rx: mpsc::Receiver<PromptEvent>,
    session_id: &str,
    broker: &InterruptBroker,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Progress forwarding ─────────────────────────────────
            event = progress_rx.recv() => {
                let Some(event) = event else { break };
                if send_json(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // ── Prompt delivery ─────────────────────────────────────
            event = prompt_rx.recv() => {
                let Some(event) = event else { break };
                if send_json(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // ── Client messages ─────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let ack = handle_client_text(text.as_str(), session_id, broker);
                        if send_json(&mut sender, &ack).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

fn handle_client_text(text: &str, session_id: &str, broker: &InterruptBroker) -> AckMessage {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Submit { value }) => AckMessage::PromptResolved {
            success: broker.submit_input(session_id, &value),
        },
        Ok(ClientMessage::Cancel) => AckMessage::PromptResolved {
            success: broker.cancel_input(session_id),
        },
        Err(e) => {
            tracing::debug!(session_id, error = %e, "Ignoring malformed client frame");
            AckMessage::InvalidMessage {
                error: e.to_string(),
            }
        }
    }
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), ()> {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize WebSocket message");
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

// ── Tests ────────────────────────────────────────────────────────────
