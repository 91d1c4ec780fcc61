//! Signaling WebSocket
//!
//! Viewers send `{"action":"Connect","stream":<name>,"data":<offer>}` and get
//! back `{"action":"Connect","status":200,"stream":<name>,"data":<answer>}`.
//! Each message is processed on its own task so a slow negotiation never
//! blocks the reader; replies go through a bounded queue to a single writer
//! that also sends keepalive pings.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chakra_relay::SessionDescription;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::AppState;

pub const ACTION_CONNECT: &str = "Connect";

/// Largest inbound message accepted from a viewer
const MAX_MESSAGE_SIZE: usize = 6072;

/// Time allowed to read the next pong from the viewer
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period, shorter than `PONG_WAIT`
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Time allowed to write one frame
const WRITE_WAIT: Duration = Duration::from_secs(10);

const SEND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignalMessage {
    pub action: String,
    pub stream: String,
    pub data: Option<SessionDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SessionDescription>,
}

impl SignalResponse {
    /// Bare status reply
    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self {
            action: String::new(),
            status,
            stream: String::new(),
            data: None,
        }
    }
}

pub async fn signaling_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("Signaling connection established");

    let (sink, receiver) = socket.split();
    let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(write_pump(sink, rx, cancel.clone()));
    read_pump(receiver, state, tx, &cancel).await;

    cancel.cancel();
    let _ = writer.await;
    debug!("Signaling connection closed");
}

async fn read_pump(
    mut receiver: SplitStream<WebSocket>,
    state: AppState,
    tx: mpsc::Sender<SignalResponse>,
    cancel: &CancellationToken,
) {
    let mut deadline = Instant::now() + PONG_WAIT;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = timeout_at(deadline, receiver.next()) => next,
        };

        let message = match next {
            Err(_) => {
                debug!("Signaling client missed pong deadline");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "Signaling read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Pong(_) => deadline = Instant::now() + PONG_WAIT,
            Message::Text(text) => {
                let state = state.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = process_message(&state, text.as_str()).await {
                        let _ = tx.send(response).await;
                    }
                });
            }
            _ => {}
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<SignalResponse>,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            response = rx.recv() => {
                let Some(response) = response else { break };
                match serde_json::to_string(&response) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!(error = %e, "Failed to encode signaling response");
                        continue;
                    }
                }
            }
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(WRITE_WAIT, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "Signaling write failed");
                break;
            }
            Err(_) => {
                debug!("Signaling write timed out");
                break;
            }
        }
    }

    // Unblock the reader when the writer gives up first
    cancel.cancel();
    let _ = timeout(WRITE_WAIT, sink.close()).await;
}

/// Handle one inbound message. `None` means nothing is sent back.
pub async fn process_message(state: &AppState, text: &str) -> Option<SignalResponse> {
    let message: SignalMessage = match serde_json::from_str(text.trim()) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Invalid signaling message");
            return None;
        }
    };

    if message.action.is_empty() || message.stream.is_empty() {
        return None;
    }

    let Some(stream) = state.registry.get_stream_by_name(&message.stream).await else {
        return Some(SignalResponse {
            stream: message.stream,
            ..SignalResponse::status(404)
        });
    };

    match message.action.as_str() {
        ACTION_CONNECT => {
            let Some(offer) = message.data else {
                return Some(SignalResponse::status(400));
            };

            match state.negotiator.create_peer(&stream, offer).await {
                Ok(answer) => {
                    info!(stream_id = %stream.id(), name = %stream.name(), "Viewer negotiated");
                    Some(SignalResponse {
                        action: ACTION_CONNECT.to_string(),
                        status: 200,
                        stream: stream.name().to_string(),
                        data: Some(answer),
                    })
                }
                Err(e) => {
                    warn!(stream_id = %stream.id(), error = %e, "Viewer negotiation failed");
                    Some(SignalResponse::status(500))
                }
            }
        }
        other => {
            debug!(action = other, "Ignoring unknown signaling action");
            None
        }
    }
}
