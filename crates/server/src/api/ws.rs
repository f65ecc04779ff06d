use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use control_api::{Coordinator, CoordinatorError};
use fanout::{Delivery, Topic};
use futures::{stream, SinkExt, StreamExt};
use shared::{
    domain::SessionId,
    error::{ApiError, ErrorCode},
    protocol::{ProducerCommand, ServerEvent},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{reject, Rejection};
use crate::app_state::AppState;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let session_id = SessionId(session_id);
    state
        .coordinator
        .current_cursor(session_id)
        .await
        .map_err(reject)?;
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, session_id)))
}

/// Full state for a consumer that is joining or has fallen behind.
async fn snapshot(coordinator: &Coordinator, session_id: SessionId) -> ServerEvent {
    let loaded = async {
        let cursor = coordinator.current_cursor(session_id).await?;
        let items = coordinator.list_items(session_id).await?;
        Ok::<_, CoordinatorError>(ServerEvent::Snapshot { cursor, items })
    };
    match loaded.await {
        Ok(event) => event,
        Err(err) => ServerEvent::Error(ApiError::from(err)),
    }
}

/// Keeps a consumer's cursor moving forward. A snapshot can be newer than
/// frames still queued on the receiver; those are dropped instead of sent.
#[derive(Debug, Default)]
pub(crate) struct CursorWatermark {
    last_version: Option<i64>,
}

impl CursorWatermark {
    /// Whether `event` should reach the consumer. Records the version of every
    /// cursor-carrying frame it lets through.
    pub(crate) fn admit(&mut self, event: &ServerEvent) -> bool {
        let version = match event {
            ServerEvent::CursorChanged { cursor } => {
                if self.last_version.is_some_and(|last| cursor.version <= last) {
                    return false;
                }
                cursor.version
            }
            ServerEvent::Snapshot { cursor, .. } => cursor.version,
            ServerEvent::QueueChanged { .. } | ServerEvent::Error(_) => return true,
        };
        self.last_version = Some(self.last_version.map_or(version, |last| last.max(version)));
        true
    }
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, session_id: SessionId) {
    let (mut sender, mut receiver) = socket.split();
    let broadcaster = state.coordinator.broadcaster().clone();
    let topics = [Topic::Cursor(session_id), Topic::Queue(session_id)];

    // Subscribe before reading the snapshot so no commit falls in between.
    let frames = stream::select(
        broadcaster.subscribe(topics[0]).into_stream(),
        broadcaster.subscribe(topics[1]).into_stream(),
    );
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerEvent>();
    info!(session_id = session_id.0, "consumer attached");

    let coordinator = state.coordinator.clone();
    let send_task = tokio::spawn(async move {
        let mut frames = Box::pin(frames);
        let mut watermark = CursorWatermark::default();
        let mut next = Some(snapshot(&coordinator, session_id).await);
        loop {
            match next.take() {
                Some(event) if watermark.admit(&event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(_) => debug!(session_id = session_id.0, "stale cursor frame dropped"),
                None => {}
            }
            next = tokio::select! {
                frame = frames.next() => match frame {
                    Some(Delivery::Event(event)) => Some(event),
                    Some(Delivery::Lagged(skipped)) => {
                        warn!(
                            session_id = session_id.0,
                            skipped,
                            "consumer lagged; resending snapshot"
                        );
                        Some(snapshot(&coordinator, session_id).await)
                    }
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(event) => Some(event),
                    None => break,
                },
            };
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let command = match serde_json::from_str::<ProducerCommand>(&text) {
            Ok(command) => command,
            Err(err) => {
                let _ = reply_tx.send(ServerEvent::Error(ApiError::new(
                    ErrorCode::Validation,
                    format!("malformed command: {err}"),
                )));
                continue;
            }
        };
        debug!(session_id = session_id.0, ?command, "producer command");
        if let Err(err) = state.coordinator.apply(session_id, command).await {
            let (_, Json(api_error)) = reject(err);
            let _ = reply_tx.send(ServerEvent::Error(api_error));
        }
    }

    send_task.abort();
    let _ = send_task.await;
    for topic in topics {
        broadcaster.unsubscribe(topic);
    }
    info!(session_id = session_id.0, "consumer detached");
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
