//! `/ws` upgrade handler: bridges a single `RealtimeHub` subscription onto a
//! websocket connection (§4.4).
//!
//! The connection's first text frame is read as a `Filter` and used to
//! register with the hub; if none arrives within the read deadline the
//! connection is treated as "subscribe to everything". The filter is fixed
//! for the lifetime of the connection — there is no in-band way to widen or
//! narrow it later, matching the hub's one-shot `Command::Register`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::time::Duration;

use super::AppState;
use crate::realtime::{Filter, PING_INTERVAL_SECS, READ_DEADLINE_SECS, WRITE_DEADLINE_SECS};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let Some(hub) = state.hub else {
        return;
    };

    let (mut sender, mut receiver) = socket.split();

    let filter = match tokio::time::timeout(Duration::from_secs(READ_DEADLINE_SECS), receiver.next()).await
    {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<Filter>(&text).unwrap_or_default(),
        _ => Filter {
            all_events: true,
            ..Default::default()
        },
    };

    let Some((client_id, mut events)) = hub.register(filter).await else {
        let _ = sender
            .send(Message::Text(
                serde_json::json!({"error": "realtime hub unavailable"}).to_string(),
            ))
            .await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    let write_deadline = Duration::from_secs(WRITE_DEADLINE_SECS);
    let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping_interval.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                match tokio::time::timeout(write_deadline, sender.send(Message::Text(payload))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unregister(client_id).await;
}
