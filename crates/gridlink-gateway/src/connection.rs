//! Subscriber connection lifecycle: initial snapshot, writer task, read loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gridlink_core::Command;
use gridlink_core::protocol::close_code;

use crate::events::broadcast_grid;
use crate::state::{GatewayState, Subscriber};

const SLOW_SUBSCRIBER_REASON: &str = "connection too slow to keep up with messages";
const SHUTDOWN_REASON: &str = "server shutting down";

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

/// Handle a new subscriber socket until either side closes it.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    let gateway = state.config.gateway();
    let write_timeout = Duration::from_secs(gateway.write_timeout_secs);
    info!(conn_id = %conn_id, "New subscriber");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<String>(gateway.subscriber_message_buffer.max(1));
    let close_slow = CancellationToken::new();

    // Snapshot and registration happen under one grid lock so no update is missed.
    let initial = {
        let grid = state.grid.read().await;
        let frame = Command::FromGridBuffer(grid.snapshot()).to_frame();
        state.subscribers.write().await.insert(
            conn_id.clone(),
            Subscriber {
                conn_id: conn_id.clone(),
                msgs: msg_tx,
                close_slow: close_slow.clone(),
            },
        );
        frame
    };

    let initial = match initial {
        Ok(frame) => frame,
        Err(e) => {
            warn!(conn_id = %conn_id, %e, "Failed to encode initial snapshot");
            cleanup_connection(&state, &conn_id).await;
            return;
        }
    };
    match tokio::time::timeout(write_timeout, ws_tx.send(Message::Text(initial.into()))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!(conn_id = %conn_id, %e, "Failed to send initial snapshot");
            cleanup_connection(&state, &conn_id).await;
            return;
        }
        Err(_) => {
            warn!(conn_id = %conn_id, "Initial snapshot write timed out");
            cleanup_connection(&state, &conn_id).await;
            return;
        }
    }

    let shutdown = state.shutdown.clone();
    let writer_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.cancelled() => close_message(close_code::GOING_AWAY, SHUTDOWN_REASON),
                _ = close_slow.cancelled() => {
                    close_message(close_code::POLICY_VIOLATION, SLOW_SUBSCRIBER_REASON)
                }
                next = msg_rx.recv() => match next {
                    Some(text) => Message::Text(text.into()),
                    None => break,
                },
            };

            let closing = matches!(msg, Message::Close(_));
            match tokio::time::timeout(write_timeout, ws_tx.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(conn_id = %writer_conn_id, %e, "Subscriber write failed");
                    break;
                }
                Err(_) => {
                    warn!(conn_id = %writer_conn_id, "Subscriber write timed out");
                    break;
                }
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            next = ws_rx.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    apply_client_frame(&state, &conn_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(
                        conn_id = %conn_id,
                        code = frame.as_ref().map(|f| f.code),
                        "Subscriber requested close"
                    );
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, %e, "WebSocket error");
                    break;
                }
                None => break,
            },
        }
    }

    send_task.abort();
    cleanup_connection(&state, &conn_id).await;
    info!(conn_id = %conn_id, "Subscriber disconnected");
}

/// Apply one inbound frame to the authoritative grid.
///
/// `setled` toggles a cell and `levelMap` replaces the grid; either one is
/// followed by a snapshot to every subscriber. Everything else is dropped.
/// Returns whether the grid changed.
pub(crate) async fn apply_client_frame(state: &GatewayState, conn_id: &str, text: &str) -> bool {
    let command = match Command::parse(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(conn_id = %conn_id, %e, "Dropping malformed frame");
            return false;
        }
    };

    let result = match &command {
        Command::SetLed { x, y } => state.grid.write().await.toggle(*x, *y).map(|_| ()),
        Command::LevelMap(levels) => state.grid.write().await.replace(levels),
        Command::FromGridBuffer(_) | Command::Unknown(_) => {
            debug!(conn_id = %conn_id, cmd = command.tag(), "Ignoring frame");
            return false;
        }
    };

    if let Err(e) = result {
        warn!(conn_id = %conn_id, cmd = command.tag(), %e, "Rejected frame");
        return false;
    }

    let version = state.bump_grid_version();
    debug!(conn_id = %conn_id, cmd = command.tag(), version, "Grid updated");
    if let Err(e) = broadcast_grid(state).await {
        warn!(%e, "Failed to broadcast grid");
    }
    true
}

async fn cleanup_connection(state: &GatewayState, conn_id: &str) {
    state.subscribers.write().await.remove(conn_id);
}
