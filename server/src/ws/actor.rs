use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::chat::scope::UserId;
use crate::presence::{self, registry::HeartbeatOutcome};
use crate::state::AppState;
use crate::ws::broadcast::force_close;
use crate::ws::close_code;
use crate::ws::protocol::{self, ClientMessage, Flow, Session};

/// How long a rejected socket gets to flush its close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

struct AuthRequest {
    user_id: UserId,
    location: Option<String>,
    session_id: Option<String>,
}

/// Run one socket from upgrade to teardown.
///
/// The socket is split: a writer task owns the sink and drains a bounded
/// queue that the rest of the server pushes into, while this task reads.
/// The first frame that matters is `auth`; until it arrives the socket is
/// not registered and receives nothing.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.presence.outbound_buffer.max(1));
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let auth = match timeout(state.presence.auth_timeout(), wait_for_auth(&mut ws_receiver)).await
    {
        Ok(Some(auth)) => auth,
        Ok(None) => {
            tracing::debug!("Socket closed before authenticating");
            writer_handle.abort();
            return;
        }
        Err(_) => {
            tracing::warn!("No auth frame within timeout, closing");
            force_close(&tx, 0, close_code::AUTH_TIMEOUT, "Authentication timeout");
            drop(tx);
            flush_and_close(writer_handle).await;
            return;
        }
    };

    let user_id = auth.user_id;
    let connection_id = match presence::connect(
        &state,
        user_id,
        auth.location,
        auth.session_id,
        tx.clone(),
    )
    .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Failed to admit connection");
            force_close(&tx, user_id, close_code::INTERNAL_ERROR, "Presence unavailable");
            drop(tx);
            flush_and_close(writer_handle).await;
            return;
        }
    };
    let session = Session {
        user_id,
        connection_id,
    };

    tracing::info!(user_id, conn_id = connection_id, "WebSocket actor started");

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    let Some(msg) = protocol::parse(text.as_str(), Some(user_id)) else {
                        continue;
                    };
                    if protocol::dispatch(&state, &session, &tx, msg).await == Flow::Stop {
                        break;
                    }
                }
                Message::Binary(_) => {
                    tracing::debug!(user_id, "Ignoring binary frame");
                }
                Message::Ping(data) => {
                    let _ = tx.try_send(Message::Pong(data));
                    if !touch(&state, &session).await {
                        break;
                    }
                }
                Message::Pong(_) => {
                    if !touch(&state, &session).await {
                        break;
                    }
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    presence::disconnect(&state, user_id, connection_id).await;

    tracing::info!(user_id, conn_id = connection_id, "WebSocket actor stopped");
}

/// Read frames until an `auth` frame arrives. Anything else is ignored.
async fn wait_for_auth(ws_receiver: &mut SplitStream<WebSocket>) -> Option<AuthRequest> {
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match protocol::parse(text.as_str(), None) {
                Some(ClientMessage::Auth {
                    user_id,
                    location,
                    session_id,
                }) => {
                    return Some(AuthRequest {
                        user_id,
                        location,
                        session_id,
                    })
                }
                Some(other) => {
                    tracing::debug!(frame = ?other, "Ignoring frame before auth");
                }
                None => {}
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Protocol-level pings count as heartbeats. Returns false once the
/// connection is no longer the registered one.
async fn touch(state: &AppState, session: &Session) -> bool {
    presence::heartbeat(state, session.user_id, session.connection_id, None).await
        != HeartbeatOutcome::Unknown
}

async fn flush_and_close(writer_handle: JoinHandle<()>) {
    if timeout(CLOSE_FLUSH_TIMEOUT, writer_handle).await.is_err() {
        tracing::debug!("Close frame not flushed in time");
    }
}

/// Forward queued frames to the sink. Stops after sending a close frame.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
}
