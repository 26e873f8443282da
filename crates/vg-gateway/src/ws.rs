//! The client WebSocket handler (component C7): frames/parses the client
//! protocol, buffers control messages until the session exists, answers
//! `ping` immediately even before the session is ready, and guarantees a
//! single `stop()` on close.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use vg_protocol::{ClientMessage, ServerMessage};

use crate::session::{Outbound, Session};
use crate::state::AppState;

pub async fn session_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let ws_msg = match frame {
                Outbound::Json(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::warn!("failed to serialize outbound message: {e}");
                        continue;
                    }
                },
                Outbound::Binary(bytes) => Message::Binary(bytes),
            };
            if sink.send(ws_msg).await.is_err() {
                break;
            }
        }
    });

    let (id, deps) = state.new_session_deps();
    let create = Session::create(id.clone(), deps, outbound_tx.clone());
    tokio::pin!(create);

    // Pre-open: buffer control messages (other than `ping`, answered inline)
    // until the session finishes constructing.
    let mut buffered: Vec<ClientMessage> = Vec::new();
    let session = loop {
        tokio::select! {
            biased;
            session = &mut create => break session,
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Ping) => {
                            let _ = outbound_tx.send(Outbound::Json(ServerMessage::Pong));
                        }
                        Ok(other) => buffered.push(other),
                        Err(e) => tracing::debug!("ignoring unparseable pre-open message: {e}"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        writer.abort();
                        return;
                    }
                    _ => {}
                }
            }
        }
    };

    state.insert_session(id.clone(), Arc::clone(&session));
    session.start();

    for msg in buffered {
        dispatch(&session, &outbound_tx, msg).await;
    }

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => dispatch(&session, &outbound_tx, msg).await,
                Err(e) => tracing::debug!("ignoring malformed client message: {e}"),
            },
            Some(Ok(Message::Binary(bytes))) => session.on_audio(&bytes),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!("client websocket read error: {e}");
                break;
            }
        }
    }

    session.stop().await;
    state.remove_session(&id);
    writer.abort();
}

async fn dispatch(
    session: &Arc<Session>,
    outbound: &mpsc::UnboundedSender<Outbound>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::AudioReady => session.on_audio_ready(),
        ClientMessage::Cancel => session.on_cancel().await,
        ClientMessage::Reset => session.on_reset().await,
        ClientMessage::Ping => {
            let _ = outbound.send(Outbound::Json(ServerMessage::Pong));
        }
    }
}
