//! Websocket transport adapter: bridges one socket onto a connection
//! actor and its outbound queue. The payload cap is enforced here;
//! oversize frames fail the socket and the connection dies with it.

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use crate::state::AppState;

use super::{ConnectionActor, ConnectionHandle, Outbound};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
  let cap = state.config.server.max_payload_size;
  ws.max_message_size(cap)
    .max_frame_size(cap)
    .on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
  let (mut sink, mut stream) = socket.split();
  let (handle, mut outbound) = ConnectionHandle::channel();

  // Writer: drains the outbound queue onto the socket in send order.
  let writer = tokio::spawn(async move {
    while let Some(out) = outbound.recv().await {
      let result = match out {
        Outbound::Text(text) => sink.send(Message::Text(text.into())).await,
        Outbound::Binary(bytes) => sink.send(Message::Binary(bytes)).await,
        Outbound::Close => {
          let _ = sink.send(Message::Close(None)).await;
          break;
        }
      };
      if result.is_err() {
        break;
      }
    }
  });

  let mut actor = ConnectionActor::new(state, handle.clone());
  while let Some(message) = stream.next().await {
    match message {
      Ok(Message::Text(text)) => actor.on_text(&text).await,
      Ok(Message::Binary(raw)) => actor.on_binary(raw).await,
      Ok(Message::Close(_)) => break,
      Ok(_) => {} // ping/pong are handled by the stack
      Err(e) => {
        debug!(connection = %handle.id(), "socket error: {}", e);
        break;
      }
    }
  }

  actor.close().await;
  let _ = writer.await;
}
