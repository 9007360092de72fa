//! WebSocket channel.
//!
//! Every binary message carries whole or partial length-prefixed frames; the
//! session's parser reassembles them. Ping/pong is answered by axum.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};

use rpcmux_core::link::LinkIo;
use rpcmux_core::{RpcError, TransportKind};

use crate::app_state::AppState;
use crate::transport::serve_link;

// room for the kind byte and both length fields
const FRAME_OVERHEAD: usize = 16;

pub async fn ws_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let limits = app.cfg().limits;
    let max = limits
        .max_json_bytes
        .saturating_add(limits.max_attachment_bytes)
        .saturating_add(FRAME_OVERHEAD);
    ws.max_message_size(max)
        .on_upgrade(move |socket| async move {
            serve_link(&app, socket_io(socket), TransportKind::Socket);
        })
}

/// Adapt an upgraded socket into link halves.
pub fn socket_io(socket: WebSocket) -> LinkIo {
    let (tx, rx) = socket.split();

    let sink = tx
        .sink_map_err(|e| RpcError::transport(e))
        .with(|chunk: Bytes| async move { Ok::<_, RpcError>(Message::Binary(chunk.to_vec())) });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.next().await? {
                Ok(Message::Binary(b)) => return Some((Ok(Bytes::from(b)), rx)),
                Ok(Message::Text(t)) => return Some((Ok(Bytes::from(t)), rx)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some((Err(RpcError::transport(e)), rx)),
            }
        }
    });

    LinkIo::new(sink, stream)
}
