//! Streamed HTTP channels.
//!
//! Both read the request body incrementally and answer with a response body
//! fed by the link writer, so results flow back while the request is still
//! being read. The response ends once the session and every running
//! invocation have let go of the link.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use rpcmux_core::link::{self, LinkIo};
use rpcmux_core::{RpcError, TransportKind, WireFormat};

use crate::app_state::AppState;
use crate::transport::serve_link;

/// `POST` duplex: length-prefixed frames both ways, callbacks supported.
pub async fn duplex(State(app): State<AppState>, body: Body) -> Response {
    serve_streamed(&app, body, TransportKind::Duplex)
}

/// `POST` plain: one request body of lines, response pushed as lines.
pub async fn plain(State(app): State<AppState>, body: Body) -> Response {
    serve_streamed(&app, body, TransportKind::Plain)
}

fn serve_streamed(app: &AppState, body: Body, kind: TransportKind) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(app.cfg().gateway.write_queue);
    let inbound = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|e| RpcError::transport(e)));
    let io = LinkIo {
        sink: link::channel_sink(tx),
        stream: Box::pin(inbound),
    };
    serve_link(app, io, kind);

    let content_type = match kind.wire_format() {
        WireFormat::LengthPrefixed => "application/octet-stream",
        WireFormat::Lines => "application/x-ndjson",
    };
    (
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(link::channel_stream(rx)),
    )
        .into_response()
}
