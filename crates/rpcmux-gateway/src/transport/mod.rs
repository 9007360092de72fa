//! Physical channels.
//!
//! Each accepted connection is adapted into a [`LinkIo`] and served by one
//! [`Session`]:
//! - `ws`: persistent WebSocket, length-prefixed frames in binary messages;
//! - `http`: duplex (streamed request and response bodies, length-prefixed)
//!   and plain (line-oriented request body, streamed line response).

pub mod http;
pub mod ws;

use rpcmux_core::link::{self, LinkIo, LinkOptions};
use rpcmux_core::{LinkHandle, TransportKind};

use crate::app_state::AppState;
use crate::dispatch::Session;

/// Serve one connection of kind `kind` until either side closes it.
pub fn serve_link(app: &AppState, io: LinkIo, kind: TransportKind) -> LinkHandle {
    let cfg = app.cfg();
    let mut opts = LinkOptions::new(kind.wire_format()).with_limits(cfg.limits);
    opts.write_queue = cfg.gateway.write_queue;
    if kind == TransportKind::Plain {
        // the request body may be cut right after a withFile line
        opts = opts.tolerate_missing_attachment();
    }

    let session = Session::new(
        app.dispatcher(),
        kind,
        cfg.gateway.callback_timeout(),
        cfg.gateway.upload_ttl(),
        cfg.gateway.sweep_interval(),
    );

    let metrics = app.metrics();
    metrics
        .connections_opened
        .inc(&[("transport", kind.as_str())]);
    metrics
        .connections_active
        .inc(&[("transport", kind.as_str())]);

    let handle = link::spawn(io, opts, session);
    tracing::info!(link = handle.id(), transport = %kind, "session opened");
    handle
}
