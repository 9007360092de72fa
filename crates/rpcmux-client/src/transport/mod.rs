//! Client-side transports.
//!
//! A transport gets one prepared call onto the wire and hands back the raw
//! reply envelopes for its ids. Persistent kinds (socket, duplex) multiplex
//! calls over a managed connection; the plain kind opens one HTTP request
//! per call.

mod persistent;
mod plain;

use std::any::Any;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::mpsc;

use rpcmux_core::{Envelope, Result, TransportKind};

use crate::call::OutboundCall;

pub use persistent::PersistentTransport;
pub use plain::PlainTransport;

pub type ReplySender = mpsc::UnboundedSender<Result<Envelope>>;

/// Reply envelopes for one call. `Err` means the whole call failed.
///
/// Dropping it releases whatever the transport holds for the call.
pub struct ReplyStream {
    rx: mpsc::UnboundedReceiver<Result<Envelope>>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl ReplyStream {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<Envelope>>) -> Self {
        Self { rx, _guard: None }
    }

    /// Keep `guard` alive until the stream is dropped.
    pub fn with_guard<G: Any + Send>(mut self, guard: G) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    pub async fn recv(&mut self) -> Option<Result<Envelope>> {
        self.rx.recv().await
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Envelope>>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Send every invocation of `call`. An `Err` here means nothing was
    /// started and another transport may be tried.
    async fn start(&self, call: &OutboundCall) -> Result<ReplyStream>;

    /// Release long-lived resources.
    async fn close(&self) {}
}
