//! Framed link over one physical connection.
//!
//! A link owns exactly one read loop and one writer task:
//! - the read loop feeds inbound chunks to a `StreamParser` and hands every
//!   envelope to an [`InboundHandler`], which must not block;
//! - the writer serializes whole frames onto the sink and acknowledges each
//!   write, so frames never interleave on the wire.
//!
//! The writer ends when the link is closed or when every [`LinkHandle`] is
//! dropped; the latter lets in-flight work finish writing after the peer
//! half-closed its side.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, PollSender};

use crate::error::{Result, RpcError};
use crate::protocol::{Envelope, FinalizeOptions, FrameLimits, StreamParser, WireFormat};

pub type ChunkSink = Pin<Box<dyn Sink<Bytes, Error = RpcError> + Send>>;
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

const SINK_CLOSE_GRACE: Duration = Duration::from_secs(1);

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Raw byte halves of a physical connection.
pub struct LinkIo {
    pub sink: ChunkSink,
    pub stream: ChunkStream,
}

impl LinkIo {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Bytes, Error = RpcError> + Send + 'static,
        St: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Two in-process ends wired back to back.
    pub fn pair(capacity: usize) -> (LinkIo, LinkIo) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        let a = LinkIo {
            sink: channel_sink(a_tx),
            stream: channel_stream(b_rx),
        };
        let b = LinkIo {
            sink: channel_sink(b_tx),
            stream: channel_stream(a_rx),
        };
        (a, b)
    }
}

/// Sink half over a bounded channel.
pub fn channel_sink(tx: mpsc::Sender<Bytes>) -> ChunkSink {
    Box::pin(PollSender::new(tx).sink_map_err(|_| RpcError::Closed))
}

/// Stream half over a bounded channel; ends when every sender is dropped.
pub fn channel_stream(rx: mpsc::Receiver<Bytes>) -> ChunkStream {
    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok(chunk), rx))
    }))
}

#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    pub format: WireFormat,
    pub limits: FrameLimits,
    pub finalize: FinalizeOptions,
    pub write_queue: usize,
}

impl LinkOptions {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            limits: FrameLimits::default(),
            finalize: FinalizeOptions::default(),
            write_queue: 256,
        }
    }

    pub fn with_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn tolerate_missing_attachment(mut self) -> Self {
        self.finalize.tolerate_missing_attachment = true;
        self
    }
}

/// Why the read side of a link ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer finished sending.
    Eof,
    /// Closed locally.
    Cancelled,
    /// Framing or transport failure; the link has been torn down.
    Failed(RpcError),
}

/// Receives everything the read loop decodes.
pub trait InboundHandler: Send + 'static {
    /// Called for every decoded envelope, in wire order. Must not block:
    /// long work is spawned, never awaited here.
    fn on_envelope(&mut self, link: &LinkHandle, env: Envelope);

    /// Called exactly once when the read side ends.
    fn on_closed(&mut self, link: &LinkHandle, reason: CloseReason);
}

struct WriteOp {
    frame: Bytes,
    done: oneshot::Sender<Result<()>>,
}

struct Shared {
    id: u64,
    format: WireFormat,
    limits: FrameLimits,
    cancel: CancellationToken,
}

/// Cloneable write side of a link.
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<WriteOp>,
    shared: Arc<Shared>,
}

impl LinkHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn format(&self) -> WireFormat {
        self.shared.format
    }

    /// Encode `env` under this link's framing.
    pub fn encode(&self, env: &Envelope) -> Result<Bytes> {
        self.shared.format.encode(env, &self.shared.limits)
    }

    /// Encode and write one envelope; resolves once the frame hit the sink.
    pub async fn send(&self, env: &Envelope) -> Result<()> {
        let frame = self.encode(env)?;
        self.send_frame(frame).await
    }

    /// Write one pre-encoded frame.
    pub async fn send_frame(&self, frame: Bytes) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(RpcError::Closed);
        }
        let (done, wait) = oneshot::channel();
        self.tx
            .send(WriteOp { frame, done })
            .await
            .map_err(|_| RpcError::Closed)?;
        wait.await.map_err(|_| RpcError::Closed)?
    }

    /// Tear the link down: the read loop stops and the writer closes the sink.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the link has been torn down.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("id", &self.shared.id)
            .field("format", &self.shared.format)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Start the read loop and writer for `io`.
pub fn spawn<H: InboundHandler>(io: LinkIo, opts: LinkOptions, handler: H) -> LinkHandle {
    let LinkIo { sink, stream } = io;
    let (tx, rx) = mpsc::channel(opts.write_queue.max(1));
    let shared = Arc::new(Shared {
        id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
        format: opts.format,
        limits: opts.limits,
        cancel: CancellationToken::new(),
    });
    let handle = LinkHandle { tx, shared };

    tracing::debug!(link = handle.id(), format = ?opts.format, "link started");
    tokio::spawn(write_loop(sink, rx, handle.shared.cancel.clone(), handle.id()));
    tokio::spawn(read_loop(stream, handle.clone(), opts, handler));
    handle
}

async fn write_loop(
    mut sink: ChunkSink,
    mut rx: mpsc::Receiver<WriteOp>,
    cancel: CancellationToken,
    link: u64,
) {
    loop {
        let op = tokio::select! {
            _ = cancel.cancelled() => break,
            op = rx.recv() => match op {
                Some(op) => op,
                None => break,
            },
        };

        let res = tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::Closed),
            r = sink.send(op.frame) => r,
        };
        let failed = res.is_err();
        if let Err(e) = &res {
            tracing::warn!(link, error = %e, "link write failed");
        }
        let _ = op.done.send(res);
        if failed {
            cancel.cancel();
            break;
        }
    }

    rx.close();
    while let Ok(op) = rx.try_recv() {
        let _ = op.done.send(Err(RpcError::Closed));
    }
    let _ = tokio::time::timeout(SINK_CLOSE_GRACE, sink.close()).await;
    tracing::debug!(link, "link writer stopped");
}

async fn read_loop<H: InboundHandler>(
    mut stream: ChunkStream,
    handle: LinkHandle,
    opts: LinkOptions,
    mut handler: H,
) {
    let mut parser = StreamParser::new(opts.format, opts.limits);
    let cancel = handle.shared.cancel.clone();

    let reason = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break CloseReason::Cancelled,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => match parser.feed(chunk) {
                Ok(envs) => {
                    for env in envs {
                        handler.on_envelope(&handle, env);
                    }
                }
                Err(e) => break CloseReason::Failed(e),
            },
            Some(Err(e)) => break CloseReason::Failed(e),
            None => match parser.finalize(opts.finalize) {
                Ok(envs) => {
                    for env in envs {
                        handler.on_envelope(&handle, env);
                    }
                    break CloseReason::Eof;
                }
                Err(e) => break CloseReason::Failed(e),
            },
        }
    };

    match &reason {
        CloseReason::Failed(e) => {
            tracing::warn!(link = handle.id(), error = %e, "link read failed; tearing down");
            handle.close();
        }
        other => tracing::debug!(link = handle.id(), reason = ?other, "link read side ended"),
    }
    handler.on_closed(&handle, reason);
}
