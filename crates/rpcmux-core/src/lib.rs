//! rpcmux core: wire protocol, correlation and framed links.
//!
//! This crate defines the wire-level contracts shared by the gateway and the
//! client: the envelope model, both framings, the incremental parser, the
//! correlation map and the link that runs one read loop and one serialized
//! writer per physical connection. It carries no network dependencies; the
//! gateway and client crates plug concrete sockets and HTTP bodies into
//! [`link::LinkIo`].
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths surface as `RpcError`/`Result` so a malformed frame can
//! only ever tear down the connection that carried it.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod action;
pub mod correlation;
pub mod error;
pub mod ids;
pub mod link;
pub mod protocol;

pub use action::ActionOutput;
pub use correlation::CorrelationMap;
pub use error::{ActionError, ErrorKind, ErrorPayload, Result, RpcError};
pub use ids::{IdGenerator, TokenIdGenerator, ID_LENGTH};
pub use link::{CloseReason, InboundHandler, LinkHandle, LinkIo, LinkOptions};
pub use protocol::{Attachment, Data, Envelope, FrameLimits, Status, WireFormat};

use serde::{Deserialize, Serialize};

/// Physical channel kinds, in the client's default preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP request whose body is itself a stream, response streamed back.
    Duplex,
    /// Persistent WebSocket.
    Socket,
    /// One HTTP request per call; the response body is a push stream.
    Plain,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Duplex => "duplex",
            TransportKind::Socket => "socket",
            TransportKind::Plain => "plain",
        }
    }

    /// Framing spoken on this channel.
    pub fn wire_format(self) -> WireFormat {
        match self {
            TransportKind::Duplex | TransportKind::Socket => WireFormat::LengthPrefixed,
            TransportKind::Plain => WireFormat::Lines,
        }
    }

    /// Whether the server can call back into the client over this channel.
    pub fn supports_callbacks(self) -> bool {
        !matches!(self, TransportKind::Plain)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
