//! Top-level facade crate for rpcmux.
//!
//! Re-exports the wire core, the gateway and the client so applications can
//! depend on a single crate.

pub mod core {
    pub use rpcmux_core::*;
}

pub mod gateway {
    pub use rpcmux_gateway::*;
}

pub mod client {
    pub use rpcmux_client::*;
}

pub use rpcmux_client::{Call, Client, ClientConfig};
pub use rpcmux_core::{ActionError, ActionOutput, Attachment, Data, ErrorPayload, RpcError, TransportKind};
pub use rpcmux_gateway::{ActionTable, AppState, Gateway, GatewayConfig};
