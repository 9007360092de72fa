//! Persistent connections: how a physical channel is opened, and the manager
//! that owns it.

mod duplex;
mod manager;
mod socket;

use async_trait::async_trait;

use rpcmux_core::link::LinkIo;
use rpcmux_core::{Result, TransportKind};

pub use duplex::DuplexConnector;
pub use manager::ConnectionManager;
pub(crate) use manager::PendingCall;
pub use socket::SocketConnector;

/// Opens a fresh physical connection on demand.
///
/// Called on first use and after every unexpected disconnect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    async fn connect(&self) -> Result<LinkIo>;
}
