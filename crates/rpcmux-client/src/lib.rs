//! rpcmux client: multi-action calls over the best available channel.
//!
//! A [`Call`] bundles several named actions; [`Client::stream`] sends them
//! together and yields each action's updates as they arrive, while
//! [`Client::fetch`] waits for every action to settle. Functions registered
//! on the call can be invoked by the server while it runs.
//!
//! Channels are tried in the configured order (duplex, socket, plain by
//! default). Persistent channels reconnect with backoff while calls are
//! outstanding and replay those calls on the new connection.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod call;
pub mod client;
pub mod client_actions;
pub mod config;
pub mod connection;
pub mod retry;
pub mod selector;
pub mod transport;

pub use call::{ActionResult, ActionUpdate, Call, CallStream, Invocation, OutboundCall};
pub use client::Client;
pub use client_actions::ClientActions;
pub use config::{ClientConfig, ReconnectConfig};
pub use connection::{ConnectionManager, Connector, DuplexConnector, SocketConnector};
pub use retry::RetryPolicy;
pub use selector::TransportSelector;
pub use transport::{PersistentTransport, PlainTransport, ReplyStream, Transport};
