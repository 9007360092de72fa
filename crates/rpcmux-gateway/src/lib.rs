//! rpcmux gateway library entry.
//!
//! Wires config, the three physical channels, the dispatcher and the ops
//! endpoints into one axum application. Consumed by the binary (`main.rs`)
//! and by integration tests, which supply their own action tables.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod obs;
pub mod ops;
pub mod router;
pub mod server;
pub mod services;
pub mod transport;

pub use app_state::AppState;
pub use config::GatewayConfig;
pub use dispatch::{
    AcceptAll, ActionExecutor, ActionRequest, ActionTable, CallContext, ClientCaller, Files,
    ParamValidator,
};
pub use server::Gateway;
