//! Server-side dispatch.
//!
//! Executor and validator seams, the action table, the per-invocation
//! dispatcher and the per-connection session that feeds it.

pub mod caller;
pub mod dispatcher;
pub mod executor;
pub mod session;
pub mod table;

pub use caller::ClientCaller;
pub use dispatcher::Dispatcher;
pub use executor::{AcceptAll, ActionExecutor, ActionRequest, CallContext, Files, ParamValidator};
pub use session::Session;
pub use table::ActionTable;
