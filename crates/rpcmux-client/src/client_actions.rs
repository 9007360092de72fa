//! Functions a call exposes to the server.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use rpcmux_core::{ActionError, ErrorPayload};

type ClientFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ActionError>> + Send + Sync>;

/// Name → function table attached to one call.
#[derive(Clone, Default)]
pub struct ClientActions {
    fns: HashMap<String, ClientFn>,
}

impl ClientActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        let f: ClientFn = Arc::new(move |params: Value| f(params).boxed());
        self.fns.insert(name.into(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }

    /// Run `name`; a missing function is a generic 404.
    pub async fn call(&self, name: &str, params: Value) -> Result<Value, ErrorPayload> {
        let Some(f) = self.fns.get(name).cloned() else {
            return Err(ErrorPayload::generic(
                404,
                format!("client function not found: {name}"),
            ));
        };
        f(params).await.map_err(ActionError::into_payload)
    }
}

impl std::fmt::Debug for ClientActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.fns.keys().collect();
        names.sort();
        f.debug_struct("ClientActions").field("fns", &names).finish()
    }
}
