//! Explicit action table.
//!
//! Built once before the router. Typed entries deserialize parameters into
//! `P` and serialize results from `R`; a parameter shape mismatch is reported
//! through [`ParamValidator`] as a validation error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use rpcmux_core::{ActionError, ActionOutput};

use crate::dispatch::executor::{ActionExecutor, ActionRequest, ParamValidator};

type Handler =
    Arc<dyn Fn(ActionRequest) -> BoxFuture<'static, Result<ActionOutput, ActionError>> + Send + Sync>;
type Check = Arc<dyn Fn(&Value) -> Option<Vec<Value>> + Send + Sync>;

struct Entry {
    handler: Handler,
    check: Option<Check>,
}

#[derive(Default)]
pub struct ActionTable {
    entries: HashMap<String, Entry>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Untyped handler; sees raw params and decides its own output shape.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionOutput, ActionError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |req: ActionRequest| f(req).boxed());
        self.insert(name.into(), handler, None)
    }

    /// Single-result handler with typed params and result.
    pub fn typed<P, R, F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P, ActionRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ActionError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler: Handler = Arc::new(move |req: ActionRequest| {
            let f = Arc::clone(&f);
            async move {
                let params = decode_params::<P>(&req.params)?;
                let out = f(params, req).await?;
                Ok(ActionOutput::Single(encode_result(&out)?))
            }
            .boxed()
        });
        self.insert(name.into(), handler, Some(check_params::<P>()))
    }

    /// Streaming handler: every item becomes one non-terminal update.
    pub fn typed_stream<P, R, F, S>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, ActionRequest) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<R, ActionError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler: Handler = Arc::new(move |req: ActionRequest| {
            let f = Arc::clone(&f);
            async move {
                let params = decode_params::<P>(&req.params)?;
                let items = f(params, req).map(|item| item.and_then(|r| encode_result(&r)));
                Ok(ActionOutput::sequence(items))
            }
            .boxed()
        });
        self.insert(name.into(), handler, Some(check_params::<P>()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn insert(&mut self, name: String, handler: Handler, check: Option<Check>) -> &mut Self {
        if self.entries.contains_key(&name) {
            tracing::warn!(action = %name, "action registered twice; keeping the latest");
        }
        self.entries.insert(name, Entry { handler, check });
        self
    }
}

#[async_trait]
impl ActionExecutor for ActionTable {
    async fn execute(&self, req: ActionRequest) -> Result<ActionOutput, ActionError> {
        let handler = self
            .entries
            .get(&req.action)
            .map(|e| Arc::clone(&e.handler))
            .ok_or_else(|| {
                ActionError::new(format!("unknown action: {}", req.action)).with_code(404)
            })?;
        handler(req).await
    }
}

impl ParamValidator for ActionTable {
    fn validate(&self, action: &str, raw: &Value) -> Option<Vec<Value>> {
        self.entries
            .get(action)
            .and_then(|e| e.check.as_ref())
            .and_then(|check| check(raw))
    }
}

fn check_params<P: DeserializeOwned>() -> Check {
    Arc::new(|raw: &Value| {
        P::deserialize(raw)
            .err()
            .map(|e| vec![json!({ "message": e.to_string() })])
    })
}

fn decode_params<P: DeserializeOwned>(raw: &Value) -> Result<P, ActionError> {
    P::deserialize(raw).map_err(|e| ActionError::new(format!("invalid params: {e}")))
}

fn encode_result<R: Serialize>(r: &R) -> Result<Value, ActionError> {
    serde_json::to_value(r)
        .map_err(|e| ActionError::new(format!("result encode failed: {e}")).with_code(500))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct ById {
        #[allow(dead_code)]
        id: String,
    }

    #[test]
    fn typed_entries_validate_param_shape() {
        let mut table = ActionTable::new();
        table.typed("getUser", |_: ById, _req| async { Ok::<_, ActionError>(json!({})) });

        assert!(table.validate("getUser", &json!({"id": "1"})).is_none());
        let errors = table.validate("getUser", &json!({})).unwrap_or_default();
        assert_eq!(errors.len(), 1);
        assert!(table.validate("unknown", &json!(null)).is_none());
        assert_eq!(table.names(), vec!["getUser"]);
    }
}
