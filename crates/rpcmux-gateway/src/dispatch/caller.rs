//! Server-initiated calls into functions the client registered.
//!
//! The request goes out as `{id: fresh, action: function, data: params,
//! clientId: invocation id}`; the client answers with the same `id` and
//! `clientId`, which the session routes back here through the pending map.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use rpcmux_core::{ActionError, CorrelationMap, Envelope, ErrorPayload, IdGenerator, LinkHandle};

use crate::obs::GatewayMetrics;

pub(crate) type CallbackReply = Result<Value, ErrorPayload>;
pub(crate) type CallbackTx = oneshot::Sender<CallbackReply>;

#[derive(Clone)]
pub struct ClientCaller {
    link: Option<LinkHandle>,
    pending: CorrelationMap<CallbackTx>,
    ids: Arc<dyn IdGenerator>,
    invocation_id: String,
    metrics: Arc<GatewayMetrics>,
}

impl ClientCaller {
    pub(crate) fn new(
        link: Option<LinkHandle>,
        pending: CorrelationMap<CallbackTx>,
        ids: Arc<dyn IdGenerator>,
        invocation_id: String,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            link,
            pending,
            ids,
            invocation_id,
            metrics,
        }
    }

    /// Whether the channel this invocation arrived on can carry callbacks.
    pub fn is_available(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.is_closed())
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Call `function` on the client and wait for its result.
    pub async fn call(&self, function: &str, params: Value) -> Result<Value, ActionError> {
        let Some(link) = &self.link else {
            self.metrics.callbacks.inc(&[("outcome", "unavailable")]);
            return Err(ActionError::new(format!(
                "client function {function} cannot be called on this channel"
            ))
            .with_code(501));
        };

        let id = self.ids.next_id();
        let (tx, rx) = oneshot::channel();
        let expired_fn = function.to_string();
        let metrics = Arc::clone(&self.metrics);
        self.pending.add(id.clone(), tx, move |id, tx| {
            tracing::debug!(%id, function = %expired_fn, "client call timed out");
            metrics.callbacks.inc(&[("outcome", "timeout")]);
            let _ = tx.send(Err(ErrorPayload::timeout(&expired_fn)));
        });

        let req = Envelope::request(id.clone(), function, params).with_client_id(&self.invocation_id);
        if let Err(e) = link.send(&req).await {
            self.pending.delete(&id);
            self.metrics.callbacks.inc(&[("outcome", "error")]);
            return Err(e.into());
        }

        match rx.await {
            Ok(Ok(v)) => {
                self.metrics.callbacks.inc(&[("outcome", "ok")]);
                Ok(v)
            }
            Ok(Err(payload)) => {
                if payload.code != 408 {
                    self.metrics.callbacks.inc(&[("outcome", "error")]);
                }
                Err(payload.into())
            }
            Err(_) => Err(ActionError::new("connection closed").with_code(503)),
        }
    }

    /// Typed variant of [`ClientCaller::call`].
    pub async fn call_typed<P, R>(&self, function: &str, params: &P) -> Result<R, ActionError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| ActionError::new(format!("params encode failed: {e}")).with_code(500))?;
        let out = self.call(function, params).await?;
        serde_json::from_value(out)
            .map_err(|e| ActionError::new(format!("client result decode failed: {e}")))
    }
}

impl std::fmt::Debug for ClientCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCaller")
            .field("invocation_id", &self.invocation_id)
            .field("available", &self.is_available())
            .finish()
    }
}
