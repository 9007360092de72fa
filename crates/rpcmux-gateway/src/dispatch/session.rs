//! Per-connection server session.
//!
//! Owns what one physical connection carries: files uploaded ahead of their
//! invocation (dropped if it never arrives within the upload TTL), and the
//! pending map for calls the server made into the client. Invocations run as their own tasks; the read loop never waits on
//! them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use rpcmux_core::{
    Attachment, CloseReason, CorrelationMap, Envelope, ErrorPayload, IdGenerator, InboundHandler,
    LinkHandle, RpcError, Status, TokenIdGenerator, TransportKind,
};

use crate::dispatch::caller::{CallbackReply, CallbackTx, ClientCaller};
use crate::dispatch::executor::{CallContext, Files};
use crate::dispatch::Dispatcher;

pub struct Session {
    dispatcher: Arc<Dispatcher>,
    kind: TransportKind,
    uploads: CorrelationMap<Vec<Attachment>>,
    callbacks: CorrelationMap<CallbackTx>,
    ids: Arc<dyn IdGenerator>,
    sweepers: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        kind: TransportKind,
        callback_timeout: Duration,
        upload_ttl: Duration,
        sweep_interval: Duration,
    ) -> Self {
        let uploads = CorrelationMap::new(upload_ttl);
        let callbacks = CorrelationMap::new(callback_timeout);
        let mut sweepers = vec![uploads.spawn_sweeper(sweep_interval)];
        if kind.supports_callbacks() {
            sweepers.push(callbacks.spawn_sweeper(sweep_interval));
        }
        Self {
            dispatcher,
            kind,
            uploads,
            callbacks,
            ids: Arc::new(TokenIdGenerator::new()),
            sweepers,
        }
    }

    fn store_upload(&mut self, env: Envelope) {
        let Envelope { id, data, .. } = env;
        match data.and_then(|d| d.into_file()) {
            Some(file) => {
                tracing::debug!(%id, name = ?file.name, bytes = file.len(), "upload stored");
                self.dispatcher
                    .metrics()
                    .uploads
                    .inc(&[("transport", self.kind.as_str())]);
                let mut files = self.uploads.take(&id).unwrap_or_default();
                files.push(file);
                self.uploads.add(id, files, |id, files: Vec<Attachment>| {
                    tracing::warn!(%id, files = files.len(), "upload expired before its invocation");
                });
            }
            None => tracing::warn!(%id, "upload frame without file data ignored"),
        }
    }

    fn resolve_callback(&mut self, env: Envelope) {
        let Some(tx) = self.callbacks.take(&env.id) else {
            tracing::debug!(id = %env.id, "reply for unknown or expired client call dropped");
            return;
        };
        let reply: CallbackReply = match env.status {
            Status::Ok => Ok(env.json().cloned().unwrap_or(Value::Null)),
            Status::Error => Err(env
                .error
                .unwrap_or_else(|| ErrorPayload::generic(500, "client call failed"))),
        };
        let _ = tx.send(reply);
    }

    fn spawn_invocation(&mut self, link: &LinkHandle, env: Envelope) {
        let files = Files::new(self.uploads.take(&env.id).unwrap_or_default());
        let ctx = CallContext {
            transport: self.kind,
            link_id: link.id(),
            invocation_id: env.id.clone(),
        };
        let client = ClientCaller::new(
            self.kind.supports_callbacks().then(|| link.clone()),
            self.callbacks.clone(),
            Arc::clone(&self.ids),
            env.id.clone(),
            Arc::clone(self.dispatcher.metrics()),
        );
        let dispatcher = Arc::clone(&self.dispatcher);
        let link = link.clone();
        tokio::spawn(async move {
            dispatcher.invoke(&link, env, ctx, files, client).await;
        });
    }
}

impl InboundHandler for Session {
    fn on_envelope(&mut self, link: &LinkHandle, env: Envelope) {
        if env.is_upload() {
            self.store_upload(env);
        } else if env.is_callback() {
            self.resolve_callback(env);
        } else {
            self.spawn_invocation(link, env);
        }
    }

    fn on_closed(&mut self, link: &LinkHandle, reason: CloseReason) {
        let metrics = self.dispatcher.metrics();
        let transport = self.kind.as_str();
        metrics.connections_active.dec(&[("transport", transport)]);
        if let CloseReason::Failed(RpcError::Framing(_)) = &reason {
            metrics.framing_errors.inc(&[("transport", transport)]);
        }

        for (id, tx) in self.callbacks.drain() {
            tracing::debug!(%id, "failing client call; connection closed");
            let _ = tx.send(Err(ErrorPayload::generic(503, "connection closed")));
        }
        for sweeper in self.sweepers.drain(..) {
            sweeper.abort();
        }
        let orphaned = self.uploads.drain();
        if !orphaned.is_empty() {
            tracing::warn!(
                link = link.id(),
                orphaned = orphaned.len(),
                "uploads without a matching invocation discarded"
            );
        }
        tracing::info!(link = link.id(), %transport, reason = ?reason, "session closed");
    }
}
