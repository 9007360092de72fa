//! Calls multiplexed over a managed socket or duplex connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use rpcmux_core::{Result, RpcError, TransportKind};

use crate::call::OutboundCall;
use crate::connection::{ConnectionManager, PendingCall};
use crate::transport::{ReplyStream, Transport};

pub struct PersistentTransport {
    manager: ConnectionManager,
}

impl PersistentTransport {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

/// Unregisters a call's ids once its reply stream is dropped.
struct PendingGuard {
    manager: ConnectionManager,
    ids: Vec<String>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        for id in &self.ids {
            self.manager.unregister(id);
        }
    }
}

#[async_trait]
impl Transport for PersistentTransport {
    fn kind(&self) -> TransportKind {
        self.manager.kind()
    }

    async fn start(&self, call: &OutboundCall) -> Result<ReplyStream> {
        let Some(link) = self.manager.connection().await else {
            let why = self
                .manager
                .last_error()
                .unwrap_or_else(|| "no connection".into());
            return Err(RpcError::Transport(why));
        };

        let limits = self.manager.limits();
        let mut encoded = Vec::with_capacity(call.invocations().len());
        for inv in call.invocations() {
            encoded.push((inv, inv.frames(link.format(), &limits)?));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = PendingGuard {
            manager: self.manager.clone(),
            ids: Vec::with_capacity(encoded.len()),
        };
        for (inv, frames) in &encoded {
            let pending = PendingCall::new(
                inv.action.clone(),
                tx.clone(),
                frames.clone(),
                call.client_actions().clone(),
            );
            if !self.manager.register(&inv.id, pending) {
                return Err(RpcError::Internal(format!("duplicate call id {}", inv.id)));
            }
            guard.ids.push(inv.id.clone());
        }
        drop(tx);

        for (inv, frames) in encoded {
            for frame in frames {
                link.send_frame(frame).await?;
            }
            tracing::debug!(link = link.id(), id = %inv.id, action = %inv.action, "invocation sent");
        }
        Ok(ReplyStream::new(rx).with_guard(guard))
    }

    async fn close(&self) {
        self.manager.close();
    }
}
