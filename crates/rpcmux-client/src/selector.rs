//! Transport downgrade chain.
//!
//! Candidates are tried in order; the first one that gets a call onto the
//! wire is remembered. When the remembered one fails to establish, the call
//! fails and the cache is cleared, so the next call walks the chain again.

use std::sync::{Arc, Mutex, PoisonError};

use rpcmux_core::{Result, RpcError, TransportKind};

use crate::call::OutboundCall;
use crate::transport::{ReplyStream, Transport};

pub struct TransportSelector {
    candidates: Vec<Arc<dyn Transport>>,
    working: Mutex<Option<usize>>,
}

impl TransportSelector {
    pub fn new(candidates: Vec<Arc<dyn Transport>>) -> Self {
        Self {
            candidates,
            working: Mutex::new(None),
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = TransportKind> + '_ {
        self.candidates.iter().map(|t| t.kind())
    }

    /// Kind that carried the last successful call, if still trusted.
    pub fn working_kind(&self) -> Option<TransportKind> {
        self.working()
            .and_then(|i| self.candidates.get(i))
            .map(|t| t.kind())
    }

    pub async fn start(&self, call: &OutboundCall) -> Result<(TransportKind, ReplyStream)> {
        if let Some((i, t)) = self
            .working()
            .and_then(|i| self.candidates.get(i).map(|t| (i, t)))
        {
            return match t.start(call).await {
                Ok(replies) => Ok((t.kind(), replies)),
                Err(e) => {
                    if e.is_establishment() {
                        tracing::warn!(kind = %t.kind(), error = %e, "working transport failed; chain restarts on next call");
                        self.invalidate(i);
                    }
                    Err(e)
                }
            };
        }

        let mut failures = Vec::with_capacity(self.candidates.len());
        for (i, t) in self.candidates.iter().enumerate() {
            match t.start(call).await {
                Ok(replies) => {
                    tracing::info!(kind = %t.kind(), "transport selected");
                    *self.working.lock().unwrap_or_else(PoisonError::into_inner) = Some(i);
                    return Ok((t.kind(), replies));
                }
                Err(e) if e.is_establishment() => {
                    tracing::debug!(kind = %t.kind(), error = %e, "transport unavailable");
                    failures.push((t.kind().as_str().to_string(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        Err(RpcError::AllTransportsFailed(failures))
    }

    pub async fn close(&self) {
        for t in &self.candidates {
            t.close().await;
        }
    }

    fn working(&self) -> Option<usize> {
        *self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate(&self, i: usize) {
        let mut working = self.working.lock().unwrap_or_else(PoisonError::into_inner);
        if *working == Some(i) {
            *working = None;
        }
    }
}
