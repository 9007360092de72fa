//! Owner of one persistent connection.
//!
//! Lifecycle: `Disconnected -> Connecting -> Open`, and on an unexpected
//! close either `Reconnecting -> Connecting` (while calls are pending) or back
//! to `Disconnected`. `close()` is final.
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an
//! await. Every connection gets a generation number; callbacks from an old
//! link or a stale reconnect timer compare it and bail out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use rpcmux_core::link::{self, CloseReason, InboundHandler, LinkHandle, LinkOptions};
use rpcmux_core::{
    CorrelationMap, Data, Envelope, ErrorPayload, FrameLimits, RpcError, TransportKind,
};

use crate::client_actions::ClientActions;
use crate::config::{ClientConfig, ReconnectConfig};
use crate::connection::Connector;
use crate::transport::ReplySender;

type ConnectFuture = Shared<BoxFuture<'static, Option<LinkHandle>>>;

/// Waiter for one invocation id.
#[derive(Clone)]
pub(crate) struct PendingCall {
    pub action: String,
    pub tx: ReplySender,
    /// Upload frames followed by the request frame, replayed after a reconnect.
    pub frames: Vec<Bytes>,
    pub actions: Arc<ClientActions>,
    /// Set once the server showed any sign of running the invocation.
    started: Arc<AtomicBool>,
}

impl PendingCall {
    pub fn new(
        action: String,
        tx: ReplySender,
        frames: Vec<Bytes>,
        actions: Arc<ClientActions>,
    ) -> Self {
        Self {
            action,
            tx,
            frames,
            actions,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

enum Phase {
    Disconnected,
    Connecting(ConnectFuture),
    Open(LinkHandle),
    Reconnecting(JoinHandle<()>),
    Closed,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting(_) => "connecting",
            Phase::Open(_) => "open",
            Phase::Reconnecting(_) => "reconnecting",
            Phase::Closed => "closed",
        }
    }
}

struct State {
    phase: Phase,
    pending_ids: HashSet<String>,
    attempts: u32,
    generation: u64,
    closing: bool,
    last_error: Option<String>,
    sweeper: Option<JoinHandle<()>>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    opts: LinkOptions,
    sweep_interval: std::time::Duration,
    pending: CorrelationMap<PendingCall>,
    state: Mutex<State>,
}

/// Cloneable handle; clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: &ClientConfig) -> Self {
        let opts = LinkOptions::new(connector.kind().wire_format()).with_limits(config.limits);
        Self {
            inner: Arc::new(Inner {
                connector,
                reconnect: config.reconnect,
                opts,
                sweep_interval: config.sweep_interval(),
                pending: CorrelationMap::new(config.timeout()),
                state: Mutex::new(State {
                    phase: Phase::Disconnected,
                    pending_ids: HashSet::new(),
                    attempts: 0,
                    generation: 0,
                    closing: false,
                    last_error: None,
                    sweeper: None,
                }),
            }),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.connector.kind()
    }

    pub fn limits(&self) -> FrameLimits {
        self.inner.opts.limits
    }

    /// The open link, or the outcome of one connect attempt shared by every
    /// concurrent caller. `None` when the attempt failed or the manager is
    /// closed; see [`last_error`](Self::last_error).
    pub async fn connection(&self) -> Option<LinkHandle> {
        let fut = {
            let mut st = self.inner.state();
            if st.closing {
                return None;
            }
            match &st.phase {
                Phase::Open(h) if !h.is_closed() => return Some(h.clone()),
                Phase::Connecting(f) => f.clone(),
                _ => {
                    if let Phase::Reconnecting(timer) = &st.phase {
                        timer.abort();
                    }
                    let fut = Arc::clone(&self.inner).connect_once().boxed().shared();
                    st.phase = Phase::Connecting(fut.clone());
                    fut
                }
            }
        };
        fut.await
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state().last_error.clone()
    }

    pub fn is_open(&self) -> bool {
        matches!(&self.inner.state().phase, Phase::Open(h) if !h.is_closed())
    }

    pub fn is_closing(&self) -> bool {
        self.inner.state().closing
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state().attempts
    }

    pub fn phase(&self) -> &'static str {
        self.inner.state().phase.name()
    }

    /// Outstanding work keeps the connection worth reconnecting.
    pub fn mark_request_pending(&self, id: impl Into<String>) {
        self.inner.state().pending_ids.insert(id.into());
    }

    pub fn mark_request_completed(&self, id: &str) {
        self.inner.state().pending_ids.remove(id);
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state().pending_ids.len()
    }

    pub(crate) fn register(&self, id: &str, call: PendingCall) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let added = self.inner.pending.add(id, call, move |id, call: PendingCall| {
            tracing::debug!(%id, action = %call.action, "action timed out");
            if let Some(inner) = weak.upgrade() {
                inner.state().pending_ids.remove(&id);
            }
            let timeout = ErrorPayload::timeout(&call.action);
            let _ = call.tx.send(Ok(Envelope::error(id, call.action, timeout)));
        });
        if added {
            self.mark_request_pending(id);
        }
        added
    }

    pub(crate) fn unregister(&self, id: &str) {
        self.inner.pending.delete(id);
        self.mark_request_completed(id);
    }

    /// Final: no reconnects afterwards and every waiter fails with `Closed`.
    pub fn close(&self) {
        let (handle, ids) = {
            let mut st = self.inner.state();
            st.closing = true;
            let handle = match std::mem::replace(&mut st.phase, Phase::Closed) {
                Phase::Open(h) => Some(h),
                Phase::Reconnecting(timer) => {
                    timer.abort();
                    None
                }
                _ => None,
            };
            if let Some(sweeper) = st.sweeper.take() {
                sweeper.abort();
            }
            (handle, std::mem::take(&mut st.pending_ids))
        };
        if let Some(h) = handle {
            h.close();
        }
        self.inner.fail(ids, |_| RpcError::Closed);
        tracing::debug!(kind = %self.kind(), "connection manager closed");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state();
        f.debug_struct("ConnectionManager")
            .field("kind", &self.inner.connector.kind())
            .field("phase", &st.phase.name())
            .field("pending", &st.pending_ids.len())
            .field("attempts", &st.attempts)
            .finish()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect_once(self: Arc<Self>) -> Option<LinkHandle> {
        let kind = self.connector.kind();
        let io = match self.connector.connect().await {
            Ok(io) => io,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "connect failed");
                let failed = {
                    let mut st = self.state();
                    st.last_error = Some(e.to_string());
                    if st.closing {
                        return None;
                    }
                    st.phase = Phase::Disconnected;
                    self.after_loss(&mut st)
                };
                self.fail_lost(failed);
                return None;
            }
        };

        let (handle, generation) = {
            let mut st = self.state();
            if st.closing {
                return None;
            }
            st.generation += 1;
            let generation = st.generation;
            let handler = ClientInbound {
                inner: Arc::downgrade(&self),
                generation,
            };
            let handle = link::spawn(io, self.opts, handler);
            st.phase = Phase::Open(handle.clone());
            st.attempts = 0;
            st.last_error = None;
            if st.sweeper.is_none() {
                st.sweeper = Some(self.pending.spawn_sweeper(self.sweep_interval));
            }
            (handle, generation)
        };
        tracing::info!(%kind, link = handle.id(), generation, "connection open");
        self.replay(&handle);
        Some(handle)
    }

    /// Decide what to do after the connection went away. Schedules a
    /// reconnect while calls are pending and attempts remain; otherwise
    /// returns the ids whose waiters must fail.
    fn after_loss(self: &Arc<Self>, st: &mut State) -> HashSet<String> {
        if st.pending_ids.is_empty() {
            return HashSet::new();
        }
        if st.attempts >= self.reconnect.max_attempts {
            tracing::warn!(
                kind = %self.connector.kind(),
                attempts = st.attempts,
                pending = st.pending_ids.len(),
                "giving up on reconnect"
            );
            st.phase = Phase::Disconnected;
            return std::mem::take(&mut st.pending_ids);
        }

        let delay = self.reconnect.delay_for(st.attempts);
        st.attempts += 1;
        let generation = st.generation;
        tracing::info!(
            kind = %self.connector.kind(),
            attempt = st.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect_fire(generation).await;
            }
        });
        st.phase = Phase::Reconnecting(timer);
        HashSet::new()
    }

    async fn reconnect_fire(self: Arc<Self>, generation: u64) {
        let fut = {
            let mut st = self.state();
            if st.closing
                || st.generation != generation
                || !matches!(st.phase, Phase::Reconnecting(_))
            {
                return;
            }
            if st.pending_ids.is_empty() {
                st.phase = Phase::Disconnected;
                return;
            }
            let fut = Arc::clone(&self).connect_once().boxed().shared();
            st.phase = Phase::Connecting(fut.clone());
            fut
        };
        // failure reschedules itself inside connect_once
        let _ = fut.await;
    }

    fn handle_disconnect(self: &Arc<Self>, generation: u64, reason: &CloseReason) {
        let started = self.started_calls();
        let (failed, started) = {
            let mut st = self.state();
            if st.closing || st.generation != generation {
                return;
            }
            match &st.phase {
                Phase::Open(h) => h.close(),
                // a caller already noticed and is connecting again
                Phase::Connecting(_) => return,
                _ => {}
            }
            tracing::info!(
                kind = %self.connector.kind(),
                reason = ?reason,
                pending = st.pending_ids.len(),
                "connection lost"
            );
            st.last_error = Some(match reason {
                CloseReason::Failed(e) => e.to_string(),
                _ => "connection closed by peer".into(),
            });
            st.phase = Phase::Disconnected;
            // only calls the server never acted on are safe to send again
            for id in &started {
                st.pending_ids.remove(id);
            }
            (self.after_loss(&mut st), started)
        };
        if !started.is_empty() {
            tracing::info!(calls = started.len(), "failing calls interrupted mid-flight");
        }
        self.fail(started, |id| {
            RpcError::transport(format!("connection lost while {id} was running"))
        });
        self.fail_lost(failed);
    }

    /// Pending ids that already received a reply or a callback.
    fn started_calls(&self) -> HashSet<String> {
        let ids: Vec<String> = self.state().pending_ids.iter().cloned().collect();
        ids.into_iter()
            .filter(|id| self.pending.get(id).is_some_and(|call| call.is_started()))
            .collect()
    }

    fn fail_lost(&self, ids: HashSet<String>) {
        if ids.is_empty() {
            return;
        }
        let why = self
            .state()
            .last_error
            .clone()
            .unwrap_or_else(|| "connection lost".into());
        self.fail(ids, |_| RpcError::transport(&why));
    }

    fn fail(&self, ids: HashSet<String>, err: impl Fn(&str) -> RpcError) {
        for id in ids {
            if let Some(call) = self.pending.take(&id) {
                let _ = call.tx.send(Err(err(&id)));
            }
        }
    }

    /// Resend the frames of every pending call the server has not started
    /// on a fresh link.
    fn replay(&self, handle: &LinkHandle) {
        let ids: Vec<String> = self.state().pending_ids.iter().cloned().collect();
        let frames: Vec<Bytes> = ids
            .iter()
            .filter_map(|id| self.pending.get(id))
            .filter(|call| !call.is_started())
            .flat_map(|call| call.frames)
            .collect();
        if frames.is_empty() {
            return;
        }
        tracing::info!(link = handle.id(), calls = ids.len(), "replaying pending calls");
        let handle = handle.clone();
        tokio::spawn(async move {
            for frame in frames {
                if let Err(e) = handle.send_frame(frame).await {
                    tracing::warn!(link = handle.id(), error = %e, "replay failed");
                    return;
                }
            }
        });
    }

    fn route_reply(&self, env: Envelope) {
        if env.is_terminal() {
            match self.pending.take(&env.id) {
                Some(call) => {
                    self.state().pending_ids.remove(&env.id);
                    let _ = call.tx.send(Ok(env));
                }
                None => tracing::debug!(id = %env.id, "late reply dropped"),
            }
            return;
        }
        match self.pending.get(&env.id) {
            Some(call) => {
                call.mark_started();
                self.pending.refresh(&env.id);
                let _ = call.tx.send(Ok(env));
            }
            None => tracing::debug!(id = %env.id, "update for unknown id dropped"),
        }
    }

    fn run_client_action(&self, link: &LinkHandle, invocation: String, env: Envelope) {
        let actions = self.pending.get(&invocation).map(|call| {
            call.mark_started();
            call.actions
        });
        // a callback is progress for the invocation that triggered it
        self.pending.refresh(&invocation);
        let link = link.clone();
        tokio::spawn(async move {
            let Envelope {
                id, action, data, ..
            } = env;
            let params = data.and_then(Data::into_json).unwrap_or(Value::Null);
            let outcome = match actions {
                Some(actions) => actions.call(&action, params).await,
                None => Err(ErrorPayload::generic(
                    404,
                    format!("no pending call {invocation} for client function {action}"),
                )),
            };
            let reply = match outcome {
                Ok(v) => Envelope::ok(id, action, Some(Data::Json(v)), true),
                Err(p) => Envelope::error(id, action, p),
            }
            .with_client_id(invocation);
            if let Err(e) = link.send(&reply).await {
                tracing::warn!(link = link.id(), error = %e, "callback reply not sent");
            }
        });
    }
}

struct ClientInbound {
    inner: Weak<Inner>,
    generation: u64,
}

impl InboundHandler for ClientInbound {
    fn on_envelope(&mut self, link: &LinkHandle, env: Envelope) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match env.client_id.clone() {
            Some(invocation) => inner.run_client_action(link, invocation, env),
            None => inner.route_reply(env),
        }
    }

    fn on_closed(&mut self, _link: &LinkHandle, reason: CloseReason) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_disconnect(self.generation, &reason);
        }
    }
}
