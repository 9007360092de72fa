//! Call builder and the fan-in of per-action results.
//!
//! A call bundles N actions. Each gets its own correlation id; the call's
//! output ends once all N have seen their terminal envelope.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use serde_json::Value;

use rpcmux_core::error::{Result, RpcError};
use rpcmux_core::{
    ActionError, Attachment, Data, Envelope, ErrorPayload, FrameLimits, IdGenerator, TransportKind,
    WireFormat,
};

use crate::client_actions::ClientActions;
use crate::retry::RetryPolicy;
use crate::transport::ReplyStream;

/// What the caller asks for.
#[derive(Debug, Default)]
pub struct Call {
    actions: Vec<(String, Value)>,
    files: Vec<(String, Attachment)>,
    client_actions: ClientActions,
    retry: Option<RetryPolicy>,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an action and its parameters.
    pub fn action(mut self, name: impl Into<String>, params: Value) -> Self {
        let name = name.into();
        match self.actions.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = params,
            None => self.actions.push((name, params)),
        }
        self
    }

    /// Upload `file` for `action` ahead of its invocation.
    pub fn file(mut self, action: impl Into<String>, file: Attachment) -> Self {
        self.files.push((action.into(), file));
        self
    }

    /// Expose a function the server may call while this call runs.
    pub fn client_action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
    {
        self.client_actions.register(name, f);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub(crate) fn prepare(self, ids: &dyn IdGenerator) -> Result<(OutboundCall, Option<RetryPolicy>)> {
        if self.actions.is_empty() {
            return Err(RpcError::Config("call has no actions".into()));
        }
        let mut invocations: Vec<Invocation> = self
            .actions
            .into_iter()
            .map(|(action, params)| Invocation::new(ids.next_id(), action, params))
            .collect();
        for (action, file) in self.files {
            let inv = invocations
                .iter_mut()
                .find(|inv| inv.action == action)
                .ok_or_else(|| RpcError::Config(format!("file for unknown action {action}")))?;
            inv.files.push(file);
        }
        Ok((OutboundCall::new(invocations, self.client_actions), self.retry))
    }
}

/// One action of a call, with its correlation id.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: String,
    pub action: String,
    pub params: Value,
    pub files: Vec<Attachment>,
}

impl Invocation {
    pub fn new(id: impl Into<String>, action: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            params,
            files: Vec::new(),
        }
    }

    /// Upload frames first, then the invocation itself.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.files
            .iter()
            .map(|f| Envelope::upload(self.id.clone(), f.clone()))
            .chain(std::iter::once(Envelope::request(
                self.id.clone(),
                self.action.clone(),
                self.params.clone(),
            )))
            .collect()
    }

    pub fn frames(&self, format: WireFormat, limits: &FrameLimits) -> Result<Vec<Bytes>> {
        self.envelopes()
            .iter()
            .map(|env| format.encode(env, limits))
            .collect()
    }
}

/// A prepared call as handed to transports.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    invocations: Vec<Invocation>,
    client_actions: Arc<ClientActions>,
}

impl OutboundCall {
    pub fn new(invocations: Vec<Invocation>, client_actions: ClientActions) -> Self {
        Self {
            invocations,
            client_actions: Arc::new(client_actions),
        }
    }

    pub fn invocations(&self) -> &[Invocation] {
        &self.invocations
    }

    pub fn client_actions(&self) -> &Arc<ClientActions> {
        &self.client_actions
    }

    pub fn action_of(&self, id: &str) -> Option<&str> {
        self.invocations
            .iter()
            .find(|inv| inv.id == id)
            .map(|inv| inv.action.as_str())
    }
}

/// One result envelope, attributed to its action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionUpdate {
    pub id: String,
    pub action: String,
    pub data: Option<Data>,
    pub error: Option<ErrorPayload>,
    pub is_last: bool,
}

impl ActionUpdate {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn json(&self) -> Option<&Value> {
        self.data.as_ref().and_then(Data::as_json)
    }
}

/// Settled outcome of one action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResult {
    /// Every value received, in order.
    pub values: Vec<Data>,
    pub error: Option<ErrorPayload>,
}

impl ActionResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Last JSON value received.
    pub fn value(&self) -> Option<&Value> {
        self.values.iter().rev().find_map(Data::as_json)
    }

    pub fn file(&self) -> Option<&Attachment> {
        self.values.iter().rev().find_map(Data::as_file)
    }
}

/// Fan-in of every action's updates; ends once each action is terminal.
///
/// A transport failure is yielded once as `Err` and ends the stream.
pub struct CallStream {
    replies: ReplyStream,
    actions: HashMap<String, String>,
    finished: HashSet<String>,
    transport: TransportKind,
    done: bool,
}

impl CallStream {
    pub(crate) fn new(call: &OutboundCall, replies: ReplyStream, transport: TransportKind) -> Self {
        let actions = call
            .invocations()
            .iter()
            .map(|inv| (inv.id.clone(), inv.action.clone()))
            .collect();
        Self {
            replies,
            actions,
            finished: HashSet::new(),
            transport,
            done: false,
        }
    }

    /// Channel the call went out on.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn remaining(&self) -> usize {
        self.actions.len() - self.finished.len()
    }
}

impl Stream for CallStream {
    type Item = Result<ActionUpdate>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done || this.finished.len() == this.actions.len() {
                return Poll::Ready(None);
            }
            let env = match ready!(this.replies.poll_recv(cx)) {
                Some(Ok(env)) => env,
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.done = true;
                    return Poll::Ready(Some(Err(RpcError::Closed)));
                }
            };

            let Some(action) = this.actions.get(&env.id) else {
                tracing::debug!(id = %env.id, "reply for id outside this call dropped");
                continue;
            };
            if this.finished.contains(&env.id) {
                continue;
            }
            let is_last = env.is_terminal();
            let update = ActionUpdate {
                id: env.id,
                action: action.clone(),
                data: env.data,
                error: env.error,
                is_last,
            };
            if is_last {
                this.finished.insert(update.id.clone());
            }
            return Poll::Ready(Some(Ok(update)));
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rpcmux_core::protocol::UPLOAD_FILE;
    use rpcmux_core::{TokenIdGenerator, ID_LENGTH};
    use serde_json::json;

    #[test]
    fn prepare_assigns_ids_and_attaches_files() {
        let ids = TokenIdGenerator::new();
        let call = Call::new()
            .action("getUser", json!({ "id": 1 }))
            .action("getPosts", json!({ "page": 1 }))
            .action("getUser", json!({ "id": 2 }))
            .file("getUser", Attachment::new(&b"png"[..]).named("avatar"));

        let (out, retry) = call.prepare(&ids).unwrap();
        assert!(retry.is_none());
        assert_eq!(out.invocations().len(), 2);

        let user = &out.invocations()[0];
        assert_eq!(user.action, "getUser");
        assert_eq!(user.params, json!({ "id": 2 }));
        assert_eq!(user.id.len(), ID_LENGTH);
        assert_eq!(out.action_of(&user.id), Some("getUser"));

        let envs = user.envelopes();
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0].action, UPLOAD_FILE);
        assert_eq!(envs[0].id, user.id);
        assert_eq!(envs[1].action, "getUser");
    }

    #[test]
    fn prepare_rejects_bad_calls() {
        let ids = TokenIdGenerator::new();
        assert!(Call::new().prepare(&ids).is_err());

        let orphan = Call::new()
            .action("a", json!({}))
            .file("b", Attachment::new(&b"x"[..]));
        assert!(matches!(orphan.prepare(&ids), Err(RpcError::Config(_))));
    }
}
