//! Collaborator seams: the action executor and the parameter validator.

use async_trait::async_trait;
use serde_json::Value;

use rpcmux_core::{ActionError, ActionOutput, Attachment, TransportKind};

use crate::dispatch::caller::ClientCaller;

/// Where an invocation came from.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub transport: TransportKind,
    pub link_id: u64,
    pub invocation_id: String,
}

/// Files uploaded under an invocation id before the invocation itself.
#[derive(Debug, Clone, Default)]
pub struct Files(Vec<Attachment>);

impl Files {
    pub fn new(files: Vec<Attachment>) -> Self {
        Self(files)
    }

    /// First file uploaded under `name`.
    pub fn get(&self, name: &str) -> Option<&Attachment> {
        self.0.iter().find(|f| f.name.as_deref() == Some(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Attachment> {
        self.0
    }
}

/// Everything an action receives.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: String,
    pub params: Value,
    pub ctx: CallContext,
    pub files: Files,
    /// Calls functions the client registered for this invocation.
    pub client: ClientCaller,
}

/// Runs a named action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, req: ActionRequest) -> Result<ActionOutput, ActionError>;
}

/// Checks raw parameters before execution. `Some(errors)` rejects the
/// invocation with a validation error carrying `errors`.
pub trait ParamValidator: Send + Sync {
    fn validate(&self, action: &str, raw: &Value) -> Option<Vec<Value>>;
}

/// Validator that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ParamValidator for AcceptAll {
    fn validate(&self, _action: &str, _raw: &Value) -> Option<Vec<Value>> {
        None
    }
}
