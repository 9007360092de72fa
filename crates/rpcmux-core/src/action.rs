//! What an action produces, decided once when the action returns.

use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::Attachment;

/// Incremental results of a streaming action.
pub type ValueStream = BoxStream<'static, Result<Value, ActionError>>;

pub enum ActionOutput {
    /// One value, sent as a terminal `ok` envelope.
    Single(Value),
    /// Zero or more updates followed by a terminal envelope without data.
    Sequence(ValueStream),
    /// One file, sent as an attachment on a terminal envelope.
    File(Attachment),
}

impl ActionOutput {
    pub fn sequence<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, ActionError>> + Send + 'static,
    {
        ActionOutput::Sequence(stream.boxed())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ActionOutput::Single(_) => "single",
            ActionOutput::Sequence(_) => "sequence",
            ActionOutput::File(_) => "file",
        }
    }
}

impl From<Value> for ActionOutput {
    fn from(v: Value) -> Self {
        ActionOutput::Single(v)
    }
}

impl From<Attachment> for ActionOutput {
    fn from(a: Attachment) -> Self {
        ActionOutput::File(a)
    }
}

impl std::fmt::Debug for ActionOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionOutput::Single(v) => f.debug_tuple("Single").field(v).finish(),
            ActionOutput::Sequence(_) => f.write_str("Sequence(..)"),
            ActionOutput::File(a) => f.debug_tuple("File").field(&a.len()).finish(),
        }
    }
}
