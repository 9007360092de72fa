//! Envelope model (one wire-level RPC message).
//!
//! The JSON header never carries binary data: a file-like `data` value is
//! split off by the codecs and travels as a sibling attachment block.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ErrorPayload;

/// Reserved pseudo-action used to ship files ahead of an invocation.
pub const UPLOAD_FILE: &str = "UPLOAD_FILE";

/// Envelope status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Binary blob riding alongside an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Attachment {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            name: None,
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Envelope payload: plain JSON or a file.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Json(Value),
    File(Attachment),
}

impl Data {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(v) => Some(v),
            Data::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Attachment> {
        match self {
            Data::File(f) => Some(f),
            Data::Json(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Data::Json(v) => Some(v),
            Data::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<Attachment> {
        match self {
            Data::File(f) => Some(f),
            Data::Json(_) => None,
        }
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Json(v)
    }
}

impl From<Attachment> for Data {
    fn from(a: Attachment) -> Self {
        Data::File(a)
    }
}

/// One wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlation token, unique among outstanding calls on a connection.
    pub id: String,
    /// Operation name (or client function name for callbacks).
    pub action: String,
    pub status: Status,
    pub data: Option<Data>,
    pub error: Option<ErrorPayload>,
    /// `Some(true)` marks the terminal message for this id.
    pub is_last: Option<bool>,
    /// Present only on server->client callbacks and their replies.
    pub client_id: Option<String>,
}

impl Envelope {
    /// Invocation of `action` with JSON parameters.
    pub fn request(id: impl Into<String>, action: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            status: Status::Ok,
            data: Some(Data::Json(params)),
            error: None,
            is_last: None,
            client_id: None,
        }
    }

    /// `UPLOAD_FILE` frame registering `file` under the invocation id.
    pub fn upload(id: impl Into<String>, file: Attachment) -> Self {
        Self {
            id: id.into(),
            action: UPLOAD_FILE.into(),
            status: Status::Ok,
            data: Some(Data::File(file)),
            error: None,
            is_last: None,
            client_id: None,
        }
    }

    /// Successful update; `is_last` marks the terminal one.
    pub fn ok(id: impl Into<String>, action: impl Into<String>, data: Option<Data>, is_last: bool) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            status: Status::Ok,
            data,
            error: None,
            is_last: is_last.then_some(true),
            client_id: None,
        }
    }

    /// Terminal error.
    pub fn error(id: impl Into<String>, action: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            status: Status::Error,
            data: None,
            error: Some(error),
            is_last: Some(true),
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Terminal envelopes end the correlation entry for their id.
    pub fn is_terminal(&self) -> bool {
        self.is_last == Some(true) || self.status == Status::Error
    }

    pub fn is_upload(&self) -> bool {
        self.action == UPLOAD_FILE && self.client_id.is_none()
    }

    pub fn is_callback(&self) -> bool {
        self.client_id.is_some()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.data.as_ref().and_then(Data::as_file)
    }

    /// JSON parameters or payload, if the data is not a file.
    pub fn json(&self) -> Option<&Value> {
        self.data.as_ref().and_then(Data::as_json)
    }
}

/// JSON header shared by both codecs.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Header {
    pub id: String,
    pub action: String,
    pub status: Status,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_last: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_file: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

// `data: null` must survive as `Some(Null)`; only an absent field is `None`.
fn present<'de, D>(d: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(d).map(Some)
}

impl Header {
    /// Split an envelope into its JSON header and optional attachment.
    pub(crate) fn split(env: &Envelope) -> (Header, Option<&Attachment>) {
        let (data, file) = match &env.data {
            None => (None, None),
            Some(Data::Json(v)) => (Some(v.clone()), None),
            Some(Data::File(f)) => (Some(Value::Null), Some(f)),
        };
        let header = Header {
            id: env.id.clone(),
            action: env.action.clone(),
            status: env.status,
            data,
            error: env.error.clone(),
            is_last: env.is_last,
            client_id: env.client_id.clone(),
            with_file: None,
            file_size: None,
            file_name: file.and_then(|f| f.name.clone()),
            file_type: file.and_then(|f| f.content_type.clone()),
        };
        (header, file)
    }

    /// Rebuild the envelope, reattaching `file` to `data` when present.
    pub(crate) fn into_envelope(self, file: Option<Bytes>) -> Envelope {
        let data = match file {
            Some(bytes) => Some(Data::File(Attachment {
                name: self.file_name,
                content_type: self.file_type,
                bytes,
            })),
            None if self.with_file == Some(true) => None,
            None => self.data.map(Data::Json),
        };
        Envelope {
            id: self.id,
            action: self.action,
            status: self.status,
            data,
            error: self.error,
            is_last: self.is_last,
            client_id: self.client_id,
        }
    }
}
