//! Wire protocol modules.
//!
//! Two framings share one envelope model:
//! - Length-prefixed binary frames for the socket and duplex channels.
//! - Newline-delimited JSON with trailing raw blobs for the plain channel.
//!
//! All parsers are panic-free: malformed input is reported as `RpcError`
//! instead of panicking or indexing raw buffers, so a hostile peer can only
//! ever tear down its own connection.

pub mod accumulator;
pub mod envelope;
pub mod frame;
pub mod lines;
pub mod parser;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};

pub use accumulator::ByteAccumulator;
pub use envelope::{Attachment, Data, Envelope, Status, UPLOAD_FILE};
pub use parser::{FinalizeOptions, StreamParser};

/// Which framing a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    LengthPrefixed,
    Lines,
}

impl WireFormat {
    /// Encode one envelope under this framing.
    pub fn encode(self, env: &Envelope, limits: &FrameLimits) -> Result<Bytes> {
        match self {
            WireFormat::LengthPrefixed => frame::encode_frame(env, limits),
            WireFormat::Lines => lines::encode_line(env, limits),
        }
    }
}

/// Upper bounds applied by encoders and parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameLimits {
    #[serde(default = "default_max_json_bytes")]
    pub max_json_bytes: usize,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_json_bytes: default_max_json_bytes(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

impl FrameLimits {
    pub fn check_json(&self, n: usize) -> Result<()> {
        if n > self.max_json_bytes {
            return Err(RpcError::framing(format!(
                "json length {n} exceeds limit {}",
                self.max_json_bytes
            )));
        }
        Ok(())
    }

    pub fn check_attachment(&self, n: usize) -> Result<()> {
        if n > self.max_attachment_bytes {
            return Err(RpcError::framing(format!(
                "attachment length {n} exceeds limit {}",
                self.max_attachment_bytes
            )));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_json_bytes < 64 {
            return Err(RpcError::Config("limits.max_json_bytes must be at least 64".into()));
        }
        if self.max_json_bytes > u32::MAX as usize || self.max_attachment_bytes > u32::MAX as usize {
            return Err(RpcError::Config("limits must fit in a u32 length prefix".into()));
        }
        Ok(())
    }
}

fn default_max_json_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_max_attachment_bytes() -> usize {
    64 * 1024 * 1024
}
