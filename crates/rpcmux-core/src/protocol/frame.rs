//! Length-prefixed frame codec (socket and duplex channels).
//!
//! Layout:
//! `[kind u8][json_len u32 BE][json][attachment_len u32 BE][attachment]`,
//! where the attachment block is present only for `KIND_WITH_ATTACHMENT`.
//!
//! Parsing rules (same as every parser in this crate):
//! - Never index raw buffers, always check `remaining()` first.
//! - Never `unwrap()` / `expect()` / `panic!()`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, RpcError};
use crate::protocol::envelope::{Envelope, Header};
use crate::protocol::FrameLimits;

/// JSON header only.
pub const KIND_JSON: u8 = 0;
/// JSON header followed by one binary attachment block.
pub const KIND_WITH_ATTACHMENT: u8 = 1;

/// Bytes before the JSON body: kind + length.
pub const PREFIX_LEN: usize = 5;

/// Encode one envelope into a complete frame.
pub fn encode_frame(env: &Envelope, limits: &FrameLimits) -> Result<Bytes> {
    let (header, file) = Header::split(env);
    let json = serde_json::to_vec(&header)
        .map_err(|e| RpcError::Internal(format!("envelope encode failed: {e}")))?;
    limits.check_json(json.len())?;

    let attachment_len = file.map(|f| f.len()).unwrap_or(0);
    if file.is_some() {
        limits.check_attachment(attachment_len)?;
    }

    let mut out = BytesMut::with_capacity(PREFIX_LEN + json.len() + 4 + attachment_len);
    out.put_u8(if file.is_some() { KIND_WITH_ATTACHMENT } else { KIND_JSON });
    out.put_u32(len_u32(json.len())?);
    out.put_slice(&json);
    if let Some(f) = file {
        out.put_u32(len_u32(attachment_len)?);
        out.put_slice(&f.bytes);
    }
    Ok(out.freeze())
}

/// Decode exactly one complete frame. Trailing bytes are an error.
pub fn decode_frame(mut buf: Bytes, limits: &FrameLimits) -> Result<Envelope> {
    if buf.remaining() < PREFIX_LEN {
        return Err(RpcError::framing("frame too short"));
    }
    let kind = buf.get_u8();
    check_kind(kind)?;
    let json_len = buf.get_u32() as usize;
    limits.check_json(json_len)?;
    if buf.remaining() < json_len {
        return Err(RpcError::framing("json body truncated"));
    }
    let json = buf.split_to(json_len);
    let header = parse_header(&json)?;

    let file = if kind == KIND_WITH_ATTACHMENT {
        if buf.remaining() < 4 {
            return Err(RpcError::framing("attachment length missing"));
        }
        let n = buf.get_u32() as usize;
        limits.check_attachment(n)?;
        if buf.remaining() < n {
            return Err(RpcError::framing("attachment truncated"));
        }
        Some(buf.split_to(n))
    } else {
        None
    };

    if buf.has_remaining() {
        return Err(RpcError::framing(format!(
            "{} trailing bytes after frame",
            buf.remaining()
        )));
    }
    Ok(header.into_envelope(file))
}

pub(crate) fn check_kind(kind: u8) -> Result<()> {
    match kind {
        KIND_JSON | KIND_WITH_ATTACHMENT => Ok(()),
        other => Err(RpcError::framing(format!("unknown frame kind {other}"))),
    }
}

pub(crate) fn parse_header(json: &[u8]) -> Result<Header> {
    serde_json::from_slice(json).map_err(|e| RpcError::framing(format!("invalid envelope json: {e}")))
}

fn len_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| RpcError::framing(format!("length {n} exceeds u32")))
}
