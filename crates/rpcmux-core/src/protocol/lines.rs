//! Line-oriented codec (plain request/response channel).
//!
//! Each envelope is one JSON object followed by `\n`. An attachment is
//! announced in the line with `withFile: true` and `fileSize: N`; the next
//! `ID_LENGTH + N` raw bytes are the correlation id followed by the file.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, RpcError};
use crate::ids::ID_LENGTH;
use crate::protocol::envelope::{Envelope, Header};
use crate::protocol::FrameLimits;

/// Encode one envelope as a line plus optional raw attachment block.
pub fn encode_line(env: &Envelope, limits: &FrameLimits) -> Result<Bytes> {
    let (mut header, file) = Header::split(env);
    if let Some(f) = file {
        if env.id.len() != ID_LENGTH {
            return Err(RpcError::framing(format!(
                "attachment id must be {ID_LENGTH} bytes, got {}",
                env.id.len()
            )));
        }
        limits.check_attachment(f.len())?;
        header.with_file = Some(true);
        header.file_size = Some(f.len() as u64);
    }

    let json = serde_json::to_vec(&header)
        .map_err(|e| RpcError::Internal(format!("envelope encode failed: {e}")))?;
    limits.check_json(json.len())?;

    let extra = file.map(|f| ID_LENGTH + f.len()).unwrap_or(0);
    let mut out = BytesMut::with_capacity(json.len() + 1 + extra);
    out.put_slice(&json);
    out.put_u8(b'\n');
    if let Some(f) = file {
        out.put_slice(env.id.as_bytes());
        out.put_slice(&f.bytes);
    }
    Ok(out.freeze())
}

/// Header parsed from one line, plus how many raw bytes must follow it.
pub(crate) struct LineHeader {
    pub header: Header,
    pub trailing: usize,
}

pub(crate) fn parse_line(line: &[u8], limits: &FrameLimits) -> Result<LineHeader> {
    limits.check_json(line.len())?;
    let header: Header = serde_json::from_slice(line)
        .map_err(|e| RpcError::framing(format!("invalid envelope line: {e}")))?;
    let trailing = if header.with_file == Some(true) {
        let size = header
            .file_size
            .ok_or_else(|| RpcError::framing("withFile set without fileSize"))?;
        let size = usize::try_from(size)
            .map_err(|_| RpcError::framing(format!("fileSize {size} out of range")))?;
        limits.check_attachment(size)?;
        ID_LENGTH + size
    } else {
        0
    };
    Ok(LineHeader { header, trailing })
}

/// Split the raw block after a `withFile` line into the file bytes,
/// checking the leading id against the line's id.
pub(crate) fn split_attachment(header: &Header, mut block: Bytes) -> Result<Bytes> {
    if block.len() < ID_LENGTH {
        return Err(RpcError::framing("attachment block shorter than id"));
    }
    let id = block.split_to(ID_LENGTH);
    if id.as_ref() != header.id.as_bytes() {
        return Err(RpcError::framing(format!(
            "attachment id mismatch for {}",
            header.id
        )));
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::protocol::envelope::Attachment;
    use serde_json::json;

    #[test]
    fn plain_line_has_no_file_markers() {
        let env = Envelope::request("1", "getUser", json!({"id": "1"}));
        let bytes = encode_line(&env, &FrameLimits::default()).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(!text.contains("withFile"));
        assert!(text.contains("\"action\":\"getUser\""));
    }

    #[test]
    fn attachment_requires_fixed_id_length() {
        let env = Envelope::upload("short", Attachment::new(&b"x"[..]));
        assert!(encode_line(&env, &FrameLimits::default()).is_err());
    }

    #[test]
    fn attachment_trails_the_line_with_id_prefix() {
        let id = "a".repeat(ID_LENGTH);
        let env = Envelope::upload(id.clone(), Attachment::new(&b"xyz"[..]));
        let bytes = encode_line(&env, &FrameLimits::default()).unwrap();
        let nl = bytes.iter().position(|b| *b == b'\n').unwrap();
        let line = parse_line(&bytes[..nl], &FrameLimits::default()).unwrap();
        assert_eq!(line.trailing, ID_LENGTH + 3);
        let tail = bytes.slice(nl + 1..);
        assert_eq!(&tail[..ID_LENGTH], id.as_bytes());
        let file = split_attachment(&line.header, tail).unwrap();
        assert_eq!(&file[..], b"xyz");
    }
}
