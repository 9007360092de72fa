//! Incremental stream parser.
//!
//! Fed with chunks as they arrive from the network; yields every envelope
//! that became complete. Partial headers, bodies and attachments stay
//! buffered between calls. Any decode failure is terminal: the parser stays
//! failed and the owning connection must be torn down.

use std::mem;

use bytes::{Buf, Bytes};

use crate::error::{Result, RpcError};
use crate::protocol::accumulator::ByteAccumulator;
use crate::protocol::envelope::{Envelope, Header};
use crate::protocol::frame::{check_kind, parse_header, KIND_WITH_ATTACHMENT, PREFIX_LEN};
use crate::protocol::lines::{parse_line, split_attachment};
use crate::protocol::{FrameLimits, WireFormat};

/// Behaviour at end of stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeOptions {
    /// Emit a header whose promised attachment never arrived (without data)
    /// instead of failing.
    pub tolerate_missing_attachment: bool,
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    AwaitingAttachment { header: Header, remaining: usize },
    Failed,
}

#[derive(Debug)]
pub struct StreamParser {
    format: WireFormat,
    limits: FrameLimits,
    buf: ByteAccumulator,
    state: State,
}

impl StreamParser {
    pub fn new(format: WireFormat, limits: FrameLimits) -> Self {
        Self {
            format,
            limits,
            buf: ByteAccumulator::new(),
            state: State::AwaitingHeader,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Bytes buffered but not yet part of an emitted envelope.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    /// Consume one chunk and return every envelope completed by it.
    pub fn feed(&mut self, chunk: impl Into<Bytes>) -> Result<Vec<Envelope>> {
        if self.is_failed() {
            return Err(RpcError::framing("parser already failed"));
        }
        self.buf.push(chunk.into());

        let mut out = Vec::new();
        loop {
            match self.step() {
                Ok(Some(env)) => out.push(env),
                Ok(None) => return Ok(out),
                Err(e) => {
                    self.state = State::Failed;
                    return Err(e);
                }
            }
        }
    }

    /// Flush trailing state at end of stream.
    pub fn finalize(&mut self, opts: FinalizeOptions) -> Result<Vec<Envelope>> {
        let state = mem::replace(&mut self.state, State::AwaitingHeader);
        let res = match state {
            State::Failed => Err(RpcError::framing("parser already failed")),
            State::AwaitingAttachment { header, remaining } => {
                missing_attachment(header, remaining, opts).map(|e| vec![e])
            }
            State::AwaitingHeader => self.finalize_header(opts),
        };
        if res.is_err() {
            self.state = State::Failed;
        }
        res
    }

    fn finalize_header(&mut self, opts: FinalizeOptions) -> Result<Vec<Envelope>> {
        if self.buf.is_empty() {
            return Ok(Vec::new());
        }
        let rest = self.buf.take_all();
        match self.format {
            WireFormat::LengthPrefixed => Err(RpcError::framing(format!(
                "stream ended inside a frame ({} bytes buffered)",
                rest.len()
            ))),
            WireFormat::Lines => {
                let line = trim_line(&rest);
                if line.is_empty() {
                    return Ok(Vec::new());
                }
                let parsed = parse_line(line, &self.limits)?;
                if parsed.trailing > 0 {
                    missing_attachment(parsed.header, parsed.trailing, opts).map(|e| vec![e])
                } else {
                    Ok(vec![parsed.header.into_envelope(None)])
                }
            }
        }
    }

    fn step(&mut self) -> Result<Option<Envelope>> {
        loop {
            match &self.state {
                State::Failed => return Err(RpcError::framing("parser already failed")),
                State::AwaitingAttachment { remaining, .. } => {
                    let remaining = *remaining;
                    if self.buf.len() < remaining {
                        return Ok(None);
                    }
                    let Some(block) = self.buf.read_exact(remaining) else {
                        return Ok(None);
                    };
                    let State::AwaitingAttachment { header, .. } =
                        mem::replace(&mut self.state, State::AwaitingHeader)
                    else {
                        return Err(RpcError::Internal("parser state changed".into()));
                    };
                    let file = match self.format {
                        WireFormat::LengthPrefixed => block,
                        WireFormat::Lines => split_attachment(&header, block)?,
                    };
                    return Ok(Some(header.into_envelope(Some(file))));
                }
                State::AwaitingHeader => {
                    let next = match self.format {
                        WireFormat::LengthPrefixed => self.prefixed_header()?,
                        WireFormat::Lines => self.line_header()?,
                    };
                    match next {
                        Progress::NeedMore => return Ok(None),
                        Progress::Skip => continue,
                        Progress::Done(env) => return Ok(Some(env)),
                        Progress::Attachment(header, remaining) => {
                            self.state = State::AwaitingAttachment { header, remaining };
                        }
                    }
                }
            }
        }
    }

    fn prefixed_header(&mut self) -> Result<Progress> {
        let Some(kind) = self.buf.byte_at(0) else {
            return Ok(Progress::NeedMore);
        };
        check_kind(kind)?;
        let Some(json_len) = self.buf.peek_u32_be(1) else {
            return Ok(Progress::NeedMore);
        };
        let json_len = json_len as usize;
        self.limits.check_json(json_len)?;

        let with_file = kind == KIND_WITH_ATTACHMENT;
        let need = PREFIX_LEN + json_len + if with_file { 4 } else { 0 };
        if self.buf.len() < need {
            return Ok(Progress::NeedMore);
        }

        self.buf.skip(PREFIX_LEN);
        let json = self
            .buf
            .read_exact(json_len)
            .ok_or_else(|| RpcError::Internal("buffer shrank".into()))?;
        let header = parse_header(&json)?;

        if !with_file {
            return Ok(Progress::Done(header.into_envelope(None)));
        }
        let mut len = self
            .buf
            .read_exact(4)
            .ok_or_else(|| RpcError::Internal("buffer shrank".into()))?;
        let n = len.get_u32() as usize;
        self.limits.check_attachment(n)?;
        Ok(Progress::Attachment(header, n))
    }

    fn line_header(&mut self) -> Result<Progress> {
        let Some(pos) = self.buf.position(b'\n') else {
            if self.buf.len() > self.limits.max_json_bytes {
                return Err(RpcError::framing(format!(
                    "line exceeds {} bytes",
                    self.limits.max_json_bytes
                )));
            }
            return Ok(Progress::NeedMore);
        };
        let raw = self
            .buf
            .read_exact(pos + 1)
            .ok_or_else(|| RpcError::Internal("buffer shrank".into()))?;
        let line = trim_line(&raw);
        if line.is_empty() {
            return Ok(Progress::Skip);
        }
        let parsed = parse_line(line, &self.limits)?;
        if parsed.trailing > 0 {
            Ok(Progress::Attachment(parsed.header, parsed.trailing))
        } else {
            Ok(Progress::Done(parsed.header.into_envelope(None)))
        }
    }
}

enum Progress {
    NeedMore,
    Skip,
    Done(Envelope),
    Attachment(Header, usize),
}

fn missing_attachment(mut header: Header, remaining: usize, opts: FinalizeOptions) -> Result<Envelope> {
    if !opts.tolerate_missing_attachment {
        return Err(RpcError::framing(format!(
            "stream ended with {remaining} attachment bytes missing for {}",
            header.id
        )));
    }
    tracing::debug!(id = %header.id, remaining, "attachment never arrived; emitting header only");
    header.with_file = Some(true);
    Ok(header.into_envelope(None))
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &raw[start..end.max(start)]
}
