//! Growable queue of binary chunks.
//!
//! Chunks are kept as `Bytes` and only copied when a read straddles a chunk
//! boundary, so large attachments delivered in one piece stay zero-copy.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct ByteAccumulator {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Byte at `offset` without consuming.
    pub fn byte_at(&self, mut offset: usize) -> Option<u8> {
        if offset >= self.len {
            return None;
        }
        for c in &self.chunks {
            if offset < c.len() {
                return c.get(offset).copied();
            }
            offset -= c.len();
        }
        None
    }

    /// Big-endian u32 at `offset` without consuming.
    pub fn peek_u32_be(&self, offset: usize) -> Option<u32> {
        let mut raw = [0u8; 4];
        for (i, slot) in raw.iter_mut().enumerate() {
            *slot = self.byte_at(offset + i)?;
        }
        Some(u32::from_be_bytes(raw))
    }

    /// Copy of the first `n` bytes without consuming; `None` if fewer are buffered.
    pub fn peek_exact(&self, n: usize) -> Option<Bytes> {
        if n > self.len {
            return None;
        }
        match self.chunks.front() {
            Some(first) if first.len() >= n => Some(first.slice(..n)),
            _ => {
                let mut out = BytesMut::with_capacity(n);
                let mut need = n;
                for c in &self.chunks {
                    if need == 0 {
                        break;
                    }
                    let take = need.min(c.len());
                    out.extend_from_slice(&c[..take]);
                    need -= take;
                }
                Some(out.freeze())
            }
        }
    }

    /// Consume exactly `n` bytes; `None` (and nothing consumed) if fewer are buffered.
    pub fn read_exact(&mut self, n: usize) -> Option<Bytes> {
        if n > self.len {
            return None;
        }
        if n == 0 {
            return Some(Bytes::new());
        }
        if let Some(first) = self.chunks.front_mut() {
            if first.len() >= n {
                let out = first.split_to(n);
                if first.is_empty() {
                    self.chunks.pop_front();
                }
                self.len -= n;
                return Some(out);
            }
        }

        let mut out = BytesMut::with_capacity(n);
        let mut need = n;
        while need > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let take = need.min(front.len());
            out.extend_from_slice(&front[..take]);
            front.advance(take);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            need -= take;
        }
        self.len -= n;
        Some(out.freeze())
    }

    /// Drop `n` bytes (or everything, if fewer are buffered).
    pub fn skip(&mut self, n: usize) {
        let n = n.min(self.len);
        let _ = self.read_exact(n);
    }

    /// Offset of the first occurrence of `needle`.
    pub fn position(&self, needle: u8) -> Option<usize> {
        let mut base = 0;
        for c in &self.chunks {
            if let Some(i) = c.iter().position(|b| *b == needle) {
                return Some(base + i);
            }
            base += c.len();
        }
        None
    }

    /// Consume everything that is buffered.
    pub fn take_all(&mut self) -> Bytes {
        let n = self.len;
        self.read_exact(n).unwrap_or_default()
    }
}
