//! Correlation id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Fixed id length. The line codec relies on it to locate the file bytes
/// that follow an id prefix.
pub const ID_LENGTH: usize = 21;

const PREFIX_LEN: usize = 8;

/// Source of correlation ids, scoped to one manager or session.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random per-instance prefix plus an atomic counter, always `ID_LENGTH` long.
#[derive(Debug)]
pub struct TokenIdGenerator {
    prefix: String,
    seq: AtomicU64,
}

impl TokenIdGenerator {
    pub fn new() -> Self {
        let prefix = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PREFIX_LEN)
            .map(char::from)
            .collect();
        Self {
            prefix,
            seq: AtomicU64::new(1),
        }
    }
}

impl Default for TokenIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for TokenIdGenerator {
    fn next_id(&self) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}{:0>width$}", self.prefix, n, width = ID_LENGTH - PREFIX_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_fixed_length_and_unique() {
        let g = TokenIdGenerator::new();
        let a = g.next_id();
        let b = g.next_id();
        assert_eq!(a.len(), ID_LENGTH);
        assert_eq!(b.len(), ID_LENGTH);
        assert_ne!(a, b);
    }
}
