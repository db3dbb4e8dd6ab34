//! Transmission and correlation id generation.
//!
//! Ids appear inside chunk lines, so they must be non-empty and never
//! contain the chunk separator. They must also never start with `{`,
//! which would make a chunk line look like JSON.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::wire::CHUNK_SEPARATOR;

/// Prefix of every id produced by [`RandomIds`].
pub const ID_PREFIX: &str = "LX-";

/// Random characters after the prefix. 16 base36 characters ≈ 82 bits.
pub const DEFAULT_ID_LEN: usize = 16;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Source of fresh transmission and correlation ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// `"LX-"` followed by random base36 characters.
#[derive(Debug, Clone)]
pub struct RandomIds {
    len: usize,
}

impl RandomIds {
    pub fn new() -> Self {
        Self {
            len: DEFAULT_ID_LEN,
        }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIds {
    fn next_id(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut id = String::with_capacity(ID_PREFIX.len() + self.len);
        id.push_str(ID_PREFIX);
        for _ in 0..self.len {
            id.push(BASE36[rng.gen_range(0..BASE36.len())] as char);
        }
        id
    }
}

/// Deterministic ids: `<prefix>1`, `<prefix>2`, ... For tests.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, n)
    }
}

/// Whether `id` can safely appear in a chunk line.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(CHUNK_SEPARATOR) && !id.trim_start().starts_with('{')
}
