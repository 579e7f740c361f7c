//! Vocabulary table mapping token ids to byte fragments.
//!
//! File format (little-endian):
//! - i32 number of entries
//! - per entry: i32 byte length, then that many raw bytes (no terminator)
//!
//! Fragments are raw bytes: byte-level BPE tokens may split a UTF-8 sequence,
//! and only the concatenation of consecutive fragments is valid text.

#[cfg(test)]
#[path = "../tests/unit/vocabulary_test.rs"]
mod vocabulary_test;

use crate::error::InferenceError;
use crate::utils::open_file;
use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use log::info;
use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::path::Path;

/// Immutable id -> fragment table.
pub struct Vocabulary {
    entries: Vec<Vec<u8>>,
}

impl Vocabulary {
    pub fn new(entries: Vec<Vec<u8>>) -> Self {
        Self { entries }
    }

    /// Loads a vocabulary file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut data = Vec::new();
        open_file(path)?.read_to_end(&mut data).with_context(|| format!("Failed to read {}", path.display()))?;

        let vocabulary = Self::from_bytes(&data).with_context(|| format!("Invalid vocabulary file {}", path.display()))?;
        info!("Loaded vocabulary of {} entries from {}", vocabulary.len(), path.display());

        Ok(vocabulary)
    }

    /// Parses the vocabulary format from an in-memory buffer.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let available = |cursor: &Cursor<&[u8]>| data.len().saturating_sub(cursor.position() as usize);

        let truncated = |what: String, needed: usize, available: usize| InferenceError::TruncatedRead {
            what,
            needed,
            available,
        };

        let vocab_size = cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| truncated("vocabulary size".to_string(), 4, data.len()))?;
        if vocab_size < 0 {
            anyhow::bail!("Negative vocabulary size: {vocab_size}");
        }

        // every entry needs at least its 4-byte length prefix
        let mut entries = Vec::with_capacity((vocab_size as usize).min(data.len() / 4));
        for i in 0..vocab_size as usize {
            let left = available(&cursor);
            let len = cursor
                .read_i32::<LittleEndian>()
                .map_err(|_| truncated(format!("length of vocabulary entry {i}"), 4, left))?;
            if len < 0 {
                anyhow::bail!("Negative length {len} for vocabulary entry {i}");
            }

            let len = len as usize;
            if len > available(&cursor) {
                return Err(truncated(format!("vocabulary entry {i}"), len, available(&cursor)).into());
            }

            let mut bytes = vec![0u8; len];
            cursor.read_exact(&mut bytes)?;
            entries.push(bytes);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw bytes of a token; unknown ids map to an empty fragment.
    pub fn token_bytes(&self, token: usize) -> &[u8] {
        self.entries.get(token).map(Vec::as_slice).unwrap_or_default()
    }

    /// Lossy text rendering of a single token.
    pub fn decode(&self, token: usize) -> Cow<'_, str> {
        String::from_utf8_lossy(self.token_bytes(token))
    }
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary").field("vocab_size", &self.entries.len()).finish()
    }
}
