use crate::error::InferenceError;
use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

/// Opens a file, reporting an absent path as [`InferenceError::MissingFile`].
pub(crate) fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => InferenceError::MissingFile { path: path.display().to_string() }.into(),
        _ => anyhow::Error::new(err).context(format!("Failed to open {}", path.display())),
    })
}

/// Read-only memory mapping with a forward-only read offset.
#[derive(Debug)]
pub(crate) struct MemoryMapper {
    mmap: Mmap,
    offset: usize,
}

impl MemoryMapper {
    pub fn new(file: File) -> Result<Self> {
        // SAFETY: the mapping is read-only and the file is not expected to change while mapped.
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file).context("Failed to create memory mapping")? };
        Ok(Self { mmap, offset: 0 })
    }

    pub fn remaining(&self) -> usize {
        self.mmap.len() - self.offset
    }

    pub fn get_bytes(&mut self, count: usize, what: &str) -> Result<&[u8]> {
        if count > self.remaining() {
            return Err(InferenceError::TruncatedRead {
                what: what.to_string(),
                needed: count,
                available: self.remaining(),
            }
            .into());
        }

        let result = &self.mmap[self.offset..self.offset + count];
        self.offset += count;
        Ok(result)
    }

    /// Lends every remaining byte as little-endian `f32` values without copying.
    ///
    /// Fails on a tail that does not fill a whole float.
    pub fn rest_as_f32(&self) -> Result<&[f32]> {
        let bytes = &self.mmap[self.offset..];
        let float_size = std::mem::size_of::<f32>();
        if bytes.len() % float_size != 0 {
            anyhow::bail!(
                "Weight region of {} bytes is not a whole number of f32 values ({} trailing bytes)",
                bytes.len(),
                bytes.len() % float_size
            );
        }

        // SAFETY: every bit pattern is a valid f32; alignment is verified below.
        let (prefix, floats, suffix) = unsafe { bytes.align_to::<f32>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            anyhow::bail!("Weight region is not aligned to f32 at offset {}", self.offset);
        }

        Ok(floats)
    }
}
