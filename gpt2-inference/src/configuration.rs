#[cfg(test)]
#[path = "../tests/unit/configuration_test.rs"]
mod configuration_test;

use std::io::Cursor;

use crate::error::InferenceError;
use crate::utils::MemoryMapper;
use anyhow::{Context, Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};

/// Size of the header in bytes (5 i32 fields)
pub const CONFIG_SIZE: usize = 20;

/// Configuration of a GPT-2 style model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    pub n_layer: usize,
    /// Stored in the header but not consumed by the forward pass.
    pub n_head: usize,
    pub n_embd: usize,
    pub block_size: usize,
    pub vocab_size: usize,
}

impl ModelConfig {
    /// Width of the feed-forward hidden layer.
    pub fn hidden_dim(&self) -> usize {
        4 * self.n_embd
    }
}

/// Raw header as stored at the start of a checkpoint.
#[derive(Debug, Clone, Copy)]
struct Header {
    n_layer: i32,
    n_head: i32,
    n_embd: i32,
    block_size: i32,
    vocab_size: i32,
}

impl TryInto<ModelConfig> for Header {
    type Error = Error;

    fn try_into(self) -> Result<ModelConfig> {
        validate_header(&self).with_context(|| "Invalid model configuration")?;

        Ok(ModelConfig {
            n_layer: self.n_layer as usize,
            n_head: self.n_head as usize,
            n_embd: self.n_embd as usize,
            block_size: self.block_size as usize,
            vocab_size: self.vocab_size as usize,
        })
    }
}

/// Reads and validates the model configuration from the start of a checkpoint.
pub(crate) fn read_config(mapper: &mut MemoryMapper) -> Result<ModelConfig> {
    let data = mapper.get_bytes(CONFIG_SIZE, "model configuration")?;
    parse_config(data)
}

/// Parses the five little-endian i32 header fields.
pub fn parse_config(data: &[u8]) -> Result<ModelConfig> {
    if data.len() < CONFIG_SIZE {
        return Err(InferenceError::TruncatedRead {
            what: "model configuration".to_string(),
            needed: CONFIG_SIZE,
            available: data.len(),
        }
        .into());
    }

    let mut cursor = Cursor::new(data);

    macro_rules! read_i32 {
        ($field:literal) => {
            cursor.read_i32::<LittleEndian>().with_context(|| format!("Failed to read {}", $field))?
        };
    }

    let header = Header {
        n_layer: read_i32!("number of layers"),
        n_head: read_i32!("number of heads"),
        n_embd: read_i32!("embedding width"),
        block_size: read_i32!("block size"),
        vocab_size: read_i32!("vocabulary size"),
    };

    header.try_into()
}

fn validate_header(header: &Header) -> Result<()> {
    let non_negative = [("n_layer", header.n_layer), ("n_head", header.n_head)];
    for (name, value) in non_negative {
        if value < 0 {
            return Err(InferenceError::InvalidConfig(format!("{name} must be non-negative, got {value}")).into());
        }
    }

    let positive =
        [("n_embd", header.n_embd), ("block_size", header.block_size), ("vocab_size", header.vocab_size)];
    for (name, value) in positive {
        if value <= 0 {
            return Err(InferenceError::InvalidConfig(format!("{name} must be positive, got {value}")).into());
        }
    }

    Ok(())
}
