//! Binding of the flat weight buffer to named, shaped slices.
//!
//! The checkpoint stores every parameter as one run of `f32` values:
//!
//! ```text
//! wte [vocab_size, n_embd]
//! wpe [block_size, n_embd]
//! n_layer x {
//!     ln_1.weight [n_embd]          ln_1.bias [n_embd]
//!     attn.c_attn.weight [3*n_embd, n_embd]   attn.c_attn.bias [3*n_embd]
//!     attn.c_proj.weight [n_embd, n_embd]     attn.c_proj.bias [n_embd]
//!     ln_2.weight [n_embd]          ln_2.bias [n_embd]
//!     mlp.c_fc.weight [4*n_embd, n_embd]      mlp.c_fc.bias [4*n_embd]
//!     mlp.c_proj.weight [n_embd, 4*n_embd]    mlp.c_proj.bias [n_embd]
//! }
//! ln_f.weight [n_embd]  ln_f.bias [n_embd]
//! lm_head.weight [vocab_size, n_embd]
//! ```
//!
//! Binding walks that order with a bounds-checked cursor and requires it to end
//! exactly on the last value.

#[cfg(test)]
#[path = "../tests/unit/weights_test.rs"]
mod weights_test;

use crate::configuration::ModelConfig;
use crate::error::InferenceError;
use anyhow::Result;

/// Names and element counts of one layer block, in storage order.
const LAYER_SLICES: [(&str, usize, usize); 12] = [
    // (name, rows in units of n_embd, columns in units of n_embd; 0 means a vector)
    ("ln_1.weight", 1, 0),
    ("ln_1.bias", 1, 0),
    ("attn.c_attn.weight", 3, 1),
    ("attn.c_attn.bias", 3, 0),
    ("attn.c_proj.weight", 1, 1),
    ("attn.c_proj.bias", 1, 0),
    ("ln_2.weight", 1, 0),
    ("ln_2.bias", 1, 0),
    ("mlp.c_fc.weight", 4, 1),
    ("mlp.c_fc.bias", 4, 0),
    ("mlp.c_proj.weight", 1, 4),
    ("mlp.c_proj.bias", 1, 0),
];

/// Location of one named parameter inside the weight buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSlice {
    pub name: String,
    pub offset: usize,
    pub len: usize,
}

/// Sizes of every parameter slice implied by a configuration.
///
/// Only the total is computed up front; named slices are produced on demand so a
/// header with a huge layer count costs nothing until its size has been checked.
#[derive(Debug, Clone)]
pub struct WeightLayout {
    config: ModelConfig,
    total: usize,
}

impl WeightLayout {
    /// Derives the layout, failing if any size overflows `usize`.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let overflow = || InferenceError::InvalidConfig(format!("weight sizes overflow for {config:?}"));
        let dim = config.n_embd;
        let square = dim.checked_mul(dim).ok_or_else(overflow)?;

        let per_layer = LAYER_SLICES
            .iter()
            .try_fold(0usize, |acc, &(_, rows, cols)| {
                let len = match cols {
                    0 => dim.checked_mul(rows),
                    _ => square.checked_mul(rows * cols),
                }?;
                acc.checked_add(len)
            })
            .ok_or_else(overflow)?;

        let token_table = config.vocab_size.checked_mul(dim).ok_or_else(overflow)?;
        let sizes = [
            Some(token_table),
            config.block_size.checked_mul(dim),
            per_layer.checked_mul(config.n_layer),
            Some(dim),
            Some(dim),
            Some(token_table),
        ];
        let total = sizes
            .into_iter()
            .try_fold(0usize, |acc, len| acc.checked_add(len?))
            .ok_or_else(overflow)?;

        Ok(Self { config: *config, total })
    }

    /// Named slices in storage order, with offsets into the weight buffer.
    pub fn slices(&self) -> impl Iterator<Item = WeightSlice> + '_ {
        let dim = self.config.n_embd;
        let token_table = self.config.vocab_size * dim;

        let head = [("wte".to_string(), token_table), ("wpe".to_string(), self.config.block_size * dim)];
        let layers = (0..self.config.n_layer).flat_map(move |layer| {
            LAYER_SLICES.iter().map(move |&(name, rows, cols)| {
                let len = match cols {
                    0 => rows * dim,
                    _ => rows * cols * dim * dim,
                };
                (format!("h.{layer}.{name}"), len)
            })
        });
        let tail = [
            ("ln_f.weight".to_string(), dim),
            ("ln_f.bias".to_string(), dim),
            ("lm_head.weight".to_string(), token_table),
        ];

        head.into_iter().chain(layers).chain(tail).scan(0usize, |offset, (name, len)| {
            let slice = WeightSlice { name, offset: *offset, len };
            *offset += len;
            Some(slice)
        })
    }

    /// Number of `f32` values the weight buffer must hold.
    pub fn expected_len(&self) -> usize {
        self.total
    }
}

/// Forward-only cursor over the weight buffer that fails closed on overrun.
#[derive(Debug)]
pub struct WeightCursor<'a> {
    data: &'a [f32],
    offset: usize,
}

impl<'a> WeightCursor<'a> {
    pub fn new(data: &'a [f32]) -> Self {
        Self { data, offset: 0 }
    }

    /// Takes the next `count` values as a named slice.
    pub fn take(&mut self, count: usize, name: &str) -> Result<&'a [f32]> {
        let remaining = self.remaining();
        if count > remaining {
            anyhow::bail!("Insufficient data for {name}: need {count} floats, have {remaining} remaining");
        }

        let slice = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Confirms the cursor consumed the whole buffer.
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            _ => Err(InferenceError::WeightSizeMismatch { expected: self.offset, actual: self.data.len() }.into()),
        }
    }
}

/// Attention parameters of a layer.
///
/// They occupy space in the buffer and are bound so the layout stays honest,
/// but the forward pass never reads them.
#[derive(Debug, Clone, Copy)]
pub struct AttentionWeights<'a> {
    pub c_attn_weight: &'a [f32],
    pub c_attn_bias: &'a [f32],
    pub c_proj_weight: &'a [f32],
    pub c_proj_bias: &'a [f32],
}

/// Parameters of one transformer layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerWeights<'a> {
    pub ln_1_weight: &'a [f32],
    pub ln_1_bias: &'a [f32],
    pub attn: AttentionWeights<'a>,
    pub ln_2_weight: &'a [f32],
    pub ln_2_bias: &'a [f32],
    pub fc_weight: &'a [f32],
    pub fc_bias: &'a [f32],
    pub fc_proj_weight: &'a [f32],
    pub fc_proj_bias: &'a [f32],
}

/// All learned parameters, borrowed from the weight buffer.
#[derive(Debug, Clone)]
pub struct ModelWeights<'a> {
    /// Shape: [vocab_size, n_embd]
    pub token_embedding_table: &'a [f32],
    /// Shape: [block_size, n_embd]
    pub pos_embedding_table: &'a [f32],
    pub layers: Vec<LayerWeights<'a>>,
    /// Shape: [n_embd]
    pub ln_f_weight: &'a [f32],
    /// Shape: [n_embd]
    pub ln_f_bias: &'a [f32],
    /// Shape: [vocab_size, n_embd]
    pub lm_head: &'a [f32],
}

impl<'a> ModelWeights<'a> {
    /// Binds `data` to named slices according to `config`.
    ///
    /// Fails with [`InferenceError::WeightSizeMismatch`] unless `data` holds exactly the
    /// number of values the configuration implies.
    pub fn bind(config: &ModelConfig, data: &'a [f32]) -> Result<Self> {
        let layout = WeightLayout::new(config)?;
        if layout.expected_len() != data.len() {
            return Err(InferenceError::WeightSizeMismatch { expected: layout.expected_len(), actual: data.len() }.into());
        }

        let dim = config.n_embd;
        let hidden_dim = config.hidden_dim();
        let mut cursor = WeightCursor::new(data);

        let token_embedding_table = cursor.take(config.vocab_size * dim, "wte")?;
        let pos_embedding_table = cursor.take(config.block_size * dim, "wpe")?;

        let layers = (0..config.n_layer)
            .map(|_| -> Result<LayerWeights<'a>> {
                Ok(LayerWeights {
                    ln_1_weight: cursor.take(dim, "ln_1.weight")?,
                    ln_1_bias: cursor.take(dim, "ln_1.bias")?,
                    attn: AttentionWeights {
                        c_attn_weight: cursor.take(3 * dim * dim, "attn.c_attn.weight")?,
                        c_attn_bias: cursor.take(3 * dim, "attn.c_attn.bias")?,
                        c_proj_weight: cursor.take(dim * dim, "attn.c_proj.weight")?,
                        c_proj_bias: cursor.take(dim, "attn.c_proj.bias")?,
                    },
                    ln_2_weight: cursor.take(dim, "ln_2.weight")?,
                    ln_2_bias: cursor.take(dim, "ln_2.bias")?,
                    fc_weight: cursor.take(hidden_dim * dim, "mlp.c_fc.weight")?,
                    fc_bias: cursor.take(hidden_dim, "mlp.c_fc.bias")?,
                    fc_proj_weight: cursor.take(dim * hidden_dim, "mlp.c_proj.weight")?,
                    fc_proj_bias: cursor.take(dim, "mlp.c_proj.bias")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let ln_f_weight = cursor.take(dim, "ln_f.weight")?;
        let ln_f_bias = cursor.take(dim, "ln_f.bias")?;
        let lm_head = cursor.take(config.vocab_size * dim, "lm_head.weight")?;

        cursor.finish()?;

        Ok(Self { token_embedding_table, pos_embedding_table, layers, ln_f_weight, ln_f_bias, lm_head })
    }
}
