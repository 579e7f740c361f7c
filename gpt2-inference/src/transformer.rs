#[cfg(test)]
#[path = "../tests/unit/transformer_test.rs"]
mod transformer_test;

use crate::configuration::{ModelConfig, read_config};
use crate::error::InferenceError;
use crate::layers::{Embedding, LayerNorm, Linear, TransformerBlock};
use crate::utils::{MemoryMapper, open_file};
use crate::weights::ModelWeights;
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// A memory-mapped checkpoint: configuration header followed by the weight buffer.
///
/// Owns the mapping; [`Model`] borrows the weights from it for its whole lifetime.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    config: ModelConfig,
    mapper: MemoryMapper,
}

impl Checkpoint {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = open_file(path)?;
        let mut mapper = MemoryMapper::new(file)?;

        let config = read_config(&mut mapper).with_context(|| format!("Failed to read {}", path.display()))?;

        info!(
            "Loaded config from {}: n_layer={}, n_head={}, n_embd={}, block_size={}, vocab_size={}",
            path.display(),
            config.n_layer,
            config.n_head,
            config.n_embd,
            config.block_size,
            config.vocab_size
        );

        Ok(Self { path: path.to_path_buf(), config, mapper })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The weight buffer, lent without copying.
    pub fn weights(&self) -> Result<&[f32]> {
        self.mapper.rest_as_f32().with_context(|| format!("Invalid weight region in {}", self.path.display()))
    }
}

/// GPT-2 style decoder with the attention sub-block reduced to a pass-through.
///
/// **Process Flow:**
/// 1. **Embedding**: token row plus position row
/// 2. **Blocks**: per layer, residual update with the MLP of the normalized stream
/// 3. **Final Normalization**: LayerNorm on the residual stream
/// 4. **Head**: projection to vocabulary logits (no bias)
///
/// The model is immutable after construction and can be shared between sequences,
/// each of which owns its own [`RunState`].
pub struct Model<'a> {
    config: ModelConfig,
    embedding: Embedding<'a>,
    blocks: Vec<TransformerBlock<'a>>,
    final_norm: LayerNorm<'a>,
    lm_head: Linear<'a>,
}

impl<'a> Model<'a> {
    /// Binds a weight buffer to a configuration.
    pub fn new(config: ModelConfig, data: &'a [f32]) -> Result<Self> {
        let weights = ModelWeights::bind(&config, data)?;
        let dim = config.n_embd;

        let blocks = weights
            .layers
            .iter()
            .enumerate()
            .map(|(layer_idx, layer)| TransformerBlock::new(layer, dim, layer_idx))
            .collect();

        let model = Self {
            config,
            embedding: Embedding::new(weights.token_embedding_table, weights.pos_embedding_table, dim),
            blocks,
            final_norm: LayerNorm::new(weights.ln_f_weight, weights.ln_f_bias),
            lm_head: Linear::new(weights.lm_head, None, dim, config.vocab_size),
        };

        info!("Bound {} weights across {} layers", data.len(), config.n_layer);
        debug!("{model:#?}");

        Ok(model)
    }

    pub fn from_checkpoint(checkpoint: &'a Checkpoint) -> Result<Self> {
        let data = checkpoint.weights()?;
        Self::new(*checkpoint.config(), data)
            .with_context(|| format!("Failed to bind weights from {}", checkpoint.path().display()))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Runs one position through the network, leaving logits in `state`.
    ///
    /// Callers guarantee `token < vocab_size` and `pos < block_size`; the generation
    /// loop checks both before every call.
    pub fn forward(&self, state: &mut RunState, token: usize, pos: usize) {
        debug_assert!(token < self.config.vocab_size, "token {token} out of vocabulary");
        debug_assert!(pos < self.config.block_size, "position {pos} past block size");

        self.embedding.forward(token, pos, &mut state.x);

        for block in &self.blocks {
            block.forward(state);
        }

        self.final_norm.forward_inplace(&mut state.x);

        self.lm_head.forward(&mut state.logits, &state.x);
    }
}

impl std::fmt::Debug for Model<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct BlocksSummary<'a, T>(&'a [T]);

        impl<T: std::fmt::Debug> std::fmt::Debug for BlocksSummary<'_, T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_list()
                    .entries(self.0.iter().take(1))
                    .entry(&format_args!("... and {} more", self.0.len().saturating_sub(1)))
                    .finish()
            }
        }

        f.debug_struct("Model")
            .field("config", &self.config)
            .field("embedding", &self.embedding)
            .field("blocks", &BlocksSummary(&self.blocks))
            .field("final_norm", &self.final_norm)
            .field("lm_head", &self.lm_head)
            .finish()
    }
}

/// Scratch buffers for one sequence.
///
/// Sized once from the configuration and overwritten by every forward pass.
#[derive(Debug)]
pub struct RunState {
    /// Residual stream
    /// Shape: [n_embd]
    pub(crate) x: Vec<f32>,

    /// Normalized activations
    /// Shape: [n_embd]
    pub(crate) xb: Vec<f32>,

    /// MLP output before the residual add
    /// Shape: [n_embd]
    pub(crate) xb2: Vec<f32>,

    /// Feed-forward hidden layer
    /// Shape: [4 * n_embd]
    pub(crate) hb: Vec<f32>,

    /// Output logits over vocabulary
    /// Shape: [vocab_size]
    pub(crate) logits: Vec<f32>,
}

impl RunState {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        Ok(Self {
            x: zeroed(config.n_embd, "activation buffer")?,
            xb: zeroed(config.n_embd, "normalized activation buffer")?,
            xb2: zeroed(config.n_embd, "residual delta buffer")?,
            hb: zeroed(config.hidden_dim(), "hidden buffer")?,
            logits: zeroed(config.vocab_size, "logits buffer")?,
        })
    }

    pub fn logits(&self) -> &[f32] {
        &self.logits
    }
}

fn zeroed(len: usize, what: &'static str) -> Result<Vec<f32>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|_| InferenceError::AllocationFailure { what, len })?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}
