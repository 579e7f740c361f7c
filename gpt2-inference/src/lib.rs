//! Greedy text generation from GPT-2 style checkpoints.
//!
//! A checkpoint is a 20-byte header (n_layer, n_head, n_embd, block_size, vocab_size
//! as little-endian i32) followed by every parameter as raw f32. The layers run a
//! LayerNorm + MLP residual block; the attention sub-block is a pass-through.

mod configuration;
mod error;
mod generation;
mod layers;
mod prompt;
mod sampler;
mod tensor;
mod transformer;
mod utils;
mod vocabulary;
mod weights;

#[cfg(test)]
#[path = "../tests/unit/test_support.rs"]
mod test_support;

pub use configuration::{CONFIG_SIZE, ModelConfig, parse_config};
pub use error::InferenceError;
pub use generation::{
    CancellationToken, DEFAULT_MAX_STEPS, GenerationOptions, GenerationOutcome, Generator, HaltReason, Phase,
    generate,
};
pub use prompt::{DEFAULT_MAX_PROMPT_TOKENS, END_OF_TEXT, parse_prompt};
pub use sampler::sample_argmax;
pub use tensor::{LAYERNORM_EPSILON, gelu, layernorm, layernorm_inplace, matmul};
pub use transformer::{Checkpoint, Model, RunState};
pub use vocabulary::Vocabulary;
pub use weights::{ModelWeights, WeightCursor, WeightLayout, WeightSlice};

use anyhow::Result;
use log::{debug, info, warn};
use std::io::Write;

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub checkpoint_path: String,
    pub vocabulary_path: String,
    pub prompt: Option<String>,
    pub max_steps: usize,
    pub eos_token: usize,
    pub max_prompt_tokens: usize,
}

impl InferenceConfig {
    pub fn builder() -> InferenceConfigBuilder {
        InferenceConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct InferenceConfigBuilder {
    checkpoint_path: Option<String>,
    vocabulary_path: Option<String>,
    prompt: Option<String>,
    max_steps: Option<usize>,
    eos_token: Option<usize>,
    max_prompt_tokens: Option<usize>,
}

impl InferenceConfigBuilder {
    pub fn checkpoint_path(mut self, path: Option<&String>) -> Self {
        self.checkpoint_path = path.cloned();
        self
    }
    pub fn vocabulary_path(mut self, path: Option<&String>) -> Self {
        self.vocabulary_path = path.cloned();
        self
    }
    pub fn prompt(mut self, prompt: Option<&String>) -> Self {
        self.prompt = prompt.cloned();
        self
    }
    pub fn max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }
    pub fn eos_token(mut self, eos_token: Option<usize>) -> Self {
        self.eos_token = eos_token;
        self
    }
    pub fn max_prompt_tokens(mut self, max_prompt_tokens: Option<usize>) -> Self {
        self.max_prompt_tokens = max_prompt_tokens;
        self
    }
    pub fn build(self) -> Result<InferenceConfig, String> {
        let max_prompt_tokens = self.max_prompt_tokens.unwrap_or(DEFAULT_MAX_PROMPT_TOKENS);
        if max_prompt_tokens == 0 {
            return Err("max_prompt_tokens must be positive".to_string());
        }

        Ok(InferenceConfig {
            checkpoint_path: self.checkpoint_path.unwrap_or_else(|| "model.bin".to_string()),
            vocabulary_path: self.vocabulary_path.unwrap_or_else(|| "tokenizer.bin".to_string()),
            prompt: self.prompt,
            max_steps: self.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
            eos_token: self.eos_token.unwrap_or(END_OF_TEXT),
            max_prompt_tokens,
        })
    }
}

/// Runs inference, streaming generated fragments to `sink` with no separators.
pub fn run_inference<W: Write>(inference_config: InferenceConfig, sink: W) -> Result<GenerationOutcome> {
    debug!("{inference_config:#?}");

    let vocabulary = Vocabulary::from_file(&inference_config.vocabulary_path)?;
    let checkpoint = Checkpoint::open(&inference_config.checkpoint_path)?;
    let model = Model::from_checkpoint(&checkpoint)?;

    if vocabulary.len() != model.config().vocab_size {
        warn!(
            "Vocabulary has {} entries but the model predicts {} tokens; unknown ids decode to nothing",
            vocabulary.len(),
            model.config().vocab_size
        );
    }

    let prompt = parse_prompt(inference_config.prompt.as_deref(), inference_config.max_prompt_tokens)?;
    debug!("Prompt tokens: {prompt:?}");

    let options = GenerationOptions {
        max_steps: inference_config.max_steps,
        eos_token: inference_config.eos_token,
        cancellation: None,
    };

    let outcome = generate(&model, &vocabulary, prompt, options, sink)?;
    info!("Halted after {} positions: {:?}", outcome.positions, outcome.reason);

    Ok(outcome)
}

/// Reads a checkpoint header and reports its weight layout, checking the file size.
pub fn inspect_checkpoint(checkpoint_path: &str) -> Result<(ModelConfig, WeightLayout, usize)> {
    let checkpoint = Checkpoint::open(checkpoint_path)?;
    let layout = WeightLayout::new(checkpoint.config())?;
    let actual = checkpoint.weights()?.len();

    Ok((*checkpoint.config(), layout, actual))
}
