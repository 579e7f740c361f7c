#[cfg(test)]
#[path = "../tests/unit/generation_test.rs"]
mod generation_test;

use crate::error::InferenceError;
use crate::prompt::END_OF_TEXT;
use crate::sampler::sample_argmax;
use crate::transformer::{Model, RunState};
use crate::vocabulary::Vocabulary;
use anyhow::Result;
use log::{debug, info};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Decode steps allowed when nothing else is configured.
pub const DEFAULT_MAX_STEPS: usize = 30;

/// Shared flag that stops generation at the next decode step.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub max_steps: usize,
    pub eos_token: usize,
    pub cancellation: Option<CancellationToken>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { max_steps: DEFAULT_MAX_STEPS, eos_token: END_OF_TEXT, cancellation: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    EndOfSequence,
    StepBudget,
    Cancelled,
}

/// Where the generation loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Feeding prompt token `index`; logits are discarded.
    Prefill { index: usize },
    /// Feeding `token`, the last prompt token or the previous pick; `step` decode steps done.
    Decode { token: usize, step: usize },
    Halted(HaltReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Tokens picked during decode, including a final end-of-sequence token.
    pub tokens: Vec<usize>,
    pub reason: HaltReason,
    /// Forward passes performed, i.e. the next free position.
    pub positions: usize,
}

/// Greedy autoregressive generation for a single sequence.
///
/// Owns the sequence's [`RunState`] and streams every picked fragment to `sink`
/// before the next forward pass.
pub struct Generator<'a, W: Write> {
    model: &'a Model<'a>,
    vocabulary: &'a Vocabulary,
    state: RunState,
    prompt: Vec<usize>,
    options: GenerationOptions,
    sink: W,
    phase: Phase,
    pos: usize,
    generated: Vec<usize>,
    metrics: TokenMetrics,
}

impl<'a, W: Write> Generator<'a, W> {
    pub fn new(
        model: &'a Model<'a>,
        vocabulary: &'a Vocabulary,
        prompt: Vec<usize>,
        options: GenerationOptions,
        sink: W,
    ) -> Result<Self> {
        let vocab_size = model.config().vocab_size;

        if prompt.is_empty() {
            return Err(InferenceError::InvalidPrompt("prompt has no tokens".to_string()).into());
        }
        if let Some(&token) = prompt.iter().find(|&&token| token >= vocab_size) {
            return Err(InferenceError::TokenOutOfRange { token, vocab_size }.into());
        }

        Ok(Self {
            model,
            vocabulary,
            state: RunState::new(model.config())?,
            prompt,
            options,
            sink,
            phase: Phase::Prefill { index: 0 },
            pos: 0,
            generated: Vec::new(),
            metrics: TokenMetrics::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Logits of the latest forward pass.
    pub fn logits(&self) -> &[f32] {
        self.state.logits()
    }

    pub fn generated(&self) -> &[usize] {
        &self.generated
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Advances the loop by one transition and returns the new phase.
    ///
    /// Prefill and decode transitions run at most one forward pass each.
    pub fn step(&mut self) -> Result<Phase> {
        let current = self.phase;
        let next = match current {
            Phase::Prefill { index } if index + 1 < self.prompt.len() => {
                self.forward(self.prompt[index])?;
                Phase::Prefill { index: index + 1 }
            }
            Phase::Prefill { .. } => {
                let token = self.prompt[self.prompt.len() - 1];
                debug!("Prefill done at position {}, decoding from token {token}", self.pos);
                Phase::Decode { token, step: 0 }
            }
            Phase::Decode { .. } if self.is_cancelled() => {
                debug!("Generation cancelled at position {}", self.pos);
                Phase::Halted(HaltReason::Cancelled)
            }
            Phase::Decode { step, .. } if step >= self.options.max_steps => Phase::Halted(HaltReason::StepBudget),
            Phase::Decode { token, step } => {
                self.metrics.start_generation();
                self.forward(token)?;

                let next_token = sample_argmax(self.state.logits());
                self.metrics.increment_token();
                debug!("Step {step}: position {} -> token {next_token}", self.pos - 1);

                self.emit(next_token)?;
                self.generated.push(next_token);

                if next_token == self.options.eos_token {
                    Phase::Halted(HaltReason::EndOfSequence)
                } else {
                    Phase::Decode { token: next_token, step: step + 1 }
                }
            }
            halted @ Phase::Halted(_) => halted,
        };

        self.phase = next;
        Ok(next)
    }

    /// Steps until halted.
    pub fn run(&mut self) -> Result<GenerationOutcome> {
        loop {
            if let Phase::Halted(reason) = self.step()? {
                self.metrics.report_and_reset();
                return Ok(GenerationOutcome { tokens: self.generated.clone(), reason, positions: self.pos });
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.options.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn forward(&mut self, token: usize) -> Result<()> {
        let block_size = self.model.config().block_size;
        if self.pos >= block_size {
            return Err(InferenceError::SequenceTooLong { position: self.pos, block_size }.into());
        }

        self.model.forward(&mut self.state, token, self.pos);
        self.pos += 1;
        Ok(())
    }

    fn emit(&mut self, token: usize) -> Result<()> {
        self.sink.write_all(self.vocabulary.token_bytes(token))?;
        self.sink.flush()?;
        Ok(())
    }
}

/// Runs a full prefill + decode pass over `prompt`, streaming fragments to `sink`.
pub fn generate<W: Write>(
    model: &Model<'_>,
    vocabulary: &Vocabulary,
    prompt: Vec<usize>,
    options: GenerationOptions,
    sink: W,
) -> Result<GenerationOutcome> {
    Generator::new(model, vocabulary, prompt, options, sink)?.run()
}

/// Tracks token generation performance metrics
struct TokenMetrics {
    start_time: Option<Instant>,
    generated_count: usize,
}

impl TokenMetrics {
    fn new() -> Self {
        Self { start_time: None, generated_count: 0 }
    }

    fn start_generation(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    fn increment_token(&mut self) {
        self.generated_count += 1;
    }

    fn report_and_reset(&mut self) {
        if let Some(start_time) = self.start_time.take() {
            let duration = start_time.elapsed();
            if self.generated_count > 0 && duration.as_secs_f64() > 0.0 {
                let tps = self.generated_count as f64 / duration.as_secs_f64();
                info!(
                    "Generated {} tokens in {:.2}s - {:.2} tokens/sec",
                    self.generated_count,
                    duration.as_secs_f64(),
                    tps
                );
            }
        }
        self.generated_count = 0;
    }
}
