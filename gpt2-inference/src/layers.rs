use crate::tensor::{add_inplace, gelu, layernorm, layernorm_inplace, matmul};
use crate::transformer::RunState;
use crate::weights::LayerWeights;

/// Learned token and absolute position embeddings.
///
/// **Shapes**: token table [vocab_size, n_embd], position table [block_size, n_embd]
pub struct Embedding<'a> {
    pub token_table: &'a [f32],
    pub position_table: &'a [f32],
    pub dim: usize,
}

impl<'a> Embedding<'a> {
    pub fn new(token_table: &'a [f32], position_table: &'a [f32], dim: usize) -> Self {
        Self { token_table, position_table, dim }
    }

    /// Writes `wte[token] + wpe[pos]` into `output`.
    pub fn forward(&self, token: usize, pos: usize, output: &mut [f32]) {
        let token_row = &self.token_table[token * self.dim..(token + 1) * self.dim];
        let pos_row = &self.position_table[pos * self.dim..(pos + 1) * self.dim];

        output[..self.dim].iter_mut().zip(token_row.iter().zip(pos_row)).for_each(|(out, (&t, &p))| {
            *out = t + p;
        });
    }
}

impl std::fmt::Debug for Embedding<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedding")
            .field("dim", &self.dim)
            .field("vocab_size", &(self.token_table.len() / self.dim))
            .field("block_size", &(self.position_table.len() / self.dim))
            .finish()
    }
}

/// Layer normalization with learned scale and shift.
pub struct LayerNorm<'a> {
    pub weight: &'a [f32],
    pub bias: &'a [f32],
}

impl<'a> LayerNorm<'a> {
    pub fn new(weight: &'a [f32], bias: &'a [f32]) -> Self {
        Self { weight, bias }
    }

    pub fn forward(&self, output: &mut [f32], input: &[f32]) {
        layernorm(output, input, self.weight, self.bias);
    }

    pub fn forward_inplace(&self, x: &mut [f32]) {
        layernorm_inplace(x, self.weight, self.bias);
    }
}

impl std::fmt::Debug for LayerNorm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerNorm").field("dim", &self.weight.len()).finish()
    }
}

/// Dense projection `y = W x (+ b)` with `W` stored as [out_features, in_features].
pub struct Linear<'a> {
    pub weight: &'a [f32],
    pub bias: Option<&'a [f32]>,
    pub in_features: usize,
    pub out_features: usize,
}

impl<'a> Linear<'a> {
    pub fn new(weight: &'a [f32], bias: Option<&'a [f32]>, in_features: usize, out_features: usize) -> Self {
        Self { weight, bias, in_features, out_features }
    }

    pub fn forward(&self, output: &mut [f32], input: &[f32]) {
        matmul(output, input, self.weight, self.in_features, self.out_features);
        if let Some(bias) = self.bias {
            add_inplace(&mut output[..self.out_features], bias);
        }
    }
}

impl std::fmt::Debug for Linear<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("bias", &self.bias.is_some())
            .finish()
    }
}

/// Two-layer MLP with GELU: expand to 4 * n_embd, then contract back.
pub struct FeedForward<'a> {
    pub c_fc: Linear<'a>,
    pub c_proj: Linear<'a>,
}

impl<'a> FeedForward<'a> {
    pub fn new(c_fc: Linear<'a>, c_proj: Linear<'a>) -> Self {
        Self { c_fc, c_proj }
    }

    /// Reads `state.xb`, leaves the result in `state.xb2`.
    fn forward(&self, state: &mut RunState) {
        self.c_fc.forward(&mut state.hb, &state.xb);
        gelu(&mut state.hb);
        self.c_proj.forward(&mut state.xb2, &state.hb);
    }
}

impl std::fmt::Debug for FeedForward<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedForward")
            .field("hidden_dim", &self.c_fc.out_features)
            .field("c_fc", &self.c_fc)
            .field("c_proj", &self.c_proj)
            .finish()
    }
}

/// Norm-and-MLP decoder layer.
///
/// **Structure**:
/// ```text
/// xb = LayerNorm_1(x)        (computed, result unused)
/// x  = x + FFN(LayerNorm_2(x))
/// ```
///
/// The attention sub-block is a pass-through: its parameters are bound but never
/// read, so the residual stream reaches the MLP unchanged. Tokens therefore do not
/// see each other; only the position embedding varies with `pos`.
pub struct TransformerBlock<'a> {
    pub ln_1: LayerNorm<'a>,
    pub ln_2: LayerNorm<'a>,
    pub mlp: FeedForward<'a>,
    pub layer_idx: usize,
}

impl<'a> TransformerBlock<'a> {
    pub fn new(weights: &LayerWeights<'a>, dim: usize, layer_idx: usize) -> Self {
        let hidden_dim = 4 * dim;
        Self {
            ln_1: LayerNorm::new(weights.ln_1_weight, weights.ln_1_bias),
            ln_2: LayerNorm::new(weights.ln_2_weight, weights.ln_2_bias),
            mlp: FeedForward::new(
                Linear::new(weights.fc_weight, Some(weights.fc_bias), dim, hidden_dim),
                Linear::new(weights.fc_proj_weight, Some(weights.fc_proj_bias), hidden_dim, dim),
            ),
            layer_idx,
        }
    }

    pub(crate) fn forward(&self, state: &mut RunState) {
        // Attention placeholder
        self.ln_1.forward(&mut state.xb, &state.x);

        // Feed-forward block with residual connection
        self.ln_2.forward(&mut state.xb, &state.x);
        self.mlp.forward(state);
        add_inplace(&mut state.x, &state.xb2);
    }
}

impl std::fmt::Debug for TransformerBlock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerBlock")
            .field("layer_idx", &self.layer_idx)
            .field("ln_1", &self.ln_1)
            .field("attn", &"pass-through")
            .field("ln_2", &self.ln_2)
            .field("mlp", &self.mlp)
            .finish()
    }
}
