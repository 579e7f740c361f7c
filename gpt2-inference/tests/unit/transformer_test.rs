use super::*;
use crate::sampler::sample_argmax;
use crate::test_support::{WeightBuilder, config, flip_flop_weights};
use crate::weights::WeightLayout;

fn assert_all_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tolerance, "logit {i}: expected {e}, got {a}");
    }
}

#[test]
fn test_zero_layer_forward() {
    let config = config(0, 2, 4, 2);
    let data = flip_flop_weights(&config);
    let model = Model::new(config, &data).unwrap();
    let mut state = RunState::new(&config).unwrap();

    model.forward(&mut state, 0, 0);

    // x = [1, 0] normalizes to [1, -1] / sqrt(1 + 4e-5)
    assert_all_close(state.logits(), &[-0.99998, 0.99998], 1e-5);
    assert_eq!(sample_argmax(state.logits()), 1);

    model.forward(&mut state, 1, 1);
    assert_all_close(state.logits(), &[0.99998, -0.99998], 1e-5);
    assert_eq!(sample_argmax(state.logits()), 0);
}

#[test]
fn test_position_embedding_is_added() {
    let config = config(0, 2, 4, 2);
    let data = WeightBuilder::zeros(&config)
        .set("wte", &[1.0, 0.0, 0.0, 1.0])
        .set("wpe", &[0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0])
        .set("ln_f.weight", &[1.0, 1.0])
        .set("lm_head.weight", &[0.0, 1.0, 1.0, 0.0])
        .build();
    let model = Model::new(config, &data).unwrap();
    let mut state = RunState::new(&config).unwrap();

    model.forward(&mut state, 0, 0);
    assert_eq!(sample_argmax(state.logits()), 1);

    // token 0 at position 1 becomes [1, 5]
    model.forward(&mut state, 0, 1);
    assert_eq!(sample_argmax(state.logits()), 0);
}

#[test]
fn test_attention_block_is_never_read() {
    let config = config(1, 2, 4, 2);
    let data = WeightBuilder::zeros(&config)
        .set("wte", &[1.0, 0.0, 0.0, 1.0])
        .fill("h.0.ln_1.weight", f32::NAN)
        .fill("h.0.ln_1.bias", f32::NAN)
        .fill("h.0.attn.c_attn.weight", f32::NAN)
        .fill("h.0.attn.c_attn.bias", f32::NAN)
        .fill("h.0.attn.c_proj.weight", f32::NAN)
        .fill("h.0.attn.c_proj.bias", f32::NAN)
        .set("h.0.mlp.c_proj.bias", &[-2.0, 2.0])
        .set("ln_f.weight", &[1.0, 1.0])
        .set("lm_head.weight", &[0.0, 1.0, 1.0, 0.0])
        .build();
    let model = Model::new(config, &data).unwrap();
    let mut state = RunState::new(&config).unwrap();

    model.forward(&mut state, 0, 0);

    // residual: [1, 0] + [-2, 2] = [-1, 2]
    assert!(state.logits().iter().all(|v| v.is_finite()));
    assert_all_close(state.logits(), &[1.0, -1.0], 1e-5);
    assert_eq!(sample_argmax(state.logits()), 0);
}

/// Small deterministic generator for filling weights.
fn pseudo_random(len: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E3779B97F4A7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state >> 40) as f32 / (1u64 << 24) as f32) - 0.5
        })
        .collect()
}

/// Straightforward restatement of the forward pass over the raw buffer.
fn reference_forward(config: &ModelConfig, data: &[f32], token: usize, pos: usize) -> Vec<f32> {
    let layout = WeightLayout::new(config).unwrap();
    let get = |name: &str| {
        let slice = layout.slices().find(|slice| slice.name == name).unwrap();
        &data[slice.offset..slice.offset + slice.len]
    };
    let dim = config.n_embd;
    let hidden = 4 * dim;

    let norm = |x: &[f32], w: &[f32], b: &[f32]| -> Vec<f32> {
        let mean = x.iter().sum::<f32>() / dim as f32;
        let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / dim as f32;
        let std = (var + 1e-5).sqrt();
        (0..dim).map(|i| (x[i] - mean) / std * w[i] + b[i]).collect()
    };
    let dense = |x: &[f32], w: &[f32], rows: usize, cols: usize| -> Vec<f32> {
        (0..rows).map(|r| (0..cols).map(|c| w[r * cols + c] * x[c]).sum()).collect()
    };

    let mut x: Vec<f32> = (0..dim).map(|i| get("wte")[token * dim + i] + get("wpe")[pos * dim + i]).collect();

    for l in 0..config.n_layer {
        let p = |name: &str| get(&format!("h.{l}.{name}")).to_vec();
        let xb = norm(&x, &p("ln_2.weight"), &p("ln_2.bias"));
        let mut h = dense(&xb, &p("mlp.c_fc.weight"), hidden, dim);
        for (v, b) in h.iter_mut().zip(p("mlp.c_fc.bias")) {
            let u = *v + b;
            *v = 0.5 * u * (1.0 + (0.797_884_56 * (u + 0.044715 * u * u * u)).tanh());
        }
        let out = dense(&h, &p("mlp.c_proj.weight"), dim, hidden);
        for i in 0..dim {
            x[i] += out[i] + p("mlp.c_proj.bias")[i];
        }
    }

    let x = norm(&x, get("ln_f.weight"), get("ln_f.bias"));
    dense(&x, get("lm_head.weight"), config.vocab_size, dim)
}

#[test]
fn test_forward_matches_reference() {
    let config = config(2, 4, 3, 5);
    let len = WeightLayout::new(&config).unwrap().expected_len();
    let data = pseudo_random(len, 7);

    let model = Model::new(config, &data).unwrap();
    let mut state = RunState::new(&config).unwrap();

    for (token, pos) in [(0, 0), (3, 1), (4, 2), (1, 0)] {
        model.forward(&mut state, token, pos);
        assert_all_close(state.logits(), &reference_forward(&config, &data, token, pos), 1e-4);
    }
}

#[test]
fn test_forward_is_stateless_between_calls() {
    let config = config(2, 4, 3, 5);
    let len = WeightLayout::new(&config).unwrap().expected_len();
    let data = pseudo_random(len, 11);
    let model = Model::new(config, &data).unwrap();

    let mut first = RunState::new(&config).unwrap();
    model.forward(&mut first, 2, 1);
    let expected = first.logits().to_vec();

    // a reused state that saw other tokens, and a fresh one, agree bit for bit
    model.forward(&mut first, 4, 2);
    model.forward(&mut first, 2, 1);
    let mut second = RunState::new(&config).unwrap();
    model.forward(&mut second, 2, 1);

    assert_eq!(first.logits(), expected.as_slice());
    assert_eq!(second.logits(), expected.as_slice());
}

#[test]
fn test_run_state_sizes() {
    let config = config(3, 6, 10, 17);
    let state = RunState::new(&config).unwrap();

    assert_eq!(state.x.len(), 6);
    assert_eq!(state.xb.len(), 6);
    assert_eq!(state.xb2.len(), 6);
    assert_eq!(state.hb.len(), 24);
    assert_eq!(state.logits().len(), 17);
}

#[test]
fn test_model_rejects_wrong_buffer() {
    let config = config(0, 2, 4, 2);
    let mut data = flip_flop_weights(&config);
    data.push(0.0);

    let err = Model::new(config, &data).unwrap_err().downcast::<InferenceError>().unwrap();
    assert_eq!(err, InferenceError::WeightSizeMismatch { expected: 20, actual: 21 });
}
