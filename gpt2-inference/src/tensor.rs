#[cfg(test)]
#[path = "../tests/unit/tensor_test.rs"]
mod tensor_test;

/// Epsilon value for numerical stability in normalization
pub const LAYERNORM_EPSILON: f32 = 1e-5;

/// Approximation of sqrt(2 / pi) used by the tanh form of GELU
const GELU_SCALE: f32 = 0.797_884_56;

const GELU_CUBIC: f32 = 0.044715;

/// Matrix-vector product: `w` (d rows, n columns, row-major) @ `x` (n) -> `xout` (d).
pub fn matmul(xout: &mut [f32], x: &[f32], w: &[f32], n: usize, d: usize) {
    assert!(xout.len() >= d, "Output slice length must be at least d parameter: {} >= {}", xout.len(), d);
    debug_assert!(x.len() >= n, "Input slice shorter than n: {} < {}", x.len(), n);
    debug_assert_eq!(w.len(), n * d, "Weight matrix must hold d * n values");

    xout.iter_mut().take(d).zip(w.chunks_exact(n)).for_each(|(out_val, row)| {
        *out_val = row.iter().zip(&x[..n]).map(|(&w_val, &x_val)| w_val * x_val).sum();
    });
}

/// Mean and biased variance of `x`.
#[inline]
fn moments(x: &[f32]) -> (f32, f32) {
    let size = x.len() as f32;
    let mean = x.iter().sum::<f32>() / size;
    let var = x.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / size;
    (mean, var)
}

/// Layer normalization with an elementwise affine transform.
///
/// ```text
/// out = (x - mean(x)) / sqrt(var(x) + 1e-5) * weight + bias
/// ```
/// The variance is the biased (population) one.
pub fn layernorm(output: &mut [f32], x: &[f32], weight: &[f32], bias: &[f32]) {
    debug_assert_eq!(output.len(), x.len());
    debug_assert_eq!(x.len(), weight.len());
    debug_assert_eq!(x.len(), bias.len());

    let (mean, var) = moments(x);
    let std = (var + LAYERNORM_EPSILON).sqrt();

    output.iter_mut().zip(x).zip(weight.iter().zip(bias)).for_each(|((out, &val), (&w, &b))| {
        *out = ((val - mean) / std) * w + b;
    });
}

/// In-place variant of [`layernorm`].
pub fn layernorm_inplace(x: &mut [f32], weight: &[f32], bias: &[f32]) {
    debug_assert_eq!(x.len(), weight.len());
    debug_assert_eq!(x.len(), bias.len());

    let (mean, var) = moments(x);
    let std = (var + LAYERNORM_EPSILON).sqrt();

    x.iter_mut().zip(weight.iter().zip(bias)).for_each(|(val, (&w, &b))| {
        *val = ((*val - mean) / std) * w + b;
    });
}

/// Tanh approximation of GELU, applied in place.
pub fn gelu(x: &mut [f32]) {
    x.iter_mut().for_each(|val| {
        let v = *val;
        *val = 0.5 * v * (1.0 + (GELU_SCALE * (v + GELU_CUBIC * v * v * v)).tanh());
    });
}

/// Elementwise `x += delta`.
pub fn add_inplace(x: &mut [f32], delta: &[f32]) {
    debug_assert_eq!(x.len(), delta.len());
    x.iter_mut().zip(delta).for_each(|(x_val, &d)| *x_val += d);
}
