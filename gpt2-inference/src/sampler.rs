/// Greedy token selection over logits.
///
/// Returns the first index holding the largest value: a strict `>` scan keeps the
/// lowest index on ties. NaN entries never win. An empty or all-NaN slice yields 0.
pub fn sample_argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best_idx, best_val), (i, &val)| {
            if val > best_val { (i, val) } else { (best_idx, best_val) }
        })
        .0
}
