/// Nearest-rank percentile over samples sorted ascending.
///
/// `index = ceil(p / 100 * n) - 1`, clamped to `[0, n - 1]`. Returns `None` for an empty slice.
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    sorted.get(nearest_rank_index(p, sorted.len())).copied()
}

/// Index selected by [`nearest_rank`] for `n > 0` samples.
pub fn nearest_rank_index(p: f64, n: usize) -> usize {
    let last = n.saturating_sub(1);
    if !p.is_finite() || p <= 0.0 {
        return 0;
    }
    // Decimal percentiles such as 99.9 are inexact in binary; shave float noise before `ceil`.
    let rank = (p * n as f64 / 100.0 - 1e-9).ceil();
    if rank < 1.0 {
        return 0;
    }
    ((rank as usize) - 1).min(last)
}
