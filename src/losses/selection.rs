//! Small-loss sample selection

/// Number of samples kept out of `n` at `keep_rate`: `max(1, floor(n * keep_rate))`
///
/// Zero only when there is nothing to keep.
pub fn num_kept(n: usize, keep_rate: f64) -> usize {
    if n == 0 {
        return 0;
    }
    // absorb rounding noise of the schedule, e.g. 10 * 0.7 = 6.9999...
    let kept = (n as f64 * keep_rate + 1e-9).floor();
    (kept.max(1.0) as usize).min(n)
}

/// The `num_kept(candidates.len(), keep_rate)` candidates with the smallest loss
///
/// `losses` is indexed by candidate value. Returned in ascending loss order;
/// ties go to the lower index and NaN ranks after every number.
pub fn select_smallest(losses: &[f32], candidates: &[usize], keep_rate: f64) -> Vec<usize> {
    let key = |i: usize| {
        let v = losses[i];
        if v.is_nan() {
            f32::INFINITY
        } else {
            v
        }
    };

    let mut ranked = candidates.to_vec();
    ranked.sort_by(|&a, &b| {
        key(a)
            .total_cmp(&key(b))
            .then_with(|| losses[a].is_nan().cmp(&losses[b].is_nan()))
            .then(a.cmp(&b))
    });
    ranked.truncate(num_kept(candidates.len(), keep_rate));
    ranked
}

/// Mean of `values` over `indices`, in f64
pub fn mean_at(values: &[f32], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| values[i] as f64).sum::<f64>() / indices.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_kept() {
        assert_eq!(num_kept(8, 0.75), 6);
        assert_eq!(num_kept(10, 0.7), 7);
        assert_eq!(num_kept(10, 0.01), 1);
        assert_eq!(num_kept(5, 1.0), 5);
        assert_eq!(num_kept(0, 0.5), 0);
    }

    #[test]
    fn test_select_smallest_orders_by_loss() {
        let losses = [0.9, 0.1, 0.5, 0.3];
        let all: Vec<usize> = (0..4).collect();
        assert_eq!(select_smallest(&losses, &all, 0.5), vec![1, 3]);
    }

    #[test]
    fn test_ties_and_nan() {
        let losses = [0.2, f32::NAN, 0.2, f32::INFINITY, 0.1];
        let all: Vec<usize> = (0..5).collect();
        assert_eq!(select_smallest(&losses, &all, 1.0), vec![4, 0, 2, 3, 1]);
    }

    #[test]
    fn test_restricted_candidates() {
        let losses = [0.0, 5.0, 4.0, 3.0];
        assert_eq!(select_smallest(&losses, &[1, 2, 3], 0.5), vec![3]);
    }

    #[test]
    fn test_mean_at() {
        assert!((mean_at(&[1.0, 2.0, 3.0], &[0, 2]) - 2.0).abs() < 1e-12);
        assert_eq!(mean_at(&[1.0], &[]), 0.0);
    }
}
