//! Cross-entropy co-teaching losses

use burn::tensor::{backend::Backend, Int, Tensor};
use tracing::debug;

use super::cross_entropy::per_sample_cross_entropy;
use super::selection::{mean_at, select_smallest};
use super::{index_tensor, to_host, CoTeachingStep};
use crate::utils::error::Result;
use crate::utils::metrics::argmax_rows;

/// Small-loss cross-teaching on per-sample cross-entropy
///
/// Each network ranks the batch by its own loss; the smallest
/// `max(1, floor(N * keep_rate))` samples of that ranking are what the other
/// network is trained on.
#[derive(Debug, Clone, Default)]
pub struct CoTeachingLoss {
    class_weights: Option<Vec<f32>>,
}

impl CoTeachingLoss {
    pub fn new(class_weights: Option<Vec<f32>>) -> Self {
        Self { class_weights }
    }

    pub fn forward<B: Backend>(
        &self,
        logits_1: Tensor<B, 2>,
        logits_2: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        keep_rate: f64,
    ) -> Result<CoTeachingStep<B>> {
        let [n, _] = logits_1.dims();
        let all: Vec<usize> = (0..n).collect();
        self.forward_within(logits_1, logits_2, targets, keep_rate, &all)
    }

    /// Rank and select among `candidates` only
    pub(crate) fn forward_within<B: Backend>(
        &self,
        logits_1: Tensor<B, 2>,
        logits_2: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        keep_rate: f64,
        candidates: &[usize],
    ) -> Result<CoTeachingStep<B>> {
        let device = logits_1.device();
        let weights = self.class_weights.as_deref();

        let losses_1 = per_sample_cross_entropy(logits_1, targets.clone(), weights);
        let losses_2 = per_sample_cross_entropy(logits_2, targets, weights);

        let values_1 = to_host(losses_1.clone())?;
        let values_2 = to_host(losses_2.clone())?;
        let all: Vec<usize> = (0..values_1.len()).collect();

        let selected_by_1 = select_smallest(&values_1, candidates, keep_rate);
        let selected_by_2 = select_smallest(&values_2, candidates, keep_rate);

        let loss_1 = losses_1
            .select(0, index_tensor::<B>(&selected_by_2, &device))
            .mean();
        let loss_2 = losses_2
            .select(0, index_tensor::<B>(&selected_by_1, &device))
            .mean();

        Ok(CoTeachingStep {
            loss_1,
            loss_2,
            loss_1_value: mean_at(&values_1, &selected_by_2),
            loss_2_value: mean_at(&values_2, &selected_by_1),
            total_loss_1: mean_at(&values_1, &all),
            total_loss_2: mean_at(&values_2, &all),
            selected_by_1,
            selected_by_2,
            degenerate: false,
        })
    }
}

/// Co-teaching restricted to the samples the two networks predict differently
///
/// When the networks agree on every sample the whole batch is used.
#[derive(Debug, Clone, Default)]
pub struct CoTeachingLossPlus {
    inner: CoTeachingLoss,
}

impl CoTeachingLossPlus {
    pub fn new(class_weights: Option<Vec<f32>>) -> Self {
        Self {
            inner: CoTeachingLoss::new(class_weights),
        }
    }

    pub fn forward<B: Backend>(
        &self,
        logits_1: Tensor<B, 2>,
        logits_2: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        keep_rate: f64,
    ) -> Result<CoTeachingStep<B>> {
        let [n, classes] = logits_1.dims();
        let pred_1 = argmax_rows(&to_host(logits_1.clone())?, classes);
        let pred_2 = argmax_rows(&to_host(logits_2.clone())?, classes);

        let disagreement: Vec<usize> = (0..n).filter(|&i| pred_1[i] != pred_2[i]).collect();

        if disagreement.is_empty() {
            debug!("Networks agree on all {} samples, selecting from the full batch", n);
            let mut step = self.inner.forward(logits_1, logits_2, targets, keep_rate)?;
            step.degenerate = true;
            return Ok(step);
        }

        self.inner
            .forward_within(logits_1, logits_2, targets, keep_rate, &disagreement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::losses::num_kept;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    /// Logits whose cross-entropy against class 0 grows with `strength`
    fn logits_from(strengths: &[f32]) -> Tensor<TestBackend, 2> {
        let data: Vec<f32> = strengths.iter().flat_map(|&s| [0.0, s]).collect();
        Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &Default::default())
            .reshape([strengths.len(), 2])
    }

    fn zeros_targets(n: usize) -> Tensor<TestBackend, 1, Int> {
        Tensor::zeros([n], &Default::default())
    }

    #[test]
    fn test_cross_selection_uses_peer_ranking() {
        // network 1 finds samples 0..3 easy, network 2 finds samples 4..7 easy
        let logits_1 = logits_from(&[0.0, 0.1, 0.2, 0.3, 5.0, 6.0, 7.0, 8.0]);
        let logits_2 = logits_from(&[8.0, 7.0, 6.0, 5.0, 0.3, 0.2, 0.1, 0.0]);

        let loss = CoTeachingLoss::default();
        let step = loss
            .forward(logits_1, logits_2, zeros_targets(8), 0.75)
            .unwrap();

        assert_eq!(num_kept(8, 0.75), 6);
        assert_eq!(step.selected_by_1, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(step.selected_by_2, vec![7, 6, 5, 4, 3, 2]);

        // loss_1 is network 1's loss on network 2's selection, which holds
        // network 1's hardest samples
        let own = CoTeachingLoss::default()
            .forward(
                logits_from(&[0.0, 0.1, 0.2, 0.3, 5.0, 6.0, 7.0, 8.0]),
                logits_from(&[0.0, 0.1, 0.2, 0.3, 5.0, 6.0, 7.0, 8.0]),
                zeros_targets(8),
                0.75,
            )
            .unwrap();
        assert!(step.loss_1_value > own.loss_1_value);

        let tensor_value = step.loss_1.into_data().to_vec::<f32>().unwrap()[0] as f64;
        assert!((tensor_value - step.loss_1_value).abs() < 1e-5);
    }

    #[test]
    fn test_keep_all_equals_full_mean() {
        let logits = logits_from(&[0.5, 1.0, 2.0, 3.0]);
        let step = CoTeachingLoss::default()
            .forward(logits.clone(), logits, zeros_targets(4), 1.0)
            .unwrap();

        assert_eq!(step.selected_by_1.len(), 4);
        assert!((step.loss_1_value - step.total_loss_1).abs() < 1e-6);
        assert!((step.loss_2_value - step.total_loss_2).abs() < 1e-6);
    }

    #[test]
    fn test_plus_selects_inside_disagreement() {
        // samples 1 and 3 are predicted differently by the two networks
        let logits_1 = logits_from(&[-1.0, 2.0, -1.0, -3.0]);
        let logits_2 = logits_from(&[-1.0, -2.0, -1.0, 3.0]);

        let step = CoTeachingLossPlus::default()
            .forward(logits_1, logits_2, zeros_targets(4), 0.5)
            .unwrap();

        assert!(!step.degenerate);
        assert_eq!(step.selected_by_1, vec![3]);
        assert_eq!(step.selected_by_2, vec![1]);
    }

    #[test]
    fn test_plus_falls_back_to_full_batch() {
        let logits = logits_from(&[-1.0, -2.0, -3.0, -4.0]);
        let step = CoTeachingLossPlus::default()
            .forward(logits.clone(), logits, zeros_targets(4), 0.5)
            .unwrap();

        assert!(step.degenerate);
        assert_eq!(step.selected_by_1.len(), 2);
    }
}
