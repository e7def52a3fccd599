//! Per-sample cross-entropy

use burn::tensor::activation::log_softmax;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

/// Unreduced cross-entropy `[N]` of logits `[N, C]` against class targets
///
/// With class weights each sample's loss is scaled by the weight of its
/// target class.
pub fn per_sample_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    class_weights: Option<&[f32]>,
) -> Tensor<B, 1> {
    let [n, _] = logits.dims();
    let device = logits.device();

    let log_probs = log_softmax(logits, 1);
    let nll = log_probs
        .gather(1, targets.clone().reshape([n, 1]))
        .reshape([n])
        .neg();

    match class_weights {
        Some(weights) => {
            let weights = Tensor::<B, 1>::from_floats(
                TensorData::new(weights.to_vec(), [weights.len()]),
                &device,
            );
            nll * weights.select(0, targets)
        }
        None => nll,
    }
}
