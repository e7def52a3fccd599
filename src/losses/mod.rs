//! Loss-and-selection family
//!
//! Each criterion takes both networks' outputs on the same batch and returns
//! two losses, each restricted to what the *other* network judged clean.
//!
//! - [`CoTeachingLoss`]: small-loss selection on per-sample cross-entropy
//! - [`CoTeachingLossPlus`]: the same, inside the samples the peers disagree on
//! - [`CoTeachingTripletLoss`]: small-loss selection on mined triplets
//! - [`CoTeachingTripletLossPlus`]: the same, inside the triplets the peers
//!   order differently

pub mod coteaching;
pub mod cross_entropy;
pub mod selection;
pub mod triplet;
pub mod triplet_selector;

pub use coteaching::{CoTeachingLoss, CoTeachingLossPlus};
pub use cross_entropy::per_sample_cross_entropy;
pub use selection::{num_kept, select_smallest};
pub use triplet::{CoTeachingTripletLoss, CoTeachingTripletLossPlus};
pub use triplet_selector::{pairwise_distances, Triplet, TripletSelector};

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::config::{LossKind, RunConfig};
use crate::utils::error::{Result, ResultExt};

/// Outcome of one co-teaching loss evaluation
#[derive(Debug, Clone)]
pub struct CoTeachingStep<B: Backend> {
    /// Network 1's loss on the selection made by network 2
    pub loss_1: Tensor<B, 1>,
    /// Network 2's loss on the selection made by network 1
    pub loss_2: Tensor<B, 1>,
    /// Scalar value of `loss_1`
    pub loss_1_value: f64,
    pub loss_2_value: f64,
    /// Network 1's mean loss over everything, before selection
    pub total_loss_1: f64,
    pub total_loss_2: f64,
    /// Candidates network 1 judged clean, in ascending loss order.
    /// Samples of the batch, or triplets of network 1's triplet set.
    pub selected_by_1: Vec<usize>,
    pub selected_by_2: Vec<usize>,
    /// The selection fell back to the full candidate set or found nothing
    /// to select
    pub degenerate: bool,
}

/// The loss of a run, fixed at configuration time
#[derive(Debug, Clone)]
pub enum CoTeachingCriterion {
    CoTeaching(CoTeachingLoss),
    CoTeachingPlus(CoTeachingLossPlus),
    Triplet(CoTeachingTripletLoss),
    TripletPlus(CoTeachingTripletLossPlus),
}

impl CoTeachingCriterion {
    /// Build the configured criterion; `class_weights` only affects the
    /// cross-entropy variants
    pub fn from_config(config: &RunConfig, class_weights: Option<Vec<f32>>) -> Self {
        let selector = || {
            TripletSelector::new(config.negative_selection, config.triplet_margin, config.seed)
        };

        match config.loss_fn {
            LossKind::CoTeaching => Self::CoTeaching(CoTeachingLoss::new(class_weights)),
            LossKind::CoTeachingPlus => {
                Self::CoTeachingPlus(CoTeachingLossPlus::new(class_weights))
            }
            LossKind::CoTeachingTriplet => Self::Triplet(CoTeachingTripletLoss::new(selector())),
            LossKind::CoTeachingTripletPlus => {
                Self::TripletPlus(CoTeachingTripletLossPlus::new(selector()))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CoTeaching(_) => "CoTeachingLoss",
            Self::CoTeachingPlus(_) => "CoTeachingLoss+",
            Self::Triplet(_) => "CoTeachingTripletLoss",
            Self::TripletPlus(_) => "CoTeachingTripletLoss+",
        }
    }

    /// Outputs are embeddings rather than logits
    pub fn is_metric_learning(&self) -> bool {
        matches!(self, Self::Triplet(_) | Self::TripletPlus(_))
    }

    /// Losses of both networks on one batch at `keep_rate`
    pub fn step<B: Backend>(
        &mut self,
        output_1: Tensor<B, 2>,
        output_2: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        keep_rate: f64,
    ) -> Result<CoTeachingStep<B>> {
        match self {
            Self::CoTeaching(loss) => loss.forward(output_1, output_2, targets, keep_rate),
            Self::CoTeachingPlus(loss) => loss.forward(output_1, output_2, targets, keep_rate),
            Self::Triplet(loss) => {
                let labels = labels_to_host(targets)?;
                loss.forward(output_1, output_2, &labels, keep_rate)
            }
            Self::TripletPlus(loss) => {
                let labels = labels_to_host(targets)?;
                loss.forward(output_1, output_2, &labels, keep_rate)
            }
        }
    }
}

/// Copy a float tensor to the host
pub(crate) fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .context("failed to read tensor")
}

/// Copy integer class targets to the host
pub(crate) fn labels_to_host<B: Backend>(targets: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values = targets
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .context("failed to read targets")?;
    Ok(values.into_iter().map(|v| v as usize).collect())
}

pub(crate) fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(data, [indices.len()]), device)
}
