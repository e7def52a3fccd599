//! Dataset Module
//!
//! Image-folder loading, normalization statistics, the Burn dataset and
//! batcher, training-time augmentation and the batch index plans (balanced
//! or plain) that drive every epoch.

pub mod augmentation;
pub mod burn_dataset;
pub mod folder;
pub mod plan;
pub mod sampler;
pub mod statistics;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{CoTeachingBatch, CoTeachingBatcher, ImageDataset, ImageItem};
pub use folder::{ImageFolder, ImageSample};
pub use plan::BatchPlan;
pub use sampler::BalancedBatchSampler;
pub use statistics::ChannelStats;

use serde::{Deserialize, Serialize};

/// Immutable description of the dataset a run trains on
///
/// Built once from the training split and threaded through the model,
/// loss and batcher constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    /// Class names, index = label
    pub classes: Vec<String>,
    /// Training samples per class
    pub class_counts: Vec<usize>,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl DatasetInfo {
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// `w_c = 1 - n_c / sum(n)`
    pub fn class_weights(&self) -> Vec<f32> {
        let total: usize = self.class_counts.iter().sum();
        if total == 0 {
            return vec![1.0; self.class_counts.len()];
        }
        self.class_counts
            .iter()
            .map(|&n| 1.0 - n as f32 / total as f32)
            .collect()
    }
}
