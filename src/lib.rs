//! # Co-Teaching
//!
//! Robust training of image classifiers on noisy labels with the Burn
//! framework. Two networks are trained side by side; on every mini-batch
//! each one picks the samples it finds easiest and the other network learns
//! only from those.
//!
//! ## Modules
//!
//! - `config`: run configuration and its closed name enums
//! - `dataset`: image folders, normalization, batching and batch plans
//! - `model`: the CNN backbone and its checkpoints
//! - `losses`: co-teaching losses and sample/triplet selection
//! - `training`: schedules, the train/eval loop and the entry points
//! - `utils`: errors, logging and metrics

pub mod backend;
pub mod config;
pub mod dataset;
pub mod losses;
pub mod model;
pub mod training;
pub mod utils;

pub use backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
pub use config::{
    BackboneKind, DatasetKind, LossKind, Mode, NegativeSelection, RunConfig, SamplerKind,
};
pub use dataset::{BalancedBatchSampler, DatasetInfo, ImageDataset, ImageFolder};
pub use losses::{CoTeachingCriterion, CoTeachingStep};
pub use model::{CoTeachingNet, CoTeachingNetConfig};
pub use training::{run_coeval, run_coteaching, CoTeachingTrainer};
pub use utils::error::{CoTeachingError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
