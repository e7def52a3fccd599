//! Run Configuration
//!
//! All options of a co-teaching run, the closed enums they are parsed into,
//! and JSON load/save. Names are parsed once, up front; an unknown name is a
//! configuration error raised before any data or model is touched.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{CoTeachingError, Result};

/// Train or evaluate a pair of networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
}

impl FromStr for Mode {
    type Err = CoTeachingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(CoTeachingError::Config(format!(
                "unknown mode '{}' (expected train or test)",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Loss-and-selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    #[serde(rename = "co_teaching")]
    CoTeaching,
    #[serde(rename = "co_teaching+")]
    CoTeachingPlus,
    #[serde(rename = "co_teaching_triplet")]
    CoTeachingTriplet,
    #[serde(rename = "co_teaching_triplet+")]
    CoTeachingTripletPlus,
}

impl LossKind {
    /// Triplet losses train on embeddings instead of logits
    pub fn is_metric_learning(&self) -> bool {
        matches!(self, Self::CoTeachingTriplet | Self::CoTeachingTripletPlus)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoTeaching => "co_teaching",
            Self::CoTeachingPlus => "co_teaching+",
            Self::CoTeachingTriplet => "co_teaching_triplet",
            Self::CoTeachingTripletPlus => "co_teaching_triplet+",
        }
    }
}

impl FromStr for LossKind {
    type Err = CoTeachingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "co_teaching" => Ok(Self::CoTeaching),
            "co_teaching+" => Ok(Self::CoTeachingPlus),
            "co_teaching_triplet" => Ok(Self::CoTeachingTriplet),
            "co_teaching_triplet+" => Ok(Self::CoTeachingTripletPlus),
            other => Err(CoTeachingError::Config(format!(
                "unknown loss function '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How mini-batches are drawn from a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Fixed `n_samples` per class in every batch
    Balanced,
    /// Fixed-size batches, shuffled for training and sequential for evaluation
    Default,
}

impl FromStr for SamplerKind {
    type Err = CoTeachingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "balanced" => Ok(Self::Balanced),
            "default" | "co_teaching" => Ok(Self::Default),
            other => Err(CoTeachingError::Config(format!(
                "unknown batch sampler '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Balanced => write!(f, "balanced"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Network architecture used for both peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackboneKind {
    /// Four conv blocks, wide head
    CoTeaching,
    /// Three conv blocks, narrow head
    Lite,
}

impl FromStr for BackboneKind {
    type Err = CoTeachingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "co_teaching" => Ok(Self::CoTeaching),
            "lite" => Ok(Self::Lite),
            other => Err(CoTeachingError::Config(format!(
                "unknown backbone '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoTeaching => write!(f, "co_teaching"),
            Self::Lite => write!(f, "lite"),
        }
    }
}

/// Supported dataset identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    #[serde(rename = "SAR_8A")]
    Sar8A,
    #[serde(rename = "SAR_4L")]
    Sar4L,
    #[serde(rename = "VAIS_RGB")]
    VaisRgb,
    #[serde(rename = "G_FLOOD")]
    GFlood,
    #[serde(rename = "MedEval17")]
    MedEval17,
}

impl DatasetKind {
    /// Directory name under the data root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Sar8A => "SAR_8A",
            Self::Sar4L => "SAR_4L",
            Self::VaisRgb => "VAIS_RGB",
            Self::GFlood => "G_FLOOD",
            Self::MedEval17 => "MedEval17",
        }
    }
}

impl FromStr for DatasetKind {
    type Err = CoTeachingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SAR_8A" => Ok(Self::Sar8A),
            "SAR_4L" => Ok(Self::Sar4L),
            "VAIS_RGB" => Ok(Self::VaisRgb),
            "G_FLOOD" => Ok(Self::GFlood),
            "MedEval17" => Ok(Self::MedEval17),
            other => Err(CoTeachingError::Config(format!(
                "unknown dataset '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Negative-mining policy for the triplet losses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegativeSelection {
    Random,
    Hardest,
    Semihard,
}

impl FromStr for NegativeSelection {
    type Err = CoTeachingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(Self::Random),
            "hardest" => Ok(Self::Hardest),
            "semihard" => Ok(Self::Semihard),
            other => Err(CoTeachingError::Config(format!(
                "unknown negative selection '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for NegativeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::Hardest => write!(f, "hardest"),
            Self::Semihard => write!(f, "semihard"),
        }
    }
}

/// Every option of a co-teaching run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Random seed for sampling, augmentation and weight init
    pub seed: u64,

    pub mode: Mode,

    pub dataset: DatasetKind,

    /// Root holding `<dataset>/{train,test}/<class>/*`
    pub data_dir: PathBuf,

    /// Checkpoints, history and reports are written here
    pub output_dir: PathBuf,

    /// Square resize target; -1 keeps the original size
    pub input_size: i32,

    /// Augment training images
    pub augment: bool,

    pub backbone: BackboneKind,

    pub batch_sampler: SamplerKind,

    pub loss_fn: LossKind,

    pub negative_selection: NegativeSelection,

    pub triplet_margin: f32,

    /// Weight the cross-entropy by `1 - n_c / sum(n)`
    pub use_classes_weight: bool,

    /// Final fraction of each batch kept for the update
    pub keep_rate: f64,

    /// Epochs over which the keep rate ramps down from 1.0
    pub num_gradual: usize,

    /// Shape exponent `c` of the ramp end point `keep_rate^c`
    pub exponent: f64,

    pub lr: f64,

    pub eval_freq: usize,

    pub save_freq: usize,

    pub n_epoch: usize,

    pub epoch_decay_start: usize,

    pub batch_size: usize,

    /// Batches per evaluation pass with the balanced sampler
    pub eval_batches: usize,

    /// Checkpoint stem to start network 1 from
    pub model1_name: Option<String>,

    /// Class count of the network 1 checkpoint
    pub model1_numclasses: usize,

    pub model2_name: Option<String>,

    pub model2_numclasses: usize,

    /// Per-channel normalization mean; computed from the training set when absent
    pub mean: Option<[f32; 3]>,

    pub std: Option<[f32; 3]>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            mode: Mode::Train,
            dataset: DatasetKind::Sar8A,
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output/models"),
            input_size: 112,
            augment: true,
            backbone: BackboneKind::CoTeaching,
            batch_sampler: SamplerKind::Default,
            loss_fn: LossKind::CoTeaching,
            negative_selection: NegativeSelection::Semihard,
            triplet_margin: 1.0,
            use_classes_weight: false,
            keep_rate: 0.7,
            num_gradual: 10,
            exponent: 1.0,
            lr: 1e-5,
            eval_freq: 5,
            save_freq: 10,
            n_epoch: 50,
            epoch_decay_start: 20,
            batch_size: 8,
            eval_batches: 50,
            model1_name: None,
            model1_numclasses: 365,
            model2_name: None,
            model2_numclasses: 365,
            mean: None,
            std: None,
        }
    }
}

impl RunConfig {
    /// Resize target, `None` when images keep their original size
    pub fn resize_to(&self) -> Option<u32> {
        if self.input_size > 0 {
            Some(self.input_size as u32)
        } else {
            None
        }
    }

    /// `<data_dir>/<dataset>/<split>`
    pub fn split_dir(&self, split: &str) -> PathBuf {
        self.data_dir.join(self.dataset.dir_name()).join(split)
    }

    /// Check numeric ranges and mode requirements
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(CoTeachingError::Config(msg));

        if !(self.keep_rate > 0.0 && self.keep_rate <= 1.0) {
            return fail(format!("keep_rate must be in (0, 1], got {}", self.keep_rate));
        }
        if !self.exponent.is_finite() {
            return fail(format!("exponent must be finite, got {}", self.exponent));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return fail(format!("lr must be positive, got {}", self.lr));
        }
        if !(self.triplet_margin.is_finite() && self.triplet_margin >= 0.0) {
            return fail(format!(
                "triplet_margin must be non-negative, got {}",
                self.triplet_margin
            ));
        }
        if self.n_epoch == 0 {
            return fail("n_epoch must be greater than 0".to_string());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0".to_string());
        }
        if self.eval_freq == 0 || self.save_freq == 0 {
            return fail("eval_freq and save_freq must be greater than 0".to_string());
        }
        if self.eval_batches == 0 {
            return fail("eval_batches must be greater than 0".to_string());
        }
        if self.input_size == 0 || self.input_size < -1 {
            return fail(format!(
                "input_size must be positive or -1, got {}",
                self.input_size
            ));
        }
        if let Some(std) = self.std {
            if std.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                return fail(format!("std must be positive, got {:?}", std));
            }
        }
        if self.mode == Mode::Test && (self.model1_name.is_none() || self.model2_name.is_none()) {
            return fail("test mode needs both model1_name and model2_name".to_string());
        }

        Ok(())
    }

    /// Check the settings that depend on the dataset's class count
    pub fn check_classes(&self, n_classes: usize) -> Result<()> {
        if self.batch_sampler == SamplerKind::Balanced && self.batch_size < n_classes {
            return Err(CoTeachingError::Config(format!(
                "balanced sampling needs batch_size >= number of classes ({} < {})",
                self.batch_size, n_classes
            )));
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoTeachingError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
