//! Per-epoch keep-rate and learning-rate schedules
//!
//! Epochs are 1-based throughout.

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::utils::error::{CoTeachingError, Result};

/// Adam `beta_1` before the decay phase
pub const MOM1: f32 = 0.9;
/// Adam `beta_1` during the decay phase
pub const MOM2: f32 = 0.1;

/// Fraction of each batch kept for the gradient step, per epoch
///
/// Ramps linearly from 1.0 to `keep_rate^exponent` over the first
/// `num_gradual` epochs, then stays at `keep_rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropRateSchedule {
    rates: Vec<f64>,
}

impl DropRateSchedule {
    pub fn new(n_epoch: usize, keep_rate: f64, num_gradual: usize, exponent: f64) -> Result<Self> {
        if n_epoch == 0 {
            return Err(CoTeachingError::Config(
                "n_epoch must be greater than 0".to_string(),
            ));
        }
        if !(keep_rate > 0.0 && keep_rate <= 1.0) {
            return Err(CoTeachingError::Config(format!(
                "keep_rate must be in (0, 1], got {}",
                keep_rate
            )));
        }
        if !exponent.is_finite() {
            return Err(CoTeachingError::Config(format!(
                "exponent must be finite, got {}",
                exponent
            )));
        }

        let end = keep_rate.powf(exponent);
        let ramp = |i: usize| {
            if num_gradual <= 1 {
                1.0
            } else {
                1.0 + (end - 1.0) * i as f64 / (num_gradual - 1) as f64
            }
        };

        let rates = (0..n_epoch)
            .map(|i| if i < num_gradual { ramp(i) } else { keep_rate })
            .collect();

        Ok(Self { rates })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Self::new(
            config.n_epoch,
            config.keep_rate,
            config.num_gradual,
            config.exponent,
        )
    }

    /// Keep rate of `epoch`; epochs past the end reuse the last value
    pub fn at(&self, epoch: usize) -> f64 {
        let i = epoch.saturating_sub(1).min(self.rates.len().saturating_sub(1));
        self.rates.get(i).copied().unwrap_or(1.0)
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }
}

/// Learning rate and Adam `beta_1` per epoch
///
/// Constant until `epoch_decay_start`, then a linear decay reaching zero at
/// `n_epoch` with `beta_1` dropped to [`MOM2`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LearningRateSchedule {
    pub lr: f64,
    pub epoch_decay_start: usize,
    pub n_epoch: usize,
}

impl LearningRateSchedule {
    pub fn new(lr: f64, epoch_decay_start: usize, n_epoch: usize) -> Self {
        Self {
            lr,
            epoch_decay_start,
            n_epoch,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.lr, config.epoch_decay_start, config.n_epoch)
    }

    /// `(learning_rate, beta_1)` for `epoch`
    pub fn at(&self, epoch: usize) -> (f64, f32) {
        if self.epoch_decay_start >= self.n_epoch || epoch < self.epoch_decay_start {
            return (self.lr, MOM1);
        }
        let remaining = self.n_epoch.saturating_sub(epoch) as f64;
        let span = (self.n_epoch - self.epoch_decay_start) as f64;
        (remaining / span * self.lr, MOM2)
    }
}
