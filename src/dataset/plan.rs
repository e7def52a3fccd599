//! Per-epoch batch index plans
//!
//! A run draws its batches either from the balanced sampler or as plain
//! fixed-size chunks of the dataset (shuffled when training, in order when
//! evaluating).

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::sampler::BalancedBatchSampler;
use crate::config::{RunConfig, SamplerKind};
use crate::utils::error::{CoTeachingError, Result};

#[derive(Debug, Clone)]
pub enum BatchPlan {
    Balanced(BalancedBatchSampler),
    Chunked {
        len: usize,
        batch_size: usize,
        shuffle: bool,
        rng: ChaCha8Rng,
    },
}

impl BatchPlan {
    /// Balanced batches of `batch_size / n_classes` samples per class
    pub fn balanced(
        labels: &[usize],
        batch_size: usize,
        n_classes: usize,
        n_batches: usize,
        training: bool,
        seed: u64,
    ) -> Result<Self> {
        let n_samples = batch_size / n_classes.max(1);
        if n_samples == 0 {
            return Err(CoTeachingError::Config(format!(
                "balanced sampling needs batch_size >= number of classes ({} < {})",
                batch_size, n_classes
            )));
        }
        Ok(Self::Balanced(BalancedBatchSampler::new(
            labels, n_samples, n_batches, training, seed,
        )?))
    }

    /// Consecutive chunks of `batch_size` indices; the last one may be short
    pub fn chunked(len: usize, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self::Chunked {
            len,
            batch_size: batch_size.max(1),
            shuffle,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Plan for one split of a run
    ///
    /// A balanced training plan emits one pass worth of batches
    /// (`len / batch_size`, at least one); a balanced evaluation plan emits
    /// `eval_batches` and replays them.
    pub fn for_run(
        config: &RunConfig,
        labels: &[usize],
        n_classes: usize,
        training: bool,
    ) -> Result<Self> {
        let seed = if training {
            config.seed
        } else {
            config.seed.wrapping_add(1)
        };

        match config.batch_sampler {
            SamplerKind::Balanced => {
                let n_batches = if training {
                    (labels.len() / config.batch_size).max(1)
                } else {
                    config.eval_batches
                };
                Self::balanced(labels, config.batch_size, n_classes, n_batches, training, seed)
            }
            SamplerKind::Default => Ok(Self::chunked(labels.len(), config.batch_size, training, seed)),
        }
    }

    /// Index batches for the next epoch
    pub fn next_epoch(&mut self) -> Vec<Vec<usize>> {
        match self {
            Self::Balanced(sampler) => sampler.next_epoch(),
            Self::Chunked {
                len,
                batch_size,
                shuffle,
                rng,
            } => {
                let mut order: Vec<usize> = (0..*len).collect();
                if *shuffle {
                    order.shuffle(rng);
                }
                order.chunks(*batch_size).map(|c| c.to_vec()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_sequential_covers_everything() {
        let mut plan = BatchPlan::chunked(10, 4, false, 0);
        let batches = plan.next_epoch();
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);
    }

    #[test]
    fn test_chunked_shuffle_is_a_permutation() {
        let mut plan = BatchPlan::chunked(10, 3, true, 42);
        let mut all: Vec<usize> = plan.next_epoch().into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_balanced_needs_one_sample_per_class() {
        let labels = vec![0, 1, 2, 0, 1, 2];
        assert!(matches!(
            BatchPlan::balanced(&labels, 2, 3, 1, true, 0),
            Err(CoTeachingError::Config(_))
        ));
        assert!(BatchPlan::balanced(&labels, 6, 3, 1, true, 0).is_ok());
    }

    #[test]
    fn test_for_run_balanced_training_size() {
        let mut config = RunConfig::default();
        config.batch_sampler = SamplerKind::Balanced;
        config.batch_size = 4;
        let labels: Vec<usize> = (0..20).map(|i| i % 2).collect();

        let mut plan = BatchPlan::for_run(&config, &labels, 2, true).unwrap();
        let batches = plan.next_epoch();
        assert_eq!(batches.len(), 5);
        assert!(batches.iter().all(|b| b.len() == 4));
    }
}
