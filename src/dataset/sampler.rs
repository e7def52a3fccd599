//! Class-balanced batch sampling
//!
//! Every batch holds exactly `n_samples` indices of each class. Each class
//! owns a shuffled arena of its indices and a cursor into it; when fewer than
//! `n_samples` indices remain after the cursor, the arena is reshuffled and
//! the cursor reset, so an index never repeats within one batch.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::utils::error::{CoTeachingError, Result};

#[derive(Debug, Clone)]
struct ClassPool {
    label: usize,
    indices: Vec<usize>,
    cursor: usize,
}

impl ClassPool {
    fn reshuffle(&mut self, rng: &mut ChaCha8Rng) {
        self.indices.shuffle(rng);
        self.cursor = 0;
    }

    fn draw(&mut self, n: usize, rng: &mut ChaCha8Rng, out: &mut Vec<usize>) {
        if self.cursor + n > self.indices.len() {
            self.reshuffle(rng);
        }
        out.extend_from_slice(&self.indices[self.cursor..self.cursor + n]);
        self.cursor += n;
    }
}

/// Emits `n_batches` balanced batches per pass
///
/// In training mode every pass starts from freshly shuffled arenas. In
/// evaluation mode the first pass is kept and replayed unchanged, so each
/// evaluation sees the same subset.
#[derive(Debug, Clone)]
pub struct BalancedBatchSampler {
    pools: Vec<ClassPool>,
    n_samples: usize,
    n_batches: usize,
    training: bool,
    rng: ChaCha8Rng,
    replay: Option<Vec<Vec<usize>>>,
}

impl BalancedBatchSampler {
    /// Build the per-class arenas from the full label vector
    pub fn new(
        labels: &[usize],
        n_samples: usize,
        n_batches: usize,
        training: bool,
        seed: u64,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(CoTeachingError::Sampler("label vector is empty".to_string()));
        }
        if n_samples == 0 {
            return Err(CoTeachingError::Sampler(
                "n_samples per class must be at least 1".to_string(),
            ));
        }
        if n_batches == 0 {
            return Err(CoTeachingError::Sampler(
                "n_batches must be at least 1".to_string(),
            ));
        }

        let mut by_label: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, &label) in labels.iter().enumerate() {
            by_label.entry(label).or_default().push(idx);
        }

        if let Some((label, indices)) = by_label.iter().find(|(_, idx)| idx.len() < n_samples) {
            return Err(CoTeachingError::Sampler(format!(
                "class {} has {} samples, fewer than the {} required per batch",
                label,
                indices.len(),
                n_samples
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut pools: Vec<ClassPool> = by_label
            .into_iter()
            .map(|(label, indices)| ClassPool {
                label,
                indices,
                cursor: 0,
            })
            .collect();
        for pool in &mut pools {
            pool.reshuffle(&mut rng);
        }

        debug!(
            "Balanced sampler: {} classes x {} samples, {} batches, training={}",
            pools.len(),
            n_samples,
            n_batches,
            training
        );

        Ok(Self {
            pools,
            n_samples,
            n_batches,
            training,
            rng,
            replay: None,
        })
    }

    pub fn n_classes(&self) -> usize {
        self.pools.len()
    }

    pub fn n_batches(&self) -> usize {
        self.n_batches
    }

    /// `n_samples * n_classes`
    pub fn batch_size(&self) -> usize {
        self.n_samples * self.pools.len()
    }

    /// Labels present, ascending
    pub fn labels(&self) -> Vec<usize> {
        self.pools.iter().map(|p| p.label).collect()
    }

    /// Index batches for one pass over the data
    pub fn next_epoch(&mut self) -> Vec<Vec<usize>> {
        if !self.training {
            if let Some(batches) = &self.replay {
                return batches.clone();
            }
        } else {
            for pool in &mut self.pools {
                pool.reshuffle(&mut self.rng);
            }
        }

        let batches: Vec<Vec<usize>> = (0..self.n_batches).map(|_| self.draw_batch()).collect();

        if !self.training {
            self.replay = Some(batches.clone());
        }
        batches
    }

    fn draw_batch(&mut self) -> Vec<usize> {
        let mut batch = Vec::with_capacity(self.batch_size());
        for pool in &mut self.pools {
            pool.draw(self.n_samples, &mut self.rng, &mut batch);
        }
        batch
    }
}
