//! Online triplet mining
//!
//! For every class with at least two members in the batch, every ordered
//! (anchor, positive) pair of distinct members is offered one negative from
//! the other classes. The policy picks it from the anchor's distances:
//!
//! - `Random`: uniformly among negatives with `d(a,n) < d(a,p) + margin`
//! - `Hardest`: the closest negative, violator or not
//! - `Semihard`: the farthest negative with `d(a,p) < d(a,n) < d(a,p) + margin`
//!
//! Random and semihard skip the pair when no negative qualifies.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::NegativeSelection;

/// Indices into the current batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub anchor: usize,
    pub positive: usize,
    pub negative: usize,
}

/// Squared Euclidean distances `[n * n]` of `n` row-major embeddings
///
/// Uses `|a|^2 + |b|^2 - 2 a.b`, clamped at zero.
pub fn pairwise_distances(embeddings: &[f32], n: usize, dim: usize) -> Vec<f32> {
    let norms: Vec<f32> = embeddings
        .chunks_exact(dim)
        .take(n)
        .map(|row| row.iter().map(|v| v * v).sum())
        .collect();

    let mut distances = vec![0f32; n * n];
    for i in 0..n {
        let a = &embeddings[i * dim..(i + 1) * dim];
        for j in i + 1..n {
            let b = &embeddings[j * dim..(j + 1) * dim];
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let d = (norms[i] + norms[j] - 2.0 * dot).max(0.0);
            distances[i * n + j] = d;
            distances[j * n + i] = d;
        }
    }
    distances
}

/// Picks negatives for each anchor/positive pair under one policy
#[derive(Debug, Clone)]
pub struct TripletSelector {
    policy: NegativeSelection,
    margin: f32,
    rng: ChaCha8Rng,
}

impl TripletSelector {
    pub fn new(policy: NegativeSelection, margin: f32, seed: u64) -> Self {
        Self {
            policy,
            margin,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    pub fn policy(&self) -> NegativeSelection {
        self.policy
    }

    /// Triplets of one batch of `labels.len()` embeddings of width `dim`
    pub fn select(&mut self, embeddings: &[f32], dim: usize, labels: &[usize]) -> Vec<Triplet> {
        let n = labels.len();
        let distances = pairwise_distances(embeddings, n, dim);

        let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            classes.entry(label).or_default().push(i);
        }

        let mut triplets = Vec::new();
        for (&label, members) in &classes {
            if members.len() < 2 {
                continue;
            }
            let negatives: Vec<usize> = (0..n).filter(|&i| labels[i] != label).collect();
            if negatives.is_empty() {
                continue;
            }

            for &anchor in members {
                let row = &distances[anchor * n..(anchor + 1) * n];
                for &positive in members {
                    if positive == anchor {
                        continue;
                    }
                    if let Some(negative) = self.pick_negative(row[positive], row, &negatives) {
                        triplets.push(Triplet {
                            anchor,
                            positive,
                            negative,
                        });
                    }
                }
            }
        }
        triplets
    }

    /// One negative for an anchor whose distances are `row`, or none
    fn pick_negative(&mut self, d_ap: f32, row: &[f32], negatives: &[usize]) -> Option<usize> {
        let margin = self.margin;
        match self.policy {
            NegativeSelection::Hardest => negatives
                .iter()
                .copied()
                .min_by(|&a, &b| row[a].total_cmp(&row[b]).then(a.cmp(&b))),
            NegativeSelection::Random => {
                let violators: Vec<usize> = negatives
                    .iter()
                    .copied()
                    .filter(|&i| row[i] < d_ap + margin)
                    .collect();
                violators.choose(&mut self.rng).copied()
            }
            NegativeSelection::Semihard => negatives
                .iter()
                .copied()
                .filter(|&i| row[i] > d_ap && row[i] < d_ap + margin)
                .max_by(|&a, &b| row[a].total_cmp(&row[b]).then(b.cmp(&a))),
        }
    }
}
