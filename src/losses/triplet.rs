//! Triplet co-teaching losses
//!
//! Each network mines triplets from its own embeddings and ranks them by its
//! own hinge `max(0, d(a,p) - d(a,n) + margin)`. The easiest
//! `max(1, floor(T * keep_rate))` triplets of network 1's set train network 2,
//! and the other way around.

use burn::tensor::{backend::Backend, Tensor};
use tracing::warn;

use super::selection::{mean_at, select_smallest};
use super::triplet_selector::{pairwise_distances, Triplet, TripletSelector};
use super::{index_tensor, to_host, CoTeachingStep};
use crate::utils::error::Result;

fn host_hinge(distances: &[f32], n: usize, t: &Triplet, margin: f32) -> f32 {
    let d_ap = distances[t.anchor * n + t.positive];
    let d_an = distances[t.anchor * n + t.negative];
    (d_ap - d_an + margin).max(0.0)
}

/// Differentiable hinge `[T]` of `triplets` on `embeddings`
fn hinge<B: Backend>(embeddings: Tensor<B, 2>, triplets: &[Triplet], margin: f32) -> Tensor<B, 1> {
    let device = embeddings.device();
    let count = triplets.len();
    let rows = |pick: fn(&Triplet) -> usize| {
        let indices: Vec<usize> = triplets.iter().map(pick).collect();
        embeddings.clone().select(0, index_tensor::<B>(&indices, &device))
    };

    let anchors = rows(|t| t.anchor);
    let positives = rows(|t| t.positive);
    let negatives = rows(|t| t.negative);

    let d_ap = (anchors.clone() - positives)
        .powf_scalar(2.0)
        .sum_dim(1)
        .reshape([count]);
    let d_an = (anchors - negatives)
        .powf_scalar(2.0)
        .sum_dim(1)
        .reshape([count]);

    (d_ap - d_an).add_scalar(margin).clamp_min(0.0)
}

/// Whether the two networks order the negative and the positive differently
fn disagrees(t: &Triplet, d_1: &[f32], d_2: &[f32], n: usize) -> bool {
    let closer = |d: &[f32]| d[t.anchor * n + t.positive] < d[t.anchor * n + t.negative];
    closer(d_1) != closer(d_2)
}

/// Positions of the disagreeing triplets, or `None` when there are none
fn disagreeing(triplets: &[Triplet], d_1: &[f32], d_2: &[f32], n: usize) -> Option<Vec<usize>> {
    let kept: Vec<usize> = triplets
        .iter()
        .enumerate()
        .filter(|(_, t)| disagrees(t, d_1, d_2, n))
        .map(|(i, _)| i)
        .collect();
    (!kept.is_empty()).then_some(kept)
}

#[derive(Debug, Clone)]
pub struct CoTeachingTripletLoss {
    selector: TripletSelector,
}

impl CoTeachingTripletLoss {
    pub fn new(selector: TripletSelector) -> Self {
        Self { selector }
    }

    pub fn margin(&self) -> f32 {
        self.selector.margin()
    }

    pub fn forward<B: Backend>(
        &mut self,
        embeddings_1: Tensor<B, 2>,
        embeddings_2: Tensor<B, 2>,
        labels: &[usize],
        keep_rate: f64,
    ) -> Result<CoTeachingStep<B>> {
        self.forward_with(embeddings_1, embeddings_2, labels, keep_rate, false)
    }

    pub(crate) fn forward_with<B: Backend>(
        &mut self,
        embeddings_1: Tensor<B, 2>,
        embeddings_2: Tensor<B, 2>,
        labels: &[usize],
        keep_rate: f64,
        only_disagreeing: bool,
    ) -> Result<CoTeachingStep<B>> {
        let [n, dim] = embeddings_1.dims();
        let margin = self.selector.margin();

        let host_1 = to_host(embeddings_1.clone())?;
        let host_2 = to_host(embeddings_2.clone())?;
        let distances_1 = pairwise_distances(&host_1, n, dim);
        let distances_2 = pairwise_distances(&host_2, n, dim);

        let triplets_1 = self.selector.select(&host_1, dim, labels);
        let triplets_2 = self.selector.select(&host_2, dim, labels);
        let mut degenerate = false;

        let ranking_1: Vec<f32> = triplets_1
            .iter()
            .map(|t| host_hinge(&distances_1, n, t, margin))
            .collect();
        let ranking_2: Vec<f32> = triplets_2
            .iter()
            .map(|t| host_hinge(&distances_2, n, t, margin))
            .collect();

        // the disagreement filter narrows the candidates, never the raw totals
        let mut candidates = |triplets: &[Triplet]| {
            let all: Vec<usize> = (0..triplets.len()).collect();
            if !only_disagreeing {
                return all;
            }
            disagreeing(triplets, &distances_1, &distances_2, n).unwrap_or_else(|| {
                degenerate = true;
                all
            })
        };
        let candidates_1 = candidates(&triplets_1);
        let candidates_2 = candidates(&triplets_2);

        let selected_by_1 = select_smallest(&ranking_1, &candidates_1, keep_rate);
        let selected_by_2 = select_smallest(&ranking_2, &candidates_2, keep_rate);

        // network 1 learns from network 2's picks and vice versa
        let train_1: Vec<Triplet> = selected_by_2.iter().map(|&i| triplets_2[i]).collect();
        let train_2: Vec<Triplet> = selected_by_1.iter().map(|&i| triplets_1[i]).collect();

        if train_1.is_empty() || train_2.is_empty() {
            warn!(
                "No triplets mined ({} / {}), contributing a zero loss",
                triplets_1.len(),
                triplets_2.len()
            );
            degenerate = true;
        }

        let loss_1 = if train_1.is_empty() {
            embeddings_1.sum().mul_scalar(0.0)
        } else {
            hinge(embeddings_1, &train_1, margin).mean()
        };
        let loss_2 = if train_2.is_empty() {
            embeddings_2.sum().mul_scalar(0.0)
        } else {
            hinge(embeddings_2, &train_2, margin).mean()
        };

        let values_1: Vec<f32> = train_1
            .iter()
            .map(|t| host_hinge(&distances_1, n, t, margin))
            .collect();
        let values_2: Vec<f32> = train_2
            .iter()
            .map(|t| host_hinge(&distances_2, n, t, margin))
            .collect();

        Ok(CoTeachingStep {
            loss_1,
            loss_2,
            loss_1_value: mean_at(&values_1, &(0..values_1.len()).collect::<Vec<_>>()),
            loss_2_value: mean_at(&values_2, &(0..values_2.len()).collect::<Vec<_>>()),
            total_loss_1: mean_at(&ranking_1, &(0..ranking_1.len()).collect::<Vec<_>>()),
            total_loss_2: mean_at(&ranking_2, &(0..ranking_2.len()).collect::<Vec<_>>()),
            selected_by_1,
            selected_by_2,
            degenerate,
        })
    }
}

/// Triplet co-teaching inside the disagreement set
///
/// A triplet disagrees when one network puts the positive closer than the
/// negative and the other does not. An empty disagreement set falls back to
/// every mined triplet.
#[derive(Debug, Clone)]
pub struct CoTeachingTripletLossPlus {
    inner: CoTeachingTripletLoss,
}

impl CoTeachingTripletLossPlus {
    pub fn new(selector: TripletSelector) -> Self {
        Self {
            inner: CoTeachingTripletLoss::new(selector),
        }
    }

    pub fn forward<B: Backend>(
        &mut self,
        embeddings_1: Tensor<B, 2>,
        embeddings_2: Tensor<B, 2>,
        labels: &[usize],
        keep_rate: f64,
    ) -> Result<CoTeachingStep<B>> {
        self.inner
            .forward_with(embeddings_1, embeddings_2, labels, keep_rate, true)
    }
}
