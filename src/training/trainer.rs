//! Co-teaching training loop
//!
//! Both networks see the same batch. The selections are computed before
//! either network steps, then each network steps on the loss its peer chose.

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::optimizer::NetworkSlot;
use super::schedule::{DropRateSchedule, LearningRateSchedule};
use crate::config::RunConfig;
use crate::dataset::{BatchPlan, CoTeachingBatch, CoTeachingBatcher, ImageDataset};
use crate::losses::{labels_to_host, to_host, CoTeachingCriterion};
use crate::model::CoTeachingNet;
use crate::utils::error::{CoTeachingError, Result};
use crate::utils::logging::ProgressLogger;
use crate::utils::metrics::{argmax_rows, AccuracyTracker, RunningAverage};

/// Averages over the batches of one training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub learning_rate: f64,
    pub keep_rate: f64,
    /// Loss on the samples selected by the peer
    pub loss_1: f64,
    pub loss_2: f64,
    /// Loss on the whole batch
    pub total_loss_1: f64,
    pub total_loss_2: f64,
    pub batches: usize,
    /// Batches whose selection fell back or came up empty
    pub degenerate_batches: usize,
}

/// Averages over one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalStats {
    pub loss_1: f64,
    pub loss_2: f64,
    /// `None` when the networks output embeddings
    pub accuracy_1: Option<f64>,
    pub accuracy_2: Option<f64>,
    pub samples: usize,
}

pub struct CoTeachingTrainer<B: AutodiffBackend> {
    net_1: NetworkSlot<B>,
    net_2: NetworkSlot<B>,
    criterion: CoTeachingCriterion,
    drop_schedule: DropRateSchedule,
    lr_schedule: LearningRateSchedule,
    device: B::Device,
}

impl<B: AutodiffBackend> CoTeachingTrainer<B> {
    pub fn new(
        model_1: CoTeachingNet<B>,
        model_2: CoTeachingNet<B>,
        criterion: CoTeachingCriterion,
        drop_schedule: DropRateSchedule,
        lr_schedule: LearningRateSchedule,
        device: B::Device,
    ) -> Self {
        let (lr, _) = lr_schedule.at(1);
        Self {
            net_1: NetworkSlot::new("network 1", model_1, lr),
            net_2: NetworkSlot::new("network 2", model_2, lr),
            criterion,
            drop_schedule,
            lr_schedule,
            device,
        }
    }

    /// Trainer with the schedules of `config`
    pub fn from_config(
        config: &RunConfig,
        model_1: CoTeachingNet<B>,
        model_2: CoTeachingNet<B>,
        criterion: CoTeachingCriterion,
        device: B::Device,
    ) -> Result<Self> {
        Ok(Self::new(
            model_1,
            model_2,
            criterion,
            DropRateSchedule::from_config(config)?,
            LearningRateSchedule::from_config(config),
            device,
        ))
    }

    pub fn criterion(&self) -> &CoTeachingCriterion {
        &self.criterion
    }

    pub fn model_1(&self) -> &CoTeachingNet<B> {
        &self.net_1.model
    }

    pub fn model_2(&self) -> &CoTeachingNet<B> {
        &self.net_2.model
    }

    pub fn into_models(self) -> (CoTeachingNet<B>, CoTeachingNet<B>) {
        (self.net_1.into_model(), self.net_2.into_model())
    }

    /// `(learning_rate, keep_rate)` of `epoch`
    pub fn rates_at(&self, epoch: usize) -> (f64, f64) {
        (self.lr_schedule.at(epoch).0, self.drop_schedule.at(epoch))
    }

    /// Apply the schedules of `epoch` to both optimizers
    ///
    /// Returns `(learning_rate, keep_rate)`.
    pub fn adjust_rates(&mut self, epoch: usize) -> (f64, f64) {
        let (lr, beta_1) = self.lr_schedule.at(epoch);
        self.net_1.adjust(lr, beta_1);
        self.net_2.adjust(lr, beta_1);
        (lr, self.drop_schedule.at(epoch))
    }

    /// One pass over the batches `plan` draws from `dataset`
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        dataset: &ImageDataset,
        plan: &mut BatchPlan,
        batcher: &CoTeachingBatcher,
    ) -> Result<EpochStats> {
        let (learning_rate, keep_rate) = self.adjust_rates(epoch);
        let batches = plan.next_epoch();

        let mut loss_1 = RunningAverage::new();
        let mut loss_2 = RunningAverage::new();
        let mut total_1 = RunningAverage::new();
        let mut total_2 = RunningAverage::new();
        let mut degenerate_batches = 0;
        let mut progress = ProgressLogger::new(&format!("Epoch {}", epoch), batches.len());

        for (batch_idx, indices) in batches.iter().enumerate() {
            let items = dataset.gather(indices)?;
            if items.is_empty() {
                continue;
            }

            let batch: CoTeachingBatch<B> = batcher.batch(items, &self.device);
            let output_1 = self.net_1.model.forward(batch.images.clone());
            let output_2 = self.net_2.model.forward(batch.images);

            let step = self
                .criterion
                .step(output_1, output_2, batch.targets, keep_rate)?;

            for value in [
                step.loss_1_value,
                step.loss_2_value,
                step.total_loss_1,
                step.total_loss_2,
            ] {
                if !value.is_finite() {
                    return Err(CoTeachingError::Training(format!(
                        "non-finite loss {} at epoch {} batch {}",
                        value,
                        epoch,
                        batch_idx + 1
                    )));
                }
            }

            if step.degenerate {
                degenerate_batches += 1;
            }
            loss_1.add(step.loss_1_value);
            loss_2.add(step.loss_2_value);
            total_1.add(step.total_loss_1);
            total_2.add(step.total_loss_2);

            self.net_1.step(step.loss_1);
            self.net_2.step(step.loss_2);
            progress.increment();
        }
        progress.finish();

        if degenerate_batches > 0 {
            debug!(
                "Epoch {}: {} of {} batches used a fallback selection",
                epoch,
                degenerate_batches,
                loss_1.count()
            );
        }

        Ok(EpochStats {
            epoch,
            learning_rate,
            keep_rate,
            loss_1: loss_1.average(),
            loss_2: loss_2.average(),
            total_loss_1: total_1.average(),
            total_loss_2: total_2.average(),
            batches: loss_1.count(),
            degenerate_batches,
        })
    }

    /// Forward-only pass on the inner backend, without sample selection
    ///
    /// Losses come from a copy of the criterion, so evaluating never moves
    /// the triplet miner's RNG.
    pub fn evaluate(
        &self,
        dataset: &ImageDataset,
        plan: &mut BatchPlan,
        batcher: &CoTeachingBatcher,
    ) -> Result<EvalStats> {
        let model_1 = self.net_1.model.valid();
        let model_2 = self.net_2.model.valid();
        let mut criterion = self.criterion.clone();
        let with_accuracy = !criterion.is_metric_learning();

        let mut loss_1 = RunningAverage::new();
        let mut loss_2 = RunningAverage::new();
        let mut accuracy_1 = AccuracyTracker::new();
        let mut accuracy_2 = AccuracyTracker::new();
        let mut samples = 0;

        for indices in plan.next_epoch() {
            let items = dataset.gather(&indices)?;
            if items.is_empty() {
                continue;
            }
            samples += items.len();

            let batch: CoTeachingBatch<B::InnerBackend> = batcher.batch(items, &self.device);
            let output_1 = model_1.forward(batch.images.clone());
            let output_2 = model_2.forward(batch.images);

            if with_accuracy {
                let [_, classes] = output_1.dims();
                let targets = labels_to_host(batch.targets.clone())?;
                accuracy_1.add_batch(&argmax_rows(&to_host(output_1.clone())?, classes), &targets);
                accuracy_2.add_batch(&argmax_rows(&to_host(output_2.clone())?, classes), &targets);
            }

            let step = criterion.step(output_1, output_2, batch.targets, 1.0)?;
            loss_1.add(step.total_loss_1);
            loss_2.add(step.total_loss_2);
        }

        let stats = EvalStats {
            loss_1: loss_1.average(),
            loss_2: loss_2.average(),
            accuracy_1: with_accuracy.then(|| accuracy_1.accuracy()),
            accuracy_2: with_accuracy.then(|| accuracy_2.accuracy()),
            samples,
        };

        match (stats.accuracy_1, stats.accuracy_2) {
            (Some(acc_1), Some(acc_2)) => info!(
                "Test loss1: {:.4} | Test loss2: {:.4} | Test acc1: {:.2}% | Test acc2: {:.2}%",
                stats.loss_1,
                stats.loss_2,
                100.0 * acc_1,
                100.0 * acc_2
            ),
            _ => info!(
                "Test loss1: {:.4} | Test loss2: {:.4}",
                stats.loss_1, stats.loss_2
            ),
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LossKind, NegativeSelection};
    use crate::dataset::ImageItem;
    use crate::model::CoTeachingNetConfig;
    use burn::backend::Autodiff;
    use burn::tensor::{Int, Tensor};
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    fn dataset() -> ImageDataset {
        let items = (0..8)
            .map(|i| ImageItem {
                image: vec![i as f32 / 8.0; 3 * 4 * 4],
                height: 4,
                width: 4,
                label: i / 4,
            })
            .collect();
        ImageDataset::new(items).unwrap()
    }

    #[test]
    fn test_evaluation_leaves_triplet_mining_untouched() {
        let device = Default::default();
        let mut config = RunConfig::default();
        config.loss_fn = LossKind::CoTeachingTriplet;
        config.negative_selection = NegativeSelection::Random;
        config.triplet_margin = 10.0;

        let net = || {
            CoTeachingNetConfig::new(4)
                .with_return_embedding(true)
                .with_depth(1)
                .with_base_filters(2)
                .with_hidden_units(4)
                .init::<TestBackend>(&device)
        };
        let criterion = CoTeachingCriterion::from_config(&config, None);
        let trainer =
            CoTeachingTrainer::from_config(&config, net(), net(), criterion, device.clone())
                .unwrap();

        let before = trainer.criterion().clone();
        let stats = trainer
            .evaluate(
                &dataset(),
                &mut BatchPlan::chunked(8, 4, false, 0),
                &CoTeachingBatcher::new([0.5; 3], [0.25; 3]),
            )
            .unwrap();
        assert_eq!(stats.samples, 8);
        assert!(stats.accuracy_1.is_none());

        // every negative violates a margin of 10, so each pick consumes the RNG
        let embeddings = || {
            let values: Vec<f32> = (0..8).map(|i| i as f32 * 0.1).collect();
            Tensor::<NdArray, 1>::from_floats(values.as_slice(), &device).reshape([8, 1])
        };
        let targets = || Tensor::<NdArray, 1, Int>::from_ints([0, 0, 0, 0, 1, 1, 1, 1], &device);

        let mut expected = before;
        let mut actual = trainer.criterion().clone();
        let a = expected.step(embeddings(), embeddings(), targets(), 1.0).unwrap();
        let b = actual.step(embeddings(), embeddings(), targets(), 1.0).unwrap();
        assert_eq!(a.selected_by_1, b.selected_by_1);
        assert_eq!(a.total_loss_1, b.total_loss_1);
    }
}
