//! Test-mode evaluation of a trained pair
//!
//! Each network is scored on its own, then as a pair through the
//! elementwise maximum of their logits.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{BatchPlan, CoTeachingBatch, CoTeachingBatcher, ImageDataset};
use crate::losses::{labels_to_host, to_host};
use crate::model::CoTeachingNet;
use crate::utils::error::Result;
use crate::utils::metrics::{argmax_rows, ClassificationReport};

/// Elementwise maximum of two logit matrices of equal shape
pub fn joint_logits<B: Backend>(logits_1: Tensor<B, 2>, logits_2: Tensor<B, 2>) -> Tensor<B, 2> {
    logits_1.max_pair(logits_2)
}

/// Reports of both networks and of their joint prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub timestamp: String,
    pub model_1: ClassificationReport,
    pub model_2: ClassificationReport,
    pub joint: ClassificationReport,
}

impl TestReport {
    pub fn log(&self) {
        for report in [&self.model_1, &self.model_2, &self.joint] {
            info!("{}", report.display());
        }
        info!(
            "Accuracy | model 1: {:.2}% | model 2: {:.2}% | joint: {:.2}%",
            100.0 * self.model_1.accuracy,
            100.0 * self.model_2.accuracy,
            100.0 * self.joint.accuracy
        );
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Test report written to {:?}", path);
        Ok(())
    }
}

/// Run every batch of `plan` through both models
pub fn evaluate_pair<B: Backend>(
    model_1: &CoTeachingNet<B>,
    model_2: &CoTeachingNet<B>,
    dataset: &ImageDataset,
    plan: &mut BatchPlan,
    batcher: &CoTeachingBatcher,
    class_names: &[String],
    device: &B::Device,
) -> Result<TestReport> {
    let mut preds_1 = Vec::new();
    let mut preds_2 = Vec::new();
    let mut preds_joint = Vec::new();
    let mut ground_truth = Vec::new();

    for indices in plan.next_epoch() {
        let items = dataset.gather(&indices)?;
        if items.is_empty() {
            continue;
        }

        let batch: CoTeachingBatch<B> = batcher.batch(items, device);
        let logits_1 = model_1.forward(batch.images.clone());
        let logits_2 = model_2.forward(batch.images);
        let [_, classes] = logits_1.dims();

        let joint = joint_logits(logits_1.clone(), logits_2.clone());

        preds_1.extend(argmax_rows(&to_host(logits_1)?, classes));
        preds_2.extend(argmax_rows(&to_host(logits_2)?, classes));
        preds_joint.extend(argmax_rows(&to_host(joint)?, classes));
        ground_truth.extend(labels_to_host(batch.targets)?);
    }

    Ok(TestReport {
        timestamp: chrono::Local::now().to_rfc3339(),
        model_1: ClassificationReport::from_predictions("Model 1", &preds_1, &ground_truth, class_names),
        model_2: ClassificationReport::from_predictions("Model 2", &preds_2, &ground_truth, class_names),
        joint: ClassificationReport::from_predictions("Joint", &preds_joint, &ground_truth, class_names),
    })
}
