//! Per-run training history, written as JSON after every evaluation

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::trainer::{EpochStats, EvalStats};
use crate::config::RunConfig;
use crate::utils::error::Result;

/// One evaluated epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub epoch: usize,
    pub learning_rate: f64,
    pub keep_rate: f64,
    pub train_loss_1: f64,
    pub train_loss_2: f64,
    pub total_train_loss_1: f64,
    pub total_train_loss_2: f64,
    pub test_loss_1: f64,
    pub test_loss_2: f64,
    pub test_accuracy_1: Option<f64>,
    pub test_accuracy_2: Option<f64>,
}

impl HistoryRow {
    pub fn new(train: &EpochStats, eval: &EvalStats) -> Self {
        Self {
            epoch: train.epoch,
            learning_rate: train.learning_rate,
            keep_rate: train.keep_rate,
            train_loss_1: train.loss_1,
            train_loss_2: train.loss_2,
            total_train_loss_1: train.total_loss_1,
            total_train_loss_2: train.total_loss_2,
            test_loss_1: eval.loss_1,
            test_loss_2: eval.loss_2,
            test_accuracy_1: eval.accuracy_1,
            test_accuracy_2: eval.accuracy_2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub started_at: String,
    pub config: RunConfig,
    pub rows: Vec<HistoryRow>,
}

impl TrainingHistory {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            started_at: chrono::Local::now().to_rfc3339(),
            config: config.clone(),
            rows: Vec::new(),
        }
    }

    /// `<output_dir>/<dataset>_<loss_fn>_<keep_rate:.2>.json`
    pub fn path_for(config: &RunConfig) -> PathBuf {
        config.output_dir.join(format!(
            "{}_{}_{:.2}.json",
            config.dataset, config.loss_fn, config.keep_rate
        ))
    }

    pub fn push(&mut self, row: HistoryRow) {
        self.rows.push(row);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetKind, LossKind};

    #[test]
    fn test_history_path() {
        let mut config = RunConfig::default();
        config.output_dir = PathBuf::from("out");
        config.dataset = DatasetKind::Sar4L;
        config.loss_fn = LossKind::CoTeachingTripletPlus;
        config.keep_rate = 0.5;

        assert_eq!(
            TrainingHistory::path_for(&config),
            PathBuf::from("out").join("SAR_4L_co_teaching_triplet+_0.50.json")
        );
    }

    #[test]
    fn test_history_roundtrip() {
        let config = RunConfig::default();
        let mut history = TrainingHistory::new(&config);
        let train = EpochStats {
            epoch: 5,
            learning_rate: 1e-5,
            keep_rate: 0.8,
            loss_1: 0.4,
            loss_2: 0.5,
            total_loss_1: 0.6,
            total_loss_2: 0.7,
            batches: 10,
            degenerate_batches: 0,
        };
        let eval = EvalStats {
            loss_1: 0.9,
            loss_2: 1.0,
            accuracy_1: Some(0.75),
            accuracy_2: None,
            samples: 40,
        };
        history.push(HistoryRow::new(&train, &eval));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        history.save(&path).unwrap();

        let loaded = TrainingHistory::load(&path).unwrap();
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(loaded.rows[0].epoch, 5);
        assert_eq!(loaded.rows[0].test_accuracy_1, Some(0.75));
        assert_eq!(loaded.config.loss_fn, config.loss_fn);
    }
}
