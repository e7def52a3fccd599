//! Metrics for co-teaching evaluation
//!
//! - Running averages for the per-epoch loss bookkeeping
//! - Accuracy tracking for the evaluation pass
//! - Confusion matrix and a per-class classification report for test mode

use serde::{Deserialize, Serialize};

/// Precision / recall / F1 of a single class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of ground-truth samples of this class
    pub support: usize,
}

impl ClassMetrics {
    fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize, class_name: &str) -> Self {
        let true_positives = cm.get(class_idx, class_idx);
        let predicted: usize = (0..cm.num_classes).map(|row| cm.get(row, class_idx)).sum();
        let support: usize = (0..cm.num_classes).map(|col| cm.get(class_idx, col)).sum();

        let precision = ratio(true_positives, predicted);
        let recall = ratio(true_positives, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: class_name.to_string(),
            precision,
            recall,
            f1,
            support,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Per-class report plus macro and support-weighted averages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub title: String,
    pub accuracy: f64,
    pub total_samples: usize,
    pub macro_f1: f64,
    pub weighted_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

impl ClassificationReport {
    /// Build a report from predicted and ground-truth class indices
    pub fn from_predictions(
        title: &str,
        predictions: &[usize],
        ground_truth: &[usize],
        class_names: &[String],
    ) -> Self {
        let num_classes = class_names.len();
        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let per_class: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| ClassMetrics::from_confusion_matrix(&confusion_matrix, idx, name))
            .collect();

        let present: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let macro_f1 = if present.is_empty() {
            0.0
        } else {
            present.iter().map(|m| m.f1).sum::<f64>() / present.len() as f64
        };

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted_f1 = if total_support > 0 {
            per_class.iter().map(|m| m.f1 * m.support as f64).sum::<f64>() / total_support as f64
        } else {
            0.0
        };

        Self {
            title: title.to_string(),
            accuracy: confusion_matrix.accuracy(),
            total_samples: confusion_matrix.total(),
            macro_f1,
            weighted_f1,
            per_class,
            confusion_matrix,
        }
    }

    /// Render the report as a text table followed by the confusion matrix
    pub fn display(&self) -> String {
        let mut output = format!("\n{}\n", self.title);
        output.push_str(&format!(
            "{:>24} {:>10} {:>10} {:>10} {:>10}\n",
            "", "precision", "recall", "f1-score", "support"
        ));

        for m in &self.per_class {
            output.push_str(&format!(
                "{:>24} {:>10.4} {:>10.4} {:>10.4} {:>10}\n",
                truncate(&m.class_name, 24),
                m.precision,
                m.recall,
                m.f1,
                m.support
            ));
        }

        output.push_str(&format!(
            "\n{:>24} {:>43.4}\n{:>24} {:>32.4}\n{:>24} {:>32.4}\n",
            "accuracy", self.accuracy, "macro f1", self.macro_f1, "weighted f1", self.weighted_f1
        ));

        let names: Vec<&str> = self.per_class.iter().map(|m| m.class_name.as_str()).collect();
        output.push_str(&self.confusion_matrix.display(&names));
        output
    }
}

fn truncate(name: &str, max: usize) -> &str {
    match name.char_indices().nth(max) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// Counts of (actual, predicted) class pairs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,

    /// Row-major counts, row = actual, column = predicted
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Pairs with a class outside `0..num_classes` are not counted
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut matrix = vec![0; num_classes * num_classes];
        for (&predicted, &actual) in predictions.iter().zip(ground_truth) {
            if actual < num_classes && predicted < num_classes {
                matrix[actual * num_classes + predicted] += 1;
            }
        }
        Self {
            num_classes,
            matrix,
        }
    }

    /// Count at (actual, predicted), zero outside the matrix
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let diagonal = (0..self.num_classes).map(|i| self.get(i, i)).sum();
        ratio(diagonal, self.total())
    }

    /// Text table with truncated class names; the diagonal is bracketed
    pub fn display(&self, class_names: &[&str]) -> String {
        let mut output = String::from("\nConfusion matrix (rows = actual, columns = predicted)\n\n");
        let name = |idx: usize, width: usize| {
            class_names
                .get(idx)
                .map(|n| truncate(n, width).to_string())
                .unwrap_or_else(|| idx.to_string())
        };

        output.push_str(&" ".repeat(10));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>6}", name(col, 6)));
        }
        output.push('\n');

        for (row, counts) in self.matrix.chunks(self.num_classes.max(1)).enumerate() {
            output.push_str(&format!("{:>8} ", name(row, 8)));
            for (col, &count) in counts.iter().enumerate() {
                let cell = match (row == col, count) {
                    (true, _) => format!("[{:>4}]", count),
                    (false, 0) => "    . ".to_string(),
                    (false, _) => format!(" {:>4} ", count),
                };
                output.push_str(&cell);
            }
            output.push('\n');
        }
        output
    }
}

/// Running average of per-batch scalars
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Accuracy tracker for the evaluation pass
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of predictions
    pub fn add_batch(&mut self, predictions: &[usize], ground_truth: &[usize]) {
        for (pred, gt) in predictions.iter().zip(ground_truth.iter()) {
            self.total += 1;
            if pred == gt {
                self.correct += 1;
            }
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }

    pub fn count(&self) -> usize {
        self.total
    }
}

/// Index of the largest value in each row of a row-major `[rows, cols]` buffer
///
/// Ties go to the first column.
pub fn argmax_rows(values: &[f32], cols: usize) -> Vec<usize> {
    if cols == 0 {
        return Vec::new();
    }
    values
        .chunks_exact(cols)
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate().skip(1) {
                if v > row[best] {
                    best = i;
                }
            }
            best
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("class_{}", i)).collect()
    }

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.total(), 10);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confusion_matrix_skips_unknown_classes() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 5], &[0, 0, 1], 2);
        assert_eq!(cm.total(), 2);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.get(5, 5), 0);

        let table = cm.display(&["cargo", "tanker"]);
        assert!(table.contains("[   1]"));
        assert!(table.contains("tanker"));
    }

    #[test]
    fn test_classification_report_per_class() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let report =
            ClassificationReport::from_predictions("Model 1", &predictions, &ground_truth, &names(2));

        // Class 0: TP=2, predicted 3 times, support 3
        let class0 = &report.per_class[0];
        assert_eq!(class0.support, 3);
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((report.accuracy - 0.6).abs() < 1e-9);
        assert!(report.display().contains("class_1"));
    }

    #[test]
    fn test_report_ignores_absent_classes_in_macro_average() {
        let report = ClassificationReport::from_predictions("Joint", &[0, 0], &[0, 0], &names(3));
        assert!((report.macro_f1 - 1.0).abs() < 1e-9);
        assert!((report.weighted_f1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_average() {
        let mut avg = RunningAverage::new();
        avg.add(1.0);
        avg.add(2.0);
        avg.add(3.0);

        assert_eq!(avg.count(), 3);
        assert!((avg.average() - 2.0).abs() < 1e-9);
        assert_eq!(RunningAverage::new().average(), 0.0);
    }

    #[test]
    fn test_argmax_rows() {
        let values = [0.2, 0.8, 0.6, 0.4, 0.5, 0.5];
        assert_eq!(argmax_rows(&values, 2), vec![1, 0, 0]);
        assert!(argmax_rows(&values, 0).is_empty());
    }

    #[test]
    fn test_accuracy_tracker() {
        let mut tracker = AccuracyTracker::new();
        tracker.add_batch(&[0, 1, 2], &[0, 1, 0]);

        assert_eq!(tracker.count(), 3);
        assert!((tracker.accuracy() - 2.0 / 3.0).abs() < 1e-9);
    }
}
