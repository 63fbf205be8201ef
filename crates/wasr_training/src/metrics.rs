//! Validation metric accumulation: mean loss and per-class IoU.

use mastr_dataset::class_name;
use std::collections::BTreeMap;

/// Accumulates a confusion matrix and loss over one validation pass. Target
/// pixels at or above the class count are ignore pixels and never counted.
pub struct MetricAccumulator {
    num_classes: usize,
    /// Row-major `[target][prediction]` counts.
    confusion: Vec<u64>,
    loss_sum: f64,
    batches: u64,
}

impl MetricAccumulator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            confusion: vec![0; num_classes * num_classes],
            loss_sum: 0.0,
            batches: 0,
        }
    }

    pub fn record_loss(&mut self, loss: f64) {
        self.loss_sum += loss;
        self.batches += 1;
    }

    pub fn record_predictions(&mut self, predictions: &[i64], targets: &[i64]) {
        let c = self.num_classes as i64;
        for (&pred, &target) in predictions.iter().zip(targets) {
            if target < 0 || target >= c {
                continue;
            }
            let pred = pred.clamp(0, c - 1) as usize;
            self.confusion[target as usize * self.num_classes + pred] += 1;
        }
    }

    /// Produce the `val/` metric map. Classes absent from both predictions
    /// and targets score an IoU of zero.
    pub fn finalize(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        let loss = if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        };
        metrics.insert("val/loss".to_string(), loss);

        let c = self.num_classes;
        let mut iou_sum = 0.0;
        for class in 0..c {
            let tp = self.confusion[class * c + class];
            let fn_: u64 = (0..c)
                .filter(|&p| p != class)
                .map(|p| self.confusion[class * c + p])
                .sum();
            let fp: u64 = (0..c)
                .filter(|&t| t != class)
                .map(|t| self.confusion[t * c + class])
                .sum();
            let denom = tp + fp + fn_;
            let iou = if denom == 0 {
                0.0
            } else {
                tp as f64 / denom as f64
            };
            iou_sum += iou;
            metrics.insert(format!("val/iou/{}", class_name(class)), iou);
        }
        metrics.insert("val/iou/mean".to_string(), iou_sum / c.max(1) as f64);
        metrics
    }
}

#[cfg(test)]
mod metric_tests {
    use super::MetricAccumulator;

    #[test]
    fn perfect_predictions_score_full_iou() {
        let mut acc = MetricAccumulator::new(3);
        acc.record_predictions(&[0, 1, 2, 1], &[0, 1, 2, 1]);
        acc.record_loss(0.5);
        let metrics = acc.finalize();
        assert_eq!(metrics["val/iou/obstacle"], 1.0);
        assert_eq!(metrics["val/iou/water"], 1.0);
        assert_eq!(metrics["val/iou/sky"], 1.0);
        assert_eq!(metrics["val/iou/mean"], 1.0);
        assert_eq!(metrics["val/loss"], 0.5);
    }

    #[test]
    fn ignore_pixels_never_enter_the_confusion_matrix() {
        let mut acc = MetricAccumulator::new(3);
        // Target 4 is an ignore pixel; the wrong prediction there must not count.
        acc.record_predictions(&[0, 0], &[0, 4]);
        let metrics = acc.finalize();
        assert_eq!(metrics["val/iou/obstacle"], 1.0);
    }

    #[test]
    fn absent_class_scores_zero() {
        let mut acc = MetricAccumulator::new(3);
        acc.record_predictions(&[0, 0], &[0, 0]);
        let metrics = acc.finalize();
        assert_eq!(metrics["val/iou/sky"], 0.0);
        assert!((metrics["val/iou/mean"] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn disjoint_prediction_and_target_score_zero() {
        let mut acc = MetricAccumulator::new(3);
        acc.record_predictions(&[1, 1], &[0, 0]);
        let metrics = acc.finalize();
        assert_eq!(metrics["val/iou/obstacle"], 0.0);
        assert_eq!(metrics["val/iou/water"], 0.0);
    }
}
