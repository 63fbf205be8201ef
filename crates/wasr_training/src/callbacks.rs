//! Epoch-boundary callbacks: early stopping and checkpoint selection.

use crate::checkpoint::{save_checkpoint, SubstrateError, TrainerState};
use crate::config::{MonitorMode, Precision};
use crate::AdBackend;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Stops training after `patience` epochs without strict improvement of the
/// monitored metric.
pub struct EarlyStopping {
    monitor: String,
    mode: MonitorMode,
    patience: usize,
    best: Option<f64>,
    stale: usize,
}

impl EarlyStopping {
    pub fn new(monitor: String, mode: MonitorMode, patience: usize) -> Self {
        Self {
            monitor,
            mode,
            patience,
            best: None,
            stale: 0,
        }
    }

    /// Feed one epoch of validation metrics; returns whether to stop. A
    /// missing monitored metric warns and never stops the run.
    pub fn observe(&mut self, metrics: &BTreeMap<String, f64>) -> bool {
        let Some(&value) = metrics.get(&self.monitor) else {
            eprintln!(
                "[early-stop] metric {} was not reported this epoch; skipping",
                self.monitor
            );
            return false;
        };
        let improved = match self.best {
            None => true,
            Some(best) => self.mode.improved(value, best),
        };
        if improved {
            self.best = Some(value);
            self.stale = 0;
            false
        } else {
            self.stale += 1;
            self.stale >= self.patience
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn stale(&self) -> usize {
        self.stale
    }

    /// Restore counters from a resumed trainer state.
    pub fn restore(&mut self, best: Option<f64>, stale: usize) {
        self.best = best;
        self.stale = stale;
    }
}

/// Persists a `last` checkpoint every epoch and a `best` checkpoint whenever
/// the monitored metric strictly improves.
pub struct Checkpointer {
    dir: PathBuf,
    monitor: String,
    mode: MonitorMode,
    precision: Precision,
    best: Option<f64>,
}

impl Checkpointer {
    pub fn new(dir: PathBuf, monitor: String, mode: MonitorMode, precision: Precision) -> Self {
        Self {
            dir,
            monitor,
            mode,
            precision,
            best: None,
        }
    }

    pub fn restore(&mut self, best: Option<f64>) {
        self.best = best;
    }

    /// Returns whether this epoch produced a new best checkpoint.
    pub fn observe<M, O>(
        &mut self,
        metrics: &BTreeMap<String, f64>,
        model: &M,
        optim: &O,
        state: &mut TrainerState,
    ) -> Result<bool, SubstrateError>
    where
        M: AutodiffModule<AdBackend>,
        O: Optimizer<M, AdBackend>,
    {
        save_checkpoint(&self.dir.join("last"), model, optim, state, self.precision)?;
        let Some(&value) = metrics.get(&self.monitor) else {
            eprintln!(
                "[checkpoint] metric {} was not reported this epoch; keeping previous best",
                self.monitor
            );
            return Ok(false);
        };
        let improved = match self.best {
            None => true,
            Some(best) => self.mode.improved(value, best),
        };
        if improved {
            self.best = Some(value);
            state.best_metric = Some(value);
            save_checkpoint(&self.dir.join("best"), model, optim, state, self.precision)?;
            println!(
                "[checkpoint] new best {} = {value:.4} at epoch {}",
                self.monitor,
                state.epoch.saturating_sub(1)
            );
        }
        Ok(improved)
    }
}

#[cfg(test)]
mod callback_tests {
    use super::EarlyStopping;
    use crate::config::MonitorMode;
    use std::collections::BTreeMap;

    fn metrics(value: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([("val/iou/obstacle".to_string(), value)])
    }

    #[test]
    fn stops_after_patience_without_improvement() {
        let mut es = EarlyStopping::new("val/iou/obstacle".to_string(), MonitorMode::Max, 2);
        assert!(!es.observe(&metrics(0.5)));
        assert!(!es.observe(&metrics(0.5)));
        assert!(es.observe(&metrics(0.5)));
    }

    #[test]
    fn improvement_resets_the_counter() {
        let mut es = EarlyStopping::new("val/iou/obstacle".to_string(), MonitorMode::Max, 2);
        assert!(!es.observe(&metrics(0.5)));
        assert!(!es.observe(&metrics(0.4)));
        assert!(!es.observe(&metrics(0.6)));
        assert!(!es.observe(&metrics(0.6)));
        assert!(es.observe(&metrics(0.6)));
    }

    #[test]
    fn min_mode_rewards_decreases() {
        let mut es = EarlyStopping::new("val/iou/obstacle".to_string(), MonitorMode::Min, 1);
        assert!(!es.observe(&metrics(1.0)));
        assert!(!es.observe(&metrics(0.8)));
        assert!(es.observe(&metrics(0.9)));
    }

    #[test]
    fn missing_metric_warns_but_never_stops() {
        let mut es = EarlyStopping::new("val/iou/obstacle".to_string(), MonitorMode::Max, 1);
        assert!(!es.observe(&BTreeMap::new()));
        assert!(!es.observe(&BTreeMap::new()));
        assert_eq!(es.stale(), 0);
    }
}
