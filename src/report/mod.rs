pub mod markdown;
pub mod metrics;

pub use metrics::StrategyMetrics;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::schema::WalkerMetric;
use crate::types::ClosedSignal;

/// Per-strategy accumulator of closed signals. Pure over its inputs; the
/// walker drains backtest results into one of these, and the engine keeps a
/// global instance fed from the signal subject.
#[derive(Default)]
pub struct StrategyReports {
    per_strategy: Mutex<HashMap<String, Vec<ClosedSignal>>>,
}

impl StrategyReports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, closed: ClosedSignal) {
        let mut reports = self.per_strategy.lock().expect("report lock poisoned");
        reports
            .entry(closed.row.strategy_name.clone())
            .or_default()
            .push(closed);
    }

    pub fn clear(&self, strategy_name: &str) {
        self.per_strategy
            .lock()
            .expect("report lock poisoned")
            .remove(strategy_name);
    }

    pub fn clear_all(&self) {
        self.per_strategy.lock().expect("report lock poisoned").clear();
    }

    pub fn closed_count(&self, strategy_name: &str) -> usize {
        self.per_strategy
            .lock()
            .expect("report lock poisoned")
            .get(strategy_name)
            .map(|signals| signals.len())
            .unwrap_or(0)
    }

    pub fn metrics(&self, strategy_name: &str) -> StrategyMetrics {
        let reports = self.per_strategy.lock().expect("report lock poisoned");
        metrics::compute(reports.get(strategy_name).map(|s| s.as_slice()).unwrap_or(&[]))
    }

    pub fn metric_value(&self, strategy_name: &str, metric: WalkerMetric) -> Option<f64> {
        self.metrics(strategy_name).value_for(metric)
    }

    pub fn markdown(&self, strategy_name: &str) -> String {
        let reports = self.per_strategy.lock().expect("report lock poisoned");
        let signals = reports.get(strategy_name).map(|s| s.as_slice()).unwrap_or(&[]);
        markdown::render(strategy_name, &metrics::compute(signals), signals)
    }
}
