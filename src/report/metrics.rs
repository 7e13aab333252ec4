use crate::schema::WalkerMetric;
use crate::types::ClosedSignal;

/// Aggregate statistics over one strategy's closed signals. Percentages are
/// whole percents; ratios are plain floats.
#[derive(Debug, Clone, Default)]
pub struct StrategyMetrics {
    pub closed_signals: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub sharpe_ratio: f64,
    pub annualized_sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub certainty_ratio: f64,
    pub expected_yearly_returns: f64,
    pub avg_duration_minutes: f64,
}

pub fn compute(signals: &[ClosedSignal]) -> StrategyMetrics {
    // Cancellations never held a position and carry no PnL.
    let executed: Vec<&ClosedSignal> = signals.iter().filter(|s| !s.was_cancelled()).collect();
    if executed.is_empty() {
        return StrategyMetrics {
            closed_signals: signals.len(),
            ..StrategyMetrics::default()
        };
    }

    let pnls: Vec<f64> = executed
        .iter()
        .map(|s| s.pnl.pnl_percentage.try_into().unwrap_or(0.0))
        .collect();
    let n = pnls.len() as f64;

    let wins = pnls.iter().filter(|p| **p > 0.0).count();
    let losses = pnls.len() - wins;
    let total_pnl: f64 = pnls.iter().sum();
    let avg_pnl = total_pnl / n;

    let variance = if pnls.len() > 1 {
        pnls.iter().map(|p| (p - avg_pnl).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    let std_dev = variance.sqrt();
    let sharpe_ratio = if std_dev > f64::EPSILON {
        avg_pnl / std_dev
    } else {
        0.0
    };

    // Equity curve over the per-signal PnL series, peak-to-trough.
    let mut equity = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown: f64 = 0.0;
    for pnl in &pnls {
        equity += pnl;
        if equity > peak {
            peak = equity;
        }
        max_drawdown = max_drawdown.max(peak - equity);
    }

    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| -p).sum();
    let certainty_ratio = if gross_loss > f64::EPSILON {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_duration_minutes = executed
        .iter()
        .map(|s| {
            let opened = s.row.pending_at.unwrap_or(s.row.scheduled_at);
            (s.close_timestamp - opened).num_minutes().max(1) as f64
        })
        .sum::<f64>()
        / n;

    let minutes_per_year = 365.25 * 24.0 * 60.0;
    let signals_per_year = minutes_per_year / avg_duration_minutes;
    let annualized_sharpe_ratio = sharpe_ratio * signals_per_year.sqrt();

    // Extrapolate over the traded span; a single signal just reports its own
    // return.
    let span_start = executed.iter().map(|s| s.row.scheduled_at).min();
    let span_end = executed.iter().map(|s| s.close_timestamp).max();
    let expected_yearly_returns = match (span_start, span_end) {
        (Some(start), Some(end)) if end > start => {
            let span_days = (end - start).num_minutes() as f64 / (24.0 * 60.0);
            if span_days >= 1.0 {
                total_pnl / span_days * 365.25
            } else {
                total_pnl
            }
        }
        _ => total_pnl,
    };

    StrategyMetrics {
        closed_signals: signals.len(),
        wins,
        losses,
        win_rate: wins as f64 / n * 100.0,
        total_pnl,
        avg_pnl,
        sharpe_ratio,
        annualized_sharpe_ratio,
        max_drawdown,
        certainty_ratio,
        expected_yearly_returns,
        avg_duration_minutes,
    }
}

impl StrategyMetrics {
    pub fn value_for(&self, metric: WalkerMetric) -> Option<f64> {
        if self.closed_signals == 0 {
            return None;
        }
        Some(match metric {
            WalkerMetric::SharpeRatio => self.sharpe_ratio,
            WalkerMetric::WinRate => self.win_rate,
            WalkerMetric::TotalPnl => self.total_pnl,
            WalkerMetric::AvgPnl => self.avg_pnl,
            WalkerMetric::MaxDrawdown => self.max_drawdown,
            WalkerMetric::CertaintyRatio => self.certainty_ratio,
            WalkerMetric::AnnualizedSharpeRatio => self.annualized_sharpe_ratio,
            WalkerMetric::ExpectedYearlyReturns => self.expected_yearly_returns,
        })
    }
}
