use super::metrics::StrategyMetrics;
use crate::types::ClosedSignal;

/// Render one strategy's report as a markdown document: a metrics table
/// followed by the most recent closed signals.
pub fn render(strategy_name: &str, metrics: &StrategyMetrics, signals: &[ClosedSignal]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Strategy report: {}\n\n", strategy_name));

    out.push_str("| Metric | Value |\n|--------|-------|\n");
    out.push_str(&format!("| Closed signals | {} |\n", metrics.closed_signals));
    out.push_str(&format!("| Wins / losses | {} / {} |\n", metrics.wins, metrics.losses));
    out.push_str(&format!("| Win rate | {:.2}% |\n", metrics.win_rate));
    out.push_str(&format!("| Total PnL | {:.4}% |\n", metrics.total_pnl));
    out.push_str(&format!("| Avg PnL | {:.4}% |\n", metrics.avg_pnl));
    out.push_str(&format!("| Sharpe ratio | {:.4} |\n", metrics.sharpe_ratio));
    out.push_str(&format!(
        "| Annualized sharpe | {:.4} |\n",
        metrics.annualized_sharpe_ratio
    ));
    out.push_str(&format!("| Max drawdown | {:.4}% |\n", metrics.max_drawdown));
    out.push_str(&format!("| Certainty ratio | {:.4} |\n", metrics.certainty_ratio));
    out.push_str(&format!(
        "| Expected yearly returns | {:.4}% |\n",
        metrics.expected_yearly_returns
    ));
    out.push_str(&format!(
        "| Avg holding time | {:.1} min |\n",
        metrics.avg_duration_minutes
    ));

    if !signals.is_empty() {
        out.push_str("\n## Closed signals\n\n");
        out.push_str("| Symbol | Side | Open | Close | Reason | PnL % | Closed at |\n");
        out.push_str("|--------|------|------|-------|--------|-------|-----------|\n");
        for signal in signals.iter().rev().take(50) {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {:.4} | {} |\n",
                signal.row.symbol,
                signal.row.position,
                signal.row.price_open,
                signal.price_close,
                signal.close_reason,
                signal.pnl.pnl_percentage,
                signal.close_timestamp.format("%Y-%m-%d %H:%M"),
            ));
        }
    }

    out
}

/// Render a walker comparison as a markdown table, best strategy first.
pub fn render_walker(complete: &crate::types::WalkerComplete, metric_name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Walker report: {} ({})\n\n",
        complete.walker_name, complete.symbol
    ));
    match (&complete.best_strategy, complete.best_metric) {
        (Some(best), Some(metric)) => {
            out.push_str(&format!("Best strategy: **{}** ({} = {:.4})\n\n", best, metric_name, metric));
        }
        _ => out.push_str("No strategy produced a metric.\n\n"),
    }

    out.push_str(&format!("| Strategy | {} |\n|----------|-------|\n", metric_name));
    for (strategy, metric) in &complete.results {
        match metric {
            Some(value) => out.push_str(&format!("| {} | {:.4} |\n", strategy, value)),
            None => out.push_str(&format!("| {} | — |\n", strategy)),
        }
    }
    out
}
