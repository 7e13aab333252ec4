use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::pnl;
use crate::schema::TrailingConfig;
use crate::types::{Candle, PositionSide, SignalRow};

/// PnL milestones (whole percents) at which a partial event fires once per
/// signal per side.
pub const PARTIAL_LEVELS: [u32; 9] = [10, 20, 30, 40, 50, 60, 70, 80, 90];

/// What one candle did to the signal's levels.
#[derive(Debug, Default, Clone)]
pub struct LevelOutcome {
    /// Newly crossed profit milestones, ascending.
    pub profit_levels: Vec<u32>,
    /// Newly crossed loss milestones, ascending.
    pub loss_levels: Vec<u32>,
    /// Stop moved to the cost-adjusted entry.
    pub breakeven: Option<Decimal>,
    /// Stop tightened by the trailing rule.
    pub trailing: Option<Decimal>,
    /// Adjusted PnL percent at the candle close, the basis for all of the
    /// above.
    pub pnl_percentage: Decimal,
}

impl LevelOutcome {
    pub fn is_empty(&self) -> bool {
        self.profit_levels.is_empty()
            && self.loss_levels.is_empty()
            && self.breakeven.is_none()
            && self.trailing.is_none()
    }
}

/// Partial-profit client: milestone bookkeeping, breakeven and trailing for
/// one strategy's signals.
pub struct ClientPartial {
    config: Arc<EngineConfig>,
    trailing: Option<TrailingConfig>,
}

impl ClientPartial {
    pub fn new(config: Arc<EngineConfig>, trailing: Option<TrailingConfig>) -> Self {
        Self { config, trailing }
    }

    /// Apply milestone, breakeven and trailing rules for one candle of a
    /// pending signal. Mutates the row; emission is the caller's job.
    pub fn evaluate(&self, row: &mut SignalRow, candle: &Candle) -> LevelOutcome {
        let mut outcome = LevelOutcome::default();
        let pnl_pct = pnl::percentage(row.position, row.price_open, candle.close, &self.config);
        outcome.pnl_percentage = pnl_pct;

        for level in PARTIAL_LEVELS {
            let level_dec = Decimal::from(level);
            if pnl_pct >= level_dec && !row.executed_profit_levels.contains(&level) {
                row.executed_profit_levels.push(level);
                row.total_executed += 1;
                outcome.profit_levels.push(level);
            }
            if pnl_pct <= -level_dec && !row.executed_loss_levels.contains(&level) {
                row.executed_loss_levels.push(level);
                row.total_executed += 1;
                outcome.loss_levels.push(level);
            }
        }

        if !row.breakeven_applied && pnl_pct >= self.config.breakeven_threshold_pct() {
            let cost_adjusted_entry = pnl::adjusted_open(row.position, row.price_open, &self.config);
            if tightens(row.position, cost_adjusted_entry, row.price_stop_loss) {
                row.price_stop_loss = cost_adjusted_entry;
                outcome.breakeven = Some(cost_adjusted_entry);
            }
            // Armed either way; the threshold crossing happens once.
            row.breakeven_applied = true;
        }

        if let Some(trailing) = &self.trailing {
            if pnl_pct >= trailing.activation_pct {
                let pct = trailing.trail_pct / Decimal::from(100);
                let candidate = match row.position {
                    PositionSide::Long => candle.high * (Decimal::ONE - pct),
                    PositionSide::Short => candle.low * (Decimal::ONE + pct),
                };
                if tightens(row.position, candidate, row.price_stop_loss) {
                    row.price_stop_loss = candidate;
                    outcome.trailing = Some(candidate);
                }
            }
        }

        outcome
    }
}

/// A stop move tightens when it shrinks the adverse distance: up for longs,
/// down for shorts. Trailing and breakeven never loosen a stop.
fn tightens(side: PositionSide, candidate: Decimal, current: Decimal) -> bool {
    match side {
        PositionSide::Long => candidate > current,
        PositionSide::Short => candidate < current,
    }
}
