use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::levels::ClientPartial;
use crate::types::{Candle, CloseReason, PositionSide, SignalRow};

/// Decision for one candle of a scheduled (not yet activated) signal.
/// Priorities: stop-loss cancel, then activation, then timeout; first match
/// wins per candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledDecision {
    Waiting,
    /// The range crossed the stop level before the entry ever filled.
    CancelStopLoss,
    Activate,
    CancelTimeout,
}

pub fn scheduled_rule(row: &SignalRow, candle: &Candle, config: &EngineConfig) -> ScheduledDecision {
    if config.cancel_scheduled_on_stop_loss && crosses_stop(row, candle) {
        return ScheduledDecision::CancelStopLoss;
    }
    if crosses_entry(row, candle) {
        return ScheduledDecision::Activate;
    }
    if (candle.timestamp - row.scheduled_at).num_minutes() >= config.schedule_await_min {
        return ScheduledDecision::CancelTimeout;
    }
    ScheduledDecision::Waiting
}

/// Close decision for one candle of a pending signal. When the candle's
/// range covers both levels the conservative default books the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingDecision {
    Hold,
    CloseTakeProfit,
    CloseStopLoss,
}

pub fn pending_close_rule(row: &SignalRow, candle: &Candle, config: &EngineConfig) -> PendingDecision {
    let tp_hit = match row.position {
        PositionSide::Long => candle.high >= row.price_take_profit,
        PositionSide::Short => candle.low <= row.price_take_profit,
    };
    let sl_hit = crosses_stop(row, candle);

    match (tp_hit, sl_hit) {
        (true, true) => {
            if config.conservative_close {
                PendingDecision::CloseStopLoss
            } else {
                PendingDecision::CloseTakeProfit
            }
        }
        (true, false) => PendingDecision::CloseTakeProfit,
        (false, true) => PendingDecision::CloseStopLoss,
        (false, false) => PendingDecision::Hold,
    }
}

fn crosses_stop(row: &SignalRow, candle: &Candle) -> bool {
    match row.position {
        PositionSide::Long => candle.low <= row.price_stop_loss,
        PositionSide::Short => candle.high >= row.price_stop_loss,
    }
}

fn crosses_entry(row: &SignalRow, candle: &Candle) -> bool {
    match row.position {
        PositionSide::Long => candle.low <= row.price_open,
        PositionSide::Short => candle.high >= row.price_open,
    }
}

/// Side-effect produced while monitoring a pending signal, in chronological
/// order. The caller turns these into bus events.
#[derive(Debug, Clone)]
pub enum LevelEvent {
    PartialProfit {
        level: u32,
        pnl_percentage: Decimal,
        at: DateTime<Utc>,
    },
    PartialLoss {
        level: u32,
        pnl_percentage: Decimal,
        at: DateTime<Utc>,
    },
    Breakeven {
        price_stop_loss: Decimal,
        at: DateTime<Utc>,
    },
}

/// Terminal decision from a monitoring pass.
#[derive(Debug, Clone)]
pub struct CloseDecision {
    pub reason: CloseReason,
    pub price_close: Decimal,
    pub at: DateTime<Utc>,
}

/// Result of walking a candle window over a pending signal.
#[derive(Debug, Default, Clone)]
pub struct PendingPass {
    pub events: Vec<LevelEvent>,
    pub close: Option<CloseDecision>,
}

/// One linear pass over 1m candles for a pending signal. Applies, per
/// candle: the TP/SL close rule, partial milestones, breakeven, trailing,
/// then time expiry. Closes execute at the level price, not the candle
/// extreme, keeping fills reproducible under the limit-order assumption.
pub fn run_pending_pass(
    row: &mut SignalRow,
    candles: &[Candle],
    partial: &ClientPartial,
    config: &EngineConfig,
) -> PendingPass {
    let mut pass = PendingPass::default();
    let pending_at = match row.pending_at {
        Some(at) => at,
        None => return pass,
    };

    for candle in candles {
        if candle.timestamp < pending_at {
            continue;
        }

        match pending_close_rule(row, candle, config) {
            PendingDecision::CloseTakeProfit => {
                pass.close = Some(CloseDecision {
                    reason: CloseReason::TakeProfit,
                    price_close: row.price_take_profit,
                    at: candle.timestamp,
                });
                return pass;
            }
            PendingDecision::CloseStopLoss => {
                pass.close = Some(CloseDecision {
                    reason: CloseReason::StopLoss,
                    price_close: row.price_stop_loss,
                    at: candle.timestamp,
                });
                return pass;
            }
            PendingDecision::Hold => {}
        }

        let outcome = partial.evaluate(row, candle);
        for level in &outcome.profit_levels {
            pass.events.push(LevelEvent::PartialProfit {
                level: *level,
                pnl_percentage: outcome.pnl_percentage,
                at: candle.timestamp,
            });
        }
        for level in &outcome.loss_levels {
            pass.events.push(LevelEvent::PartialLoss {
                level: *level,
                pnl_percentage: outcome.pnl_percentage,
                at: candle.timestamp,
            });
        }
        if let Some(price_stop_loss) = outcome.breakeven {
            pass.events.push(LevelEvent::Breakeven {
                price_stop_loss,
                at: candle.timestamp,
            });
        }

        if (candle.timestamp - pending_at).num_minutes() >= row.minute_estimated_time {
            pass.close = Some(CloseDecision {
                reason: CloseReason::TimeExpired,
                price_close: candle.close,
                at: candle.timestamp,
            });
            return pass;
        }
    }

    pass
}

/// Result of walking a candle window over a scheduled signal.
#[derive(Debug, Clone)]
pub enum ScheduledPass {
    /// No candle triggered anything; still waiting for the entry.
    Waiting,
    Cancelled(CloseDecision),
    /// Activated at `at`; `from_index` is the candle on which activation
    /// happened, so pending rules can fire on that same candle.
    Activated { at: DateTime<Utc>, from_index: usize },
}

pub fn run_scheduled_pass(row: &SignalRow, candles: &[Candle], config: &EngineConfig) -> ScheduledPass {
    for (i, candle) in candles.iter().enumerate() {
        if candle.timestamp < row.scheduled_at {
            continue;
        }
        match scheduled_rule(row, candle, config) {
            ScheduledDecision::Waiting => {}
            ScheduledDecision::CancelStopLoss => {
                return ScheduledPass::Cancelled(CloseDecision {
                    reason: CloseReason::StopLoss,
                    price_close: row.price_stop_loss,
                    at: candle.timestamp,
                });
            }
            ScheduledDecision::CancelTimeout => {
                return ScheduledPass::Cancelled(CloseDecision {
                    reason: CloseReason::TimeExpired,
                    price_close: candle.close,
                    at: candle.timestamp,
                });
            }
            ScheduledDecision::Activate => {
                return ScheduledPass::Activated {
                    at: candle.timestamp,
                    from_index: i,
                };
            }
        }
    }
    ScheduledPass::Waiting
}
