use chrono::{DateTime, Utc};

use super::lifecycle::{
    run_pending_pass, run_scheduled_pass, CloseDecision, LevelEvent, ScheduledPass,
};
use crate::config::EngineConfig;
use crate::levels::ClientPartial;
use crate::types::{Candle, CloseReason, SignalRow, SignalState};

/// Deterministic result of fast-forwarding one signal through a candle
/// window. Pure with respect to the outside world; events and persistence
/// are interpreted by the caller in chronological order.
#[derive(Debug, Clone)]
pub(crate) struct SimulationOutcome {
    /// Final row state (activation applied, milestones recorded).
    pub row: SignalRow,
    /// Set when a scheduled signal activated during this window.
    pub activated_at: Option<DateTime<Utc>>,
    pub events: Vec<LevelEvent>,
    pub decision: CloseDecision,
}

/// One linear pass over ascending 1m candles (§ scheduled-candle
/// simulator). Pre-activation rules run first; a candle that activates the
/// signal is immediately re-examined under the pending ruleset, with the
/// entry at `price_open` and closes at the level price rather than the
/// candle extreme. The window is expected to span the full schedule-await
/// plus estimated lifetime; if it somehow runs dry the signal is expired at
/// the last candle.
pub(crate) fn simulate(
    row: SignalRow,
    candles: &[Candle],
    partial: &ClientPartial,
    config: &EngineConfig,
) -> SimulationOutcome {
    match row.state {
        SignalState::Scheduled => simulate_scheduled(row, candles, partial, config),
        SignalState::Pending => simulate_pending(row, candles, partial, config),
    }
}

fn simulate_scheduled(
    row: SignalRow,
    candles: &[Candle],
    partial: &ClientPartial,
    config: &EngineConfig,
) -> SimulationOutcome {
    match run_scheduled_pass(&row, candles, config) {
        ScheduledPass::Cancelled(decision) => SimulationOutcome {
            row,
            activated_at: None,
            events: Vec::new(),
            decision,
        },
        ScheduledPass::Waiting => {
            // Window exhausted without an entry fill; expire the schedule.
            let decision = fallback_decision(&row, candles);
            SimulationOutcome {
                row,
                activated_at: None,
                events: Vec::new(),
                decision,
            }
        }
        ScheduledPass::Activated { at, from_index } => {
            let mut row = row;
            row.activate(at);
            let pass = run_pending_pass(&mut row, &candles[from_index..], partial, config);
            let decision = pass
                .close
                .unwrap_or_else(|| fallback_decision(&row, candles));
            SimulationOutcome {
                row,
                activated_at: Some(at),
                events: pass.events,
                decision,
            }
        }
    }
}

fn simulate_pending(
    row: SignalRow,
    candles: &[Candle],
    partial: &ClientPartial,
    config: &EngineConfig,
) -> SimulationOutcome {
    let mut row = row;
    let pass = run_pending_pass(&mut row, candles, partial, config);
    let decision = pass
        .close
        .unwrap_or_else(|| fallback_decision(&row, candles));
    SimulationOutcome {
        row,
        activated_at: None,
        events: pass.events,
        decision,
    }
}

fn fallback_decision(row: &SignalRow, candles: &[Candle]) -> CloseDecision {
    match candles.last() {
        Some(last) => CloseDecision {
            reason: CloseReason::TimeExpired,
            price_close: last.close,
            at: last.timestamp,
        },
        None => CloseDecision {
            reason: CloseReason::TimeExpired,
            price_close: row.price_open,
            at: row.scheduled_at,
        },
    }
}
