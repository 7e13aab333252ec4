use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::{ClosedSignal, SignalRow};

/// Result of a single `tick` of the state machine.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// No signal and nothing produced this tick.
    Idle,
    /// A new signal was validated but its entry price has not been reached.
    Scheduled(SignalRow),
    /// A signal transitioned into pending (position opened).
    Opened(SignalRow),
    /// The pending signal is still being monitored.
    Active(SignalRow),
    /// A scheduled signal was cancelled before activation.
    Cancelled(ClosedSignal),
    /// The signal reached a terminal state.
    Closed(ClosedSignal),
}

impl TickOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            TickOutcome::Idle => "idle",
            TickOutcome::Scheduled(_) => "scheduled",
            TickOutcome::Opened(_) => "opened",
            TickOutcome::Active(_) => "active",
            TickOutcome::Cancelled(_) => "cancelled",
            TickOutcome::Closed(_) => "closed",
        }
    }
}

/// Lifecycle event published on the `signal` subjects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalEvent {
    Scheduled(SignalRow),
    Opened(SignalRow),
    Cancelled(ClosedSignal),
    Closed(ClosedSignal),
}

impl SignalEvent {
    pub fn symbol(&self) -> &str {
        match self {
            SignalEvent::Scheduled(row) | SignalEvent::Opened(row) => &row.symbol,
            SignalEvent::Cancelled(closed) | SignalEvent::Closed(closed) => &closed.row.symbol,
        }
    }

    pub fn strategy_name(&self) -> &str {
        match self {
            SignalEvent::Scheduled(row) | SignalEvent::Opened(row) => &row.strategy_name,
            SignalEvent::Cancelled(closed) | SignalEvent::Closed(closed) => {
                &closed.row.strategy_name
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestProgress {
    pub symbol: String,
    pub strategy_name: String,
    pub processed_frames: usize,
    pub total_frames: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerProgress {
    pub walker_name: String,
    pub symbol: String,
    pub strategies_tested: usize,
    pub total_strategies: usize,
    pub current_strategy: String,
    pub metric_value: Option<f64>,
    pub best_strategy: Option<String>,
    pub best_metric: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerComplete {
    pub walker_name: String,
    pub symbol: String,
    pub best_strategy: Option<String>,
    pub best_metric: Option<f64>,
    /// Strategy name -> metric; errored strategies carry `None`.
    pub results: Vec<(String, Option<f64>)>,
}

/// Emitted on `done_backtest` / `done_live` / `done_walker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneEvent {
    pub symbol: String,
    pub strategy_name: Option<String>,
    pub exchange_name: Option<String>,
    pub frame_name: Option<String>,
    pub walker_name: Option<String>,
    pub backtest: bool,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceEvent {
    pub label: String,
    pub symbol: String,
    pub duration_ms: u64,
    pub when: DateTime<Utc>,
}

/// Partial-profit / partial-loss milestone hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialEvent {
    pub row: SignalRow,
    /// Milestone level in whole percents (10, 20, ... 90).
    pub level: u32,
    pub pnl_percentage: Decimal,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakevenEvent {
    pub row: SignalRow,
    /// Stop loss after the move to the cost-adjusted entry.
    pub price_stop_loss: Decimal,
    pub when: DateTime<Utc>,
}

/// Heartbeat for a signal that stayed scheduled (`schedule_ping`) or
/// active (`active_ping`) through a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingEvent {
    pub row: SignalRow,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub reason: String,
    pub when: DateTime<Utc>,
}

/// Recoverable error surfaced to listeners; the loop continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub symbol: Option<String>,
    pub strategy_name: Option<String>,
    pub message: String,
    pub when: DateTime<Utc>,
}

/// Fatal error; the owning task terminates after publishing this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvent {
    pub symbol: Option<String>,
    pub strategy_name: Option<String>,
    pub message: String,
    pub when: DateTime<Utc>,
}

/// Per-strategy walker outcome published on the `walker` subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerStrategyResult {
    pub walker_name: String,
    pub symbol: String,
    pub strategy_name: String,
    pub metric_value: Option<f64>,
    pub closed_signals: usize,
}
