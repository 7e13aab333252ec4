use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::pnl::SignalPnl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short; the sign used throughout PnL math.
    pub fn direction(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw signal returned by a user strategy. `price_open` of `None` means
/// "enter at the current average price".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDto {
    pub position: PositionSide,
    pub price_open: Option<Decimal>,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: i64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Scheduled,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeExpired,
    Cancelled,
    UserClose,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TimeExpired => "time_expired",
            CloseReason::Cancelled => "cancelled",
            CloseReason::UserClose => "user_close",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validated signal tracked by the state machine and persisted while live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRow {
    pub id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
    pub position: PositionSide,
    pub price_open: Decimal,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    /// TP/SL as validated, before breakeven or trailing adjustments.
    pub original_price_take_profit: Decimal,
    pub original_price_stop_loss: Decimal,
    pub minute_estimated_time: i64,
    #[serde(default)]
    pub note: Option<String>,
    pub state: SignalState,
    pub scheduled_at: DateTime<Utc>,
    /// Set on activation; equals `scheduled_at` for immediately-open signals.
    pub pending_at: Option<DateTime<Utc>>,
    /// Count of partial-level hits, monotonically increasing.
    #[serde(default)]
    pub total_executed: u32,
    /// Profit milestones already emitted (percent levels, ascending).
    #[serde(default)]
    pub executed_profit_levels: Vec<u32>,
    /// Loss milestones already emitted (percent levels, ascending).
    #[serde(default)]
    pub executed_loss_levels: Vec<u32>,
    #[serde(default)]
    pub breakeven_applied: bool,
}

impl SignalRow {
    pub fn from_dto(
        dto: SignalDto,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
        price_open: Decimal,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: dto.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            symbol: symbol.to_string(),
            strategy_name: strategy_name.to_string(),
            exchange_name: exchange_name.to_string(),
            frame_name: frame_name.to_string(),
            position: dto.position,
            price_open,
            price_take_profit: dto.price_take_profit,
            price_stop_loss: dto.price_stop_loss,
            original_price_take_profit: dto.price_take_profit,
            original_price_stop_loss: dto.price_stop_loss,
            minute_estimated_time: dto.minute_estimated_time,
            note: dto.note,
            state: SignalState::Scheduled,
            scheduled_at,
            pending_at: None,
            total_executed: 0,
            executed_profit_levels: Vec::new(),
            executed_loss_levels: Vec::new(),
            breakeven_applied: false,
        }
    }

    pub fn activate(&mut self, at: DateTime<Utc>) {
        self.state = SignalState::Pending;
        self.pending_at = Some(at);
    }

    /// Minutes the signal has been pending as of `when`.
    pub fn minutes_pending(&self, when: DateTime<Utc>) -> i64 {
        self.pending_at
            .map(|p| (when - p).num_minutes())
            .unwrap_or(0)
    }

    pub fn minutes_scheduled(&self, when: DateTime<Utc>) -> i64 {
        (when - self.scheduled_at).num_minutes()
    }

    /// Persistence entity id, one record per (strategy, symbol).
    pub fn entity_id(&self) -> String {
        signal_entity_id(&self.strategy_name, &self.symbol)
    }
}

pub fn signal_entity_id(strategy_name: &str, symbol: &str) -> String {
    format!("{}:{}", strategy_name, symbol)
}

/// Terminal result of a signal lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedSignal {
    pub row: SignalRow,
    pub close_timestamp: DateTime<Utc>,
    pub close_reason: CloseReason,
    pub price_close: Decimal,
    pub pnl: SignalPnl,
}

impl ClosedSignal {
    /// A cancellation closes a signal that never held a position.
    pub fn was_cancelled(&self) -> bool {
        self.row.pending_at.is_none()
    }
}
