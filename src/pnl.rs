use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::types::PositionSide;

/// Fee+slippage adjusted PnL for one closed (or marked) signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalPnl {
    pub pnl_percentage: Decimal,
    pub price_open_adjusted: Decimal,
    pub price_close_adjusted: Decimal,
}

/// Entry price adjusted against the trader: slippage moves the fill in the
/// adverse direction, the fee is added on top.
pub fn adjusted_open(side: PositionSide, price_open: Decimal, config: &EngineConfig) -> Decimal {
    let dir = side.direction();
    price_open * (Decimal::ONE + dir * config.percent_slippage) * (Decimal::ONE + config.percent_fee)
}

/// Exit price adjusted against the trader.
pub fn adjusted_close(side: PositionSide, price_close: Decimal, config: &EngineConfig) -> Decimal {
    let dir = side.direction();
    price_close * (Decimal::ONE - dir * config.percent_slippage) * (Decimal::ONE - config.percent_fee)
}

/// Compute adjusted PnL between an entry and an exit price.
pub fn compute(
    side: PositionSide,
    price_open: Decimal,
    price_close: Decimal,
    config: &EngineConfig,
) -> SignalPnl {
    let open = adjusted_open(side, price_open, config);
    let close = adjusted_close(side, price_close, config);
    let pnl_percentage = if open.is_zero() {
        Decimal::ZERO
    } else {
        side.direction() * (close / open - Decimal::ONE) * Decimal::from(100)
    };
    SignalPnl {
        pnl_percentage,
        price_open_adjusted: open,
        price_close_adjusted: close,
    }
}

/// Adjusted PnL percentage only; the marker the monitoring rules use.
pub fn percentage(
    side: PositionSide,
    price_open: Decimal,
    price_close: Decimal,
    config: &EngineConfig,
) -> Decimal {
    compute(side, price_open, price_close, config).pnl_percentage
}
