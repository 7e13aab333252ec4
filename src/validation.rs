use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{PositionSide, SignalDto};

/// Validate a user-returned signal against the resolved entry price.
///
/// `live_signal_id` is the id of the currently tracked non-closed signal for
/// this (strategy, symbol), if any; a duplicate supplied id is rejected.
pub fn validate_signal(
    dto: &SignalDto,
    price_open: Decimal,
    live_signal_id: Option<&str>,
    config: &EngineConfig,
) -> EngineResult<()> {
    if price_open <= Decimal::ZERO {
        return Err(invalid(format!("price_open {} must be positive", price_open)));
    }
    if dto.price_take_profit <= Decimal::ZERO {
        return Err(invalid(format!(
            "price_take_profit {} must be positive",
            dto.price_take_profit
        )));
    }
    if dto.price_stop_loss <= Decimal::ZERO {
        return Err(invalid(format!(
            "price_stop_loss {} must be positive",
            dto.price_stop_loss
        )));
    }

    match dto.position {
        PositionSide::Long => {
            if dto.price_take_profit <= price_open {
                return Err(invalid(format!(
                    "long take profit {} must be above entry {}",
                    dto.price_take_profit, price_open
                )));
            }
            if dto.price_stop_loss >= price_open {
                return Err(invalid(format!(
                    "long stop loss {} must be below entry {}",
                    dto.price_stop_loss, price_open
                )));
            }
        }
        PositionSide::Short => {
            if dto.price_take_profit >= price_open {
                return Err(invalid(format!(
                    "short take profit {} must be below entry {}",
                    dto.price_take_profit, price_open
                )));
            }
            if dto.price_stop_loss <= price_open {
                return Err(invalid(format!(
                    "short stop loss {} must be above entry {}",
                    dto.price_stop_loss, price_open
                )));
            }
        }
    }

    let tp_distance_pct = ((dto.price_take_profit - price_open).abs() / price_open) * Decimal::from(100);
    if tp_distance_pct < config.min_tp_distance_pct {
        return Err(invalid(format!(
            "take profit distance {:.4}% does not clear fees+slippage (minimum {}%)",
            tp_distance_pct, config.min_tp_distance_pct
        )));
    }

    let sl_distance_pct = ((dto.price_stop_loss - price_open).abs() / price_open) * Decimal::from(100);
    if sl_distance_pct > config.max_sl_distance_pct {
        return Err(invalid(format!(
            "stop loss distance {:.4}% exceeds maximum {}%",
            sl_distance_pct, config.max_sl_distance_pct
        )));
    }

    if dto.minute_estimated_time <= 0 {
        return Err(invalid(format!(
            "minute_estimated_time {} must be a positive integer",
            dto.minute_estimated_time
        )));
    }
    if dto.minute_estimated_time > config.max_signal_lifetime_min {
        return Err(invalid(format!(
            "minute_estimated_time {} exceeds maximum lifetime {} minutes",
            dto.minute_estimated_time, config.max_signal_lifetime_min
        )));
    }

    if let (Some(id), Some(live)) = (dto.id.as_deref(), live_signal_id) {
        if id == live {
            return Err(invalid(format!("signal id '{}' is already live", id)));
        }
    }

    Ok(())
}

fn invalid(reason: String) -> EngineError {
    EngineError::InvalidSignal(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_dto() -> SignalDto {
        SignalDto {
            position: PositionSide::Long,
            price_open: Some(dec!(42000)),
            price_take_profit: dec!(43000),
            price_stop_loss: dec!(41000),
            minute_estimated_time: 60,
            note: None,
            id: None,
        }
    }

    fn short_dto() -> SignalDto {
        SignalDto {
            position: PositionSide::Short,
            price_open: Some(dec!(43000)),
            price_take_profit: dec!(42000),
            price_stop_loss: dec!(44000),
            minute_estimated_time: 60,
            note: None,
            id: None,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_valid_long_and_short() {
        assert!(validate_signal(&long_dto(), dec!(42000), None, &config()).is_ok());
        assert!(validate_signal(&short_dto(), dec!(43000), None, &config()).is_ok());
    }

    #[test]
    fn test_long_tp_below_entry_rejected() {
        let mut dto = long_dto();
        dto.price_take_profit = dec!(40000);
        let err = validate_signal(&dto, dec!(41000), None, &config()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSignal(_)));
    }

    #[test]
    fn test_short_sl_below_entry_rejected() {
        let mut dto = short_dto();
        dto.price_stop_loss = dec!(42000);
        assert!(validate_signal(&dto, dec!(43000), None, &config()).is_err());
    }

    #[test]
    fn test_tp_too_close_rejected() {
        let mut dto = long_dto();
        // 0.1% away, below the 0.22% minimum.
        dto.price_take_profit = dec!(42042);
        assert!(validate_signal(&dto, dec!(42000), None, &config()).is_err());
    }

    #[test]
    fn test_sl_too_far_rejected() {
        let mut dto = long_dto();
        dto.price_stop_loss = dec!(1);
        let config = EngineConfig {
            max_sl_distance_pct: dec!(50),
            ..EngineConfig::default()
        };
        assert!(validate_signal(&dto, dec!(42000), None, &config).is_err());
    }

    #[test]
    fn test_lifetime_bounds() {
        let mut dto = long_dto();
        dto.minute_estimated_time = 0;
        assert!(validate_signal(&dto, dec!(42000), None, &config()).is_err());

        dto.minute_estimated_time = 10_081;
        assert!(validate_signal(&dto, dec!(42000), None, &config()).is_err());
    }

    #[test]
    fn test_duplicate_live_id_rejected() {
        let mut dto = long_dto();
        dto.id = Some("sig-1".to_string());
        assert!(validate_signal(&dto, dec!(42000), Some("sig-1"), &config()).is_err());
        assert!(validate_signal(&dto, dec!(42000), Some("sig-2"), &config()).is_ok());
    }

    #[test]
    fn test_nonpositive_prices_rejected() {
        let mut dto = long_dto();
        dto.price_stop_loss = Decimal::ZERO;
        assert!(validate_signal(&dto, dec!(42000), None, &config()).is_err());
        assert!(validate_signal(&long_dto(), Decimal::ZERO, None, &config()).is_err());
    }
}
