use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Engine-wide tunables. Percentages suffixed `_pct` are whole percents
/// (0.22 means 0.22%); `percent_fee` / `percent_slippage` are per-side
/// fractions (0.001 means 0.1%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-side fee fraction applied in PnL adjustment.
    pub percent_fee: Decimal,
    /// Per-side slippage fraction applied in PnL adjustment.
    pub percent_slippage: Decimal,
    /// Reject signals whose TP distance from entry is below this.
    pub min_tp_distance_pct: Decimal,
    /// Reject signals whose SL distance from entry exceeds this.
    pub max_sl_distance_pct: Decimal,
    /// Reject signals whose estimated lifetime exceeds this many minutes.
    pub max_signal_lifetime_min: i64,
    /// Cancel a scheduled signal if not activated within this many minutes.
    pub schedule_await_min: i64,
    /// Trailing 1m candles used for the default VWAP average price.
    pub avg_price_candles_count: usize,
    /// Candle fetch retry attempts before giving up.
    pub candles_retry_count: u32,
    /// Delay between candle fetch retries.
    pub candles_retry_delay_ms: u64,
    /// Window for the anomaly-detection median.
    pub median_candles_lookback: usize,
    /// Fractional deviation from the median that flags a candle anomalous.
    pub price_anomaly_threshold: f64,
    /// Live loop sleep between ticks. Strictly above 60s so every tick
    /// crosses the next 1m candle boundary.
    pub tick_poll_interval_ms: u64,
    /// Entry prices within this percent of the current average price open
    /// immediately instead of scheduling a limit entry.
    pub immediate_open_tolerance_pct: Decimal,
    /// When TP and SL both fall inside one candle, treat it as a stop loss.
    pub conservative_close: bool,
    /// Allow a scheduled signal to be cancelled by a stop-loss cross before
    /// activation.
    pub cancel_scheduled_on_stop_loss: bool,
    /// Breakeven arms once adjusted PnL exceeds
    /// `(fee + slippage) * 2 * breakeven_safety_mult` (as a percent).
    pub breakeven_safety_mult: Decimal,
    /// Root directory for the file persistence adapter.
    pub storage_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            percent_fee: dec!(0.001),
            percent_slippage: dec!(0.001),
            min_tp_distance_pct: dec!(0.22),
            max_sl_distance_pct: dec!(100),
            max_signal_lifetime_min: 10_080,
            schedule_await_min: 120,
            avg_price_candles_count: 5,
            candles_retry_count: 3,
            candles_retry_delay_ms: 1_000,
            median_candles_lookback: 20,
            price_anomaly_threshold: 0.5,
            tick_poll_interval_ms: 61_000,
            immediate_open_tolerance_pct: dec!(0.1),
            conservative_close: true,
            cancel_scheduled_on_stop_loss: true,
            breakeven_safety_mult: dec!(1.5),
            storage_dir: "./storage".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.percent_fee < Decimal::ZERO || self.percent_fee >= Decimal::ONE {
            errors.push("percent_fee must be a fraction in [0, 1)".to_string());
        }
        if self.percent_slippage < Decimal::ZERO || self.percent_slippage >= Decimal::ONE {
            errors.push("percent_slippage must be a fraction in [0, 1)".to_string());
        }
        if self.min_tp_distance_pct <= Decimal::ZERO {
            errors.push("min_tp_distance_pct must be > 0".to_string());
        }
        if self.max_sl_distance_pct <= Decimal::ZERO {
            errors.push("max_sl_distance_pct must be > 0".to_string());
        }
        if self.max_signal_lifetime_min <= 0 {
            errors.push("max_signal_lifetime_min must be > 0".to_string());
        }
        if self.schedule_await_min <= 0 {
            errors.push("schedule_await_min must be > 0".to_string());
        }
        if self.avg_price_candles_count == 0 {
            errors.push("avg_price_candles_count must be > 0".to_string());
        }
        if self.candles_retry_count == 0 {
            errors.push("candles_retry_count must be > 0".to_string());
        }
        if self.median_candles_lookback < 3 {
            errors.push("median_candles_lookback must be >= 3".to_string());
        }
        if self.price_anomaly_threshold <= 0.0 {
            errors.push("price_anomaly_threshold must be > 0".to_string());
        }
        if self.tick_poll_interval_ms <= 60_000 {
            errors.push("tick_poll_interval_ms must exceed 60000 to cross the next 1m boundary".to_string());
        }
        if self.breakeven_safety_mult < Decimal::ONE {
            errors.push("breakeven_safety_mult must be >= 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Load from a TOML file, falling back to defaults for absent keys.
    pub fn from_toml_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&raw)?;
        config
            .validate()
            .map_err(|errors| anyhow::anyhow!("invalid config: {}", errors.join(", ")))?;
        Ok(config)
    }

    /// Percent threshold at which breakeven arms.
    pub fn breakeven_threshold_pct(&self) -> Decimal {
        (self.percent_fee + self.percent_slippage) * dec!(2) * self.breakeven_safety_mult * dec!(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_tick_interval_must_cross_minute_boundary() {
        let config = EngineConfig {
            tick_poll_interval_ms: 60_000,
            ..EngineConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("tick_poll_interval_ms")));
    }

    #[test]
    fn test_breakeven_threshold_formula() {
        let config = EngineConfig::default();
        // (0.001 + 0.001) * 2 * 1.5 = 0.006 -> 0.6%
        assert_eq!(config.breakeven_threshold_pct(), dec!(0.6000));
    }
}
