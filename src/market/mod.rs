use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context;
use crate::error::{EngineError, EngineResult};
use crate::schema::{ExchangeSchema, MarketAccess};
use crate::types::{median_close, Candle, Interval};

/// Exchange client: candle access with temporal-bias guarding, retries and
/// anomaly detection, plus the default VWAP average price.
pub struct ClientExchange {
    schema: Arc<ExchangeSchema>,
    config: Arc<EngineConfig>,
}

impl ClientExchange {
    pub fn new(schema: Arc<ExchangeSchema>, config: Arc<EngineConfig>) -> Self {
        Self { schema, config }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Up to `limit` candles with timestamps at or before the ambient
    /// `when`, ascending. In backtest mode the cut is what prevents
    /// look-ahead; in live mode it only trims the in-flight minute.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let execution = context::execution()?;
        let since = execution.when - Duration::minutes(interval.minutes() * limit as i64);

        let mut candles = self
            .fetch_with_retry(symbol, interval, since, limit + 1)
            .await?;
        candles.retain(|c| c.timestamp <= execution.when);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    /// Candles strictly after the ambient `when`. Only the backtest
    /// simulator may look forward; live mode fails fast.
    pub async fn get_next_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let execution = context::execution()?;
        if !execution.backtest {
            return Err(EngineError::FutureDataInLive);
        }

        let since = execution.when;
        let mut candles = self
            .fetch_with_retry(symbol, interval, since, limit + 1)
            .await?;
        candles.retain(|c| c.timestamp > execution.when);
        candles.truncate(limit);
        Ok(candles)
    }

    /// VWAP over the trailing 1m window using typical price, unless the
    /// schema supplies its own average.
    pub async fn get_average_price(&self, symbol: &str) -> EngineResult<Decimal> {
        if let Some(price) = self
            .schema
            .api
            .get_average_price(symbol)
            .await
            .map_err(|e| EngineError::user_callback("get_average_price", e))?
        {
            return Ok(price);
        }

        let candles = self
            .get_candles(symbol, Interval::M1, self.config.avg_price_candles_count)
            .await?;
        if candles.is_empty() {
            return Err(EngineError::CandleFetchFailed {
                symbol: symbol.to_string(),
                attempts: self.config.candles_retry_count,
                reason: "no candles available for average price".to_string(),
            });
        }
        Ok(vwap(&candles))
    }

    pub fn format_price(&self, symbol: &str, price: Decimal) -> String {
        self.schema.api.format_price(symbol, price)
    }

    pub fn format_quantity(&self, symbol: &str, quantity: Decimal) -> String {
        self.schema.api.format_quantity(symbol, quantity)
    }

    async fn fetch_with_retry(
        &self,
        symbol: &str,
        interval: Interval,
        since: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let attempts = self.config.candles_retry_count.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self
                .schema
                .api
                .get_candles(symbol, interval, since, limit)
                .await
            {
                Ok(mut candles) => {
                    candles.sort_by_key(|c| c.timestamp);
                    match self.check_anomaly(symbol, &candles) {
                        None => return Ok(candles),
                        Some(err) => {
                            warn!(
                                "candle anomaly for {} on attempt {}/{}: {}",
                                symbol, attempt, attempts, err
                            );
                            last_error = Some(err);
                        }
                    }
                }
                Err(e) => {
                    debug!(
                        "candle fetch for {} failed on attempt {}/{}: {}",
                        symbol, attempt, attempts, e
                    );
                    last_error = Some(EngineError::CandleFetchFailed {
                        symbol: symbol.to_string(),
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }

            if attempt < attempts {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.candles_retry_delay_ms,
                ))
                .await;
            }
        }

        Err(last_error.unwrap_or(EngineError::CandleFetchFailed {
            symbol: symbol.to_string(),
            attempts,
            reason: "no attempts made".to_string(),
        }))
    }

    /// Flag any candle whose close strays beyond the configured fraction of
    /// the median of the closes preceding it.
    fn check_anomaly(&self, symbol: &str, candles: &[Candle]) -> Option<EngineError> {
        let lookback = self.config.median_candles_lookback;
        let threshold = self.config.price_anomaly_threshold;

        for (i, candle) in candles.iter().enumerate() {
            if i < 3 {
                continue;
            }
            let start = i.saturating_sub(lookback);
            let median = match median_close(&candles[start..i]) {
                Some(m) if !m.is_zero() => m,
                _ => continue,
            };
            let deviation: f64 = ((candle.close - median).abs() / median)
                .try_into()
                .unwrap_or(0.0);
            if deviation > threshold {
                return Some(EngineError::CandleAnomaly {
                    symbol: symbol.to_string(),
                    close: candle.close,
                    median,
                    deviation_pct: deviation * 100.0,
                });
            }
        }
        None
    }
}

/// Volume-weighted average of typical prices; falls back to a plain mean
/// when the window carries no volume.
pub fn vwap(candles: &[Candle]) -> Decimal {
    let total_volume: Decimal = candles.iter().map(|c| c.volume).sum();
    if total_volume.is_zero() {
        let sum: Decimal = candles.iter().map(|c| c.typical_price()).sum();
        return sum / Decimal::from(candles.len() as u64);
    }
    let weighted: Decimal = candles.iter().map(|c| c.typical_price() * c.volume).sum();
    weighted / total_volume
}

#[async_trait]
impl MarketAccess for ClientExchange {
    async fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(self.get_candles(symbol, interval, limit).await?)
    }

    async fn average_price(&self, symbol: &str) -> anyhow::Result<Decimal> {
        Ok(self.get_average_price(symbol).await?)
    }
}
