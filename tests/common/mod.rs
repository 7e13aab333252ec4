//! Shared fixtures: a scripted exchange serving canned 1m candle series and
//! a strategy that fires a prepared signal once per symbol.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use signalrunner::schema::{
    ExchangeApi, ExchangeSchema, FrameSchema, SignalContext, StrategyApi, StrategySchema,
};
use signalrunner::types::SignalEvent;
use signalrunner::{Candle, Engine, EngineConfig, Interval, SignalDto};

pub fn t0() -> DateTime<Utc> {
    // Frames start half an hour in so the VWAP warmup window is populated.
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap()
}

pub fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

pub fn flat(at: DateTime<Utc>, price: Decimal) -> Candle {
    Candle {
        timestamp: at,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: Decimal::ONE,
    }
}

pub fn candle(
    at: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
) -> Candle {
    Candle {
        timestamp: at,
        open,
        high,
        low,
        close,
        volume: Decimal::ONE,
    }
}

/// Baseline series: `minutes` flat 1m candles from `series_start()`.
pub fn flat_series(minutes: i64, price: Decimal) -> Vec<Candle> {
    (0..minutes)
        .map(|m| flat(series_start() + Duration::minutes(m), price))
        .collect()
}

pub struct FixtureExchange {
    series: HashMap<String, Vec<Candle>>,
}

impl FixtureExchange {
    pub fn new(series: HashMap<String, Vec<Candle>>) -> Self {
        Self { series }
    }

    pub fn single(symbol: &str, candles: Vec<Candle>) -> Self {
        Self::new(HashMap::from([(symbol.to_string(), candles)]))
    }
}

#[async_trait]
impl ExchangeApi for FixtureExchange {
    async fn get_candles(
        &self,
        symbol: &str,
        _interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(self
            .series
            .get(symbol)
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| c.timestamp >= since)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn format_price(&self, _symbol: &str, price: Decimal) -> String {
        format!("{:.2}", price)
    }

    fn format_quantity(&self, _symbol: &str, quantity: Decimal) -> String {
        format!("{:.5}", quantity)
    }
}

/// Fires the prepared signal once per symbol, then stays quiet.
pub struct ScriptedStrategy {
    signals: Mutex<HashMap<String, SignalDto>>,
}

impl ScriptedStrategy {
    pub fn new(signals: HashMap<String, SignalDto>) -> Self {
        Self {
            signals: Mutex::new(signals),
        }
    }

    pub fn single(symbol: &str, dto: SignalDto) -> Self {
        Self::new(HashMap::from([(symbol.to_string(), dto)]))
    }
}

#[async_trait]
impl StrategyApi for ScriptedStrategy {
    async fn get_signal(&self, ctx: &SignalContext<'_>) -> anyhow::Result<Option<SignalDto>> {
        Ok(self.signals.lock().unwrap().remove(ctx.symbol))
    }
}

/// Engine wired with the fixture exchange, a scripted strategy and an M1
/// frame spanning `frame_minutes` from `t0()`.
pub fn fixture_engine(
    exchange: FixtureExchange,
    strategy: ScriptedStrategy,
    frame_minutes: i64,
) -> Engine {
    // Synthetic fixtures jump far harder than real ticks; a loose anomaly
    // threshold keeps the detector out of the lifecycle assertions.
    fixture_engine_with_config(
        EngineConfig {
            candles_retry_delay_ms: 1,
            price_anomaly_threshold: 10.0,
            ..EngineConfig::default()
        },
        exchange,
        strategy,
        frame_minutes,
    )
}

pub fn fixture_engine_with_config(
    config: EngineConfig,
    exchange: FixtureExchange,
    strategy: ScriptedStrategy,
    frame_minutes: i64,
) -> Engine {
    let engine = Engine::in_memory(config);
    engine
        .add_exchange(ExchangeSchema {
            name: "fixture".to_string(),
            api: Arc::new(exchange),
        })
        .unwrap();
    engine
        .add_strategy(StrategySchema {
            name: "scripted".to_string(),
            interval: Interval::M1,
            api: Arc::new(strategy),
            risk_name: None,
            trailing: None,
            hooks: None,
        })
        .unwrap();
    engine
        .add_frame(FrameSchema {
            name: "window".to_string(),
            interval: Interval::M1,
            start: t0(),
            end: t0() + Duration::minutes(frame_minutes),
        })
        .unwrap();
    engine
}

/// Collects lifecycle events in arrival order for later assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SignalEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, engine: &Engine) {
        let sink = Arc::clone(&self.events);
        engine.listen_signal(move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(event);
            }
        });
    }

    pub fn kinds_for(&self, symbol: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.symbol() == symbol)
            .map(|e| match e {
                SignalEvent::Scheduled(_) => "scheduled",
                SignalEvent::Opened(_) => "opened",
                SignalEvent::Cancelled(_) => "cancelled",
                SignalEvent::Closed(_) => "closed",
            })
            .collect()
    }

    pub fn all(&self) -> Vec<SignalEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Let queued listener tasks drain before asserting on the log.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
}
