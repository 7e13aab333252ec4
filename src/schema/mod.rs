pub mod registry;

pub use registry::SchemaRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

use crate::types::{Candle, Interval, SignalDto, SignalRow};

/// Read access to market data handed to user callbacks. The engine's
/// exchange client implements this; callbacks never see the client itself.
#[async_trait]
pub trait MarketAccess: Send + Sync {
    /// Up to `limit` candles ending at the ambient timestamp, ascending.
    async fn candles(&self, symbol: &str, interval: Interval, limit: usize)
        -> anyhow::Result<Vec<Candle>>;

    /// VWAP (or the exchange override) at the ambient timestamp.
    async fn average_price(&self, symbol: &str) -> anyhow::Result<Decimal>;
}

/// Per-call view a strategy receives alongside the ambient contexts.
pub struct SignalContext<'a> {
    pub symbol: &'a str,
    pub when: DateTime<Utc>,
    pub backtest: bool,
    pub market: &'a dyn MarketAccess,
}

/// User exchange callbacks.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Candles starting at `since`, ascending, at most `limit`. The engine
    /// applies its own temporal filtering on top.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    fn format_price(&self, symbol: &str, price: Decimal) -> String;

    fn format_quantity(&self, symbol: &str, quantity: Decimal) -> String;

    /// Optional override for the default VWAP average price. Returning
    /// `Ok(None)` selects the engine default.
    async fn get_average_price(&self, _symbol: &str) -> anyhow::Result<Option<Decimal>> {
        Ok(None)
    }
}

/// User strategy callback.
#[async_trait]
pub trait StrategyApi: Send + Sync {
    /// Produce a signal candidate, or `None` to stay idle this tick.
    async fn get_signal(&self, ctx: &SignalContext<'_>) -> anyhow::Result<Option<SignalDto>>;
}

/// Optional strategy lifecycle hooks.
#[async_trait]
pub trait StrategyHooks: Send + Sync {
    async fn on_open(&self, _row: &SignalRow) {}
    async fn on_close(&self, _closed: &crate::types::ClosedSignal) {}
}

/// One ordered risk check; `Err` rejects the candidate signal.
#[async_trait]
pub trait RiskPredicate: Send + Sync {
    async fn check(&self, ctx: &RiskContext<'_>) -> anyhow::Result<()>;
}

pub struct RiskContext<'a> {
    pub row: &'a SignalRow,
    pub when: DateTime<Utc>,
    pub backtest: bool,
    /// Pending positions currently held across symbols for this risk client.
    pub active_positions: usize,
}

/// Position sizing callback (auxiliary schema).
#[async_trait]
pub trait SizingApi: Send + Sync {
    async fn compute_quantity(&self, row: &SignalRow, equity: Decimal) -> anyhow::Result<Decimal>;
}

/// Optimizer callback (auxiliary schema).
#[async_trait]
pub trait OptimizerApi: Send + Sync {
    async fn compute(&self, strategy_name: &str) -> anyhow::Result<serde_json::Value>;
}

/// Trailing-stop tuning; absent means the feature is off for the strategy.
#[derive(Debug, Clone, Copy)]
pub struct TrailingConfig {
    /// Adjusted PnL percent at which trailing arms.
    pub activation_pct: Decimal,
    /// Distance kept between the favorable extreme and the stop, percent.
    pub trail_pct: Decimal,
}

#[derive(Clone)]
pub struct ExchangeSchema {
    pub name: String,
    pub api: Arc<dyn ExchangeApi>,
}

#[derive(Clone)]
pub struct StrategySchema {
    pub name: String,
    /// Throttle: minimum spacing between `get_signal` calls per symbol.
    pub interval: Interval,
    pub api: Arc<dyn StrategyApi>,
    pub risk_name: Option<String>,
    pub trailing: Option<TrailingConfig>,
    pub hooks: Option<Arc<dyn StrategyHooks>>,
}

#[derive(Debug, Clone)]
pub struct FrameSchema {
    pub name: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FrameSchema {
    /// Monotonic ascending tick timestamps covering [start, end].
    pub fn timeframes(&self) -> Vec<DateTime<Utc>> {
        let step = self.interval.as_duration();
        let mut frames = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            frames.push(current);
            current += step;
        }
        frames
    }
}

#[derive(Clone)]
pub struct RiskSchema {
    pub name: String,
    pub predicates: Vec<Arc<dyn RiskPredicate>>,
    pub max_concurrent_positions: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerMetric {
    SharpeRatio,
    WinRate,
    TotalPnl,
    AvgPnl,
    MaxDrawdown,
    CertaintyRatio,
    AnnualizedSharpeRatio,
    ExpectedYearlyReturns,
}

impl WalkerMetric {
    /// Whether larger values rank better. Drawdown is the inverted one.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, WalkerMetric::MaxDrawdown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalkerMetric::SharpeRatio => "sharpe_ratio",
            WalkerMetric::WinRate => "win_rate",
            WalkerMetric::TotalPnl => "total_pnl",
            WalkerMetric::AvgPnl => "avg_pnl",
            WalkerMetric::MaxDrawdown => "max_drawdown",
            WalkerMetric::CertaintyRatio => "certainty_ratio",
            WalkerMetric::AnnualizedSharpeRatio => "annualized_sharpe_ratio",
            WalkerMetric::ExpectedYearlyReturns => "expected_yearly_returns",
        }
    }

    /// `true` when `candidate` beats `best` under this metric's ordering.
    pub fn improves(&self, candidate: f64, best: f64) -> bool {
        if self.higher_is_better() {
            candidate > best
        } else {
            candidate < best
        }
    }
}

impl fmt::Display for WalkerMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WalkerSchema {
    pub name: String,
    pub strategies: Vec<String>,
    pub metric: WalkerMetric,
    pub exchange_name: String,
    pub frame_name: String,
}

#[derive(Clone)]
pub struct SizingSchema {
    pub name: String,
    pub api: Arc<dyn SizingApi>,
}

#[derive(Clone)]
pub struct OptimizerSchema {
    pub name: String,
    pub api: Arc<dyn OptimizerApi>,
}

/// Named schema with shallow (presence/shape) validation. Cross-references
/// such as a strategy's risk name are resolved lazily at execution start.
pub trait Schema: Send + Sync + 'static {
    const KIND: &'static str;

    fn name(&self) -> &str;

    fn validate_shallow(&self) -> Result<(), String> {
        if self.name().trim().is_empty() {
            return Err(format!("{} schema requires a non-empty name", Self::KIND));
        }
        Ok(())
    }
}

impl Schema for ExchangeSchema {
    const KIND: &'static str = "exchange";
    fn name(&self) -> &str {
        &self.name
    }
}

impl Schema for StrategySchema {
    const KIND: &'static str = "strategy";
    fn name(&self) -> &str {
        &self.name
    }
    fn validate_shallow(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("strategy schema requires a non-empty name".to_string());
        }
        if let Some(trailing) = &self.trailing {
            if trailing.trail_pct <= Decimal::ZERO || trailing.activation_pct <= Decimal::ZERO {
                return Err("trailing config percents must be positive".to_string());
            }
        }
        Ok(())
    }
}

impl Schema for FrameSchema {
    const KIND: &'static str = "frame";
    fn name(&self) -> &str {
        &self.name
    }
    fn validate_shallow(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("frame schema requires a non-empty name".to_string());
        }
        if self.start >= self.end {
            return Err("frame start must precede end".to_string());
        }
        Ok(())
    }
}

impl Schema for RiskSchema {
    const KIND: &'static str = "risk";
    fn name(&self) -> &str {
        &self.name
    }
    fn validate_shallow(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("risk schema requires a non-empty name".to_string());
        }
        if self.max_concurrent_positions == Some(0) {
            return Err("max_concurrent_positions must be > 0 when set".to_string());
        }
        Ok(())
    }
}

impl Schema for WalkerSchema {
    const KIND: &'static str = "walker";
    fn name(&self) -> &str {
        &self.name
    }
    fn validate_shallow(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("walker schema requires a non-empty name".to_string());
        }
        if self.strategies.is_empty() {
            return Err("walker schema requires at least one strategy".to_string());
        }
        Ok(())
    }
}

impl Schema for SizingSchema {
    const KIND: &'static str = "sizing";
    fn name(&self) -> &str {
        &self.name
    }
}

impl Schema for OptimizerSchema {
    const KIND: &'static str = "optimizer";
    fn name(&self) -> &str {
        &self.name
    }
}

/// Partial replacements applied by the `override_*` registration calls.
/// `None` keeps the registered value.
#[derive(Default)]
pub struct StrategySchemaPatch {
    pub interval: Option<Interval>,
    pub api: Option<Arc<dyn StrategyApi>>,
    pub risk_name: Option<String>,
    pub trailing: Option<TrailingConfig>,
    pub hooks: Option<Arc<dyn StrategyHooks>>,
}

impl StrategySchema {
    pub fn patched(&self, patch: StrategySchemaPatch) -> Self {
        Self {
            name: self.name.clone(),
            interval: patch.interval.unwrap_or(self.interval),
            api: patch.api.unwrap_or_else(|| Arc::clone(&self.api)),
            risk_name: patch.risk_name.or_else(|| self.risk_name.clone()),
            trailing: patch.trailing.or(self.trailing),
            hooks: patch.hooks.or_else(|| self.hooks.clone()),
        }
    }
}

#[derive(Default)]
pub struct ExchangeSchemaPatch {
    pub api: Option<Arc<dyn ExchangeApi>>,
}

impl ExchangeSchema {
    pub fn patched(&self, patch: ExchangeSchemaPatch) -> Self {
        Self {
            name: self.name.clone(),
            api: patch.api.unwrap_or_else(|| Arc::clone(&self.api)),
        }
    }
}

#[derive(Default)]
pub struct FrameSchemaPatch {
    pub interval: Option<Interval>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl FrameSchema {
    pub fn patched(&self, patch: FrameSchemaPatch) -> Self {
        Self {
            name: self.name.clone(),
            interval: patch.interval.unwrap_or(self.interval),
            start: patch.start.unwrap_or(self.start),
            end: patch.end.unwrap_or(self.end),
        }
    }
}

#[derive(Default)]
pub struct RiskSchemaPatch {
    pub predicates: Option<Vec<Arc<dyn RiskPredicate>>>,
    pub max_concurrent_positions: Option<usize>,
}

impl RiskSchema {
    pub fn patched(&self, patch: RiskSchemaPatch) -> Self {
        Self {
            name: self.name.clone(),
            predicates: patch.predicates.unwrap_or_else(|| self.predicates.clone()),
            max_concurrent_positions: patch
                .max_concurrent_positions
                .map(Some)
                .unwrap_or(self.max_concurrent_positions),
        }
    }
}

#[derive(Default)]
pub struct WalkerSchemaPatch {
    pub strategies: Option<Vec<String>>,
    pub metric: Option<WalkerMetric>,
    pub exchange_name: Option<String>,
    pub frame_name: Option<String>,
}

impl WalkerSchema {
    pub fn patched(&self, patch: WalkerSchemaPatch) -> Self {
        Self {
            name: self.name.clone(),
            strategies: patch.strategies.unwrap_or_else(|| self.strategies.clone()),
            metric: patch.metric.unwrap_or(self.metric),
            exchange_name: patch.exchange_name.unwrap_or_else(|| self.exchange_name.clone()),
            frame_name: patch.frame_name.unwrap_or_else(|| self.frame_name.clone()),
        }
    }
}

#[derive(Default)]
pub struct SizingSchemaPatch {
    pub api: Option<Arc<dyn SizingApi>>,
}

impl SizingSchema {
    pub fn patched(&self, patch: SizingSchemaPatch) -> Self {
        Self {
            name: self.name.clone(),
            api: patch.api.unwrap_or_else(|| Arc::clone(&self.api)),
        }
    }
}

#[derive(Default)]
pub struct OptimizerSchemaPatch {
    pub api: Option<Arc<dyn OptimizerApi>>,
}

impl OptimizerSchema {
    pub fn patched(&self, patch: OptimizerSchemaPatch) -> Self {
        Self {
            name: self.name.clone(),
            api: patch.api.unwrap_or_else(|| Arc::clone(&self.api)),
        }
    }
}

/// One registry per schema kind; write-once at init, read-many during
/// execution.
#[derive(Default)]
pub struct Registries {
    pub exchange: SchemaRegistry<ExchangeSchema>,
    pub strategy: SchemaRegistry<StrategySchema>,
    pub frame: SchemaRegistry<FrameSchema>,
    pub risk: SchemaRegistry<RiskSchema>,
    pub walker: SchemaRegistry<WalkerSchema>,
    pub sizing: SchemaRegistry<SizingSchema>,
    pub optimizer: SchemaRegistry<OptimizerSchema>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }
}
