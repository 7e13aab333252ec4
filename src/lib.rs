//! # signalrunner
//!
//! A trading-strategy execution engine that evaluates user-supplied
//! strategies against historical candles (backtest) or real-time market
//! data (live), drives signals through a scheduled → pending → closed
//! lifecycle with TP/SL/time-expiry/partial-level/breakeven monitoring, and
//! emits structured events along the way.
//!
//! The engine never places orders: side effects belong to user callbacks
//! registered through schemas.
//!
//! ```no_run
//! use signalrunner::{Engine, EngineConfig};
//!
//! # async fn demo(exchange: signalrunner::schema::ExchangeSchema,
//! #               strategy: signalrunner::schema::StrategySchema,
//! #               frame: signalrunner::schema::FrameSchema) -> anyhow::Result<()> {
//! let engine = Engine::new(EngineConfig::default());
//! engine.add_exchange(exchange)?;
//! engine.add_strategy(strategy)?;
//! engine.add_frame(frame)?;
//!
//! let mut run = engine.backtest("BTCUSDT", signalrunner::BacktestRequest {
//!     strategy_name: "momentum".into(),
//!     exchange_name: "binance".into(),
//!     frame_name: "q1-2024".into(),
//! })?;
//! while let Some(closed) = run.next().await {
//!     println!("{} closed: {:.2}%", closed.row.symbol, closed.pnl.pnl_percentage);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod connectors;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod levels;
pub mod market;
pub mod persistence;
pub mod pnl;
pub mod report;
pub mod risk;
pub mod schema;
pub mod types;
pub mod validation;

pub use config::EngineConfig;
pub use engine::{
    BacktestRequest, BacktestRun, CancelHandle, LiveRequest, LiveRun, LiveUpdate, WalkerRequest,
    WalkerRun,
};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, Subscription};
pub use types::{
    Candle, CloseReason, ClosedSignal, Interval, PositionSide, SignalDto, SignalRow, TickOutcome,
};

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use connection::Connections;
use persistence::{FilePersistence, MemoryPersistence, PersistenceAdapter, SignalStore};
use report::StrategyReports;
use schema::{
    ExchangeSchema, ExchangeSchemaPatch, FrameSchema, FrameSchemaPatch, OptimizerSchema,
    OptimizerSchemaPatch, Registries, RiskSchema, RiskSchemaPatch, SizingSchema,
    SizingSchemaPatch, StrategySchema, StrategySchemaPatch, WalkerSchema, WalkerSchemaPatch,
};
use types::{
    BacktestProgress, BreakevenEvent, DoneEvent, ErrorEvent, ExitEvent, PartialEvent,
    PerformanceEvent, RiskEvent, SignalEvent, WalkerProgress,
};

/// Entry point owning the schema registries, connection caches, event bus
/// and persistence. Cheap to clone via `Arc` internals; construct it inside
/// a tokio runtime (listener queues spawn tasks).
pub struct Engine {
    registries: Arc<Registries>,
    connections: Arc<Connections>,
    bus: EventBus,
    config: Arc<EngineConfig>,
    reports: Arc<StrategyReports>,
}

impl Engine {
    /// Engine with the default file persistence rooted at
    /// `config.storage_dir`.
    pub fn new(config: EngineConfig) -> Self {
        let adapter: Arc<dyn PersistenceAdapter> =
            Arc::new(FilePersistence::new(config.storage_dir.clone(), "signal"));
        Self::with_persistence(config, adapter)
    }

    /// Engine with an in-memory store; nothing survives the process.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::with_persistence(config, Arc::new(MemoryPersistence::new()))
    }

    /// Engine with a custom persistence adapter.
    pub fn with_persistence(config: EngineConfig, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        let config = Arc::new(config);
        let registries = Arc::new(Registries::new());
        let bus = EventBus::new();
        let store = Arc::new(SignalStore::new(adapter));
        let connections = Arc::new(Connections::new(
            Arc::clone(&registries),
            Arc::clone(&config),
            bus.clone(),
            store,
        ));

        let reports = Arc::new(StrategyReports::new());
        let reports_sink = Arc::clone(&reports);
        bus.signal.subscribe(move |event| {
            let reports = Arc::clone(&reports_sink);
            async move {
                if let SignalEvent::Closed(closed) = event {
                    reports.add(closed);
                }
            }
        });

        Self {
            registries,
            connections,
            bus,
            config,
            reports,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Closed-signal accumulator fed from the signal subject.
    pub fn reports(&self) -> &StrategyReports {
        &self.reports
    }

    // ---- registration -----------------------------------------------------

    pub fn add_exchange(&self, schema: ExchangeSchema) -> EngineResult<()> {
        self.registries.exchange.register(schema)
    }

    pub fn add_strategy(&self, schema: StrategySchema) -> EngineResult<()> {
        self.registries.strategy.register(schema)
    }

    pub fn add_frame(&self, schema: FrameSchema) -> EngineResult<()> {
        self.registries.frame.register(schema)
    }

    pub fn add_risk(&self, schema: RiskSchema) -> EngineResult<()> {
        self.registries.risk.register(schema)
    }

    pub fn add_walker(&self, schema: WalkerSchema) -> EngineResult<()> {
        self.registries.walker.register(schema)
    }

    pub fn add_sizing(&self, schema: SizingSchema) -> EngineResult<()> {
        self.registries.sizing.register(schema)
    }

    pub fn add_optimizer(&self, schema: OptimizerSchema) -> EngineResult<()> {
        self.registries.optimizer.register(schema)
    }

    pub fn override_exchange(&self, name: &str, patch: ExchangeSchemaPatch) -> EngineResult<()> {
        self.registries
            .exchange
            .override_with(name, |current| current.patched(patch))
    }

    pub fn override_strategy(&self, name: &str, patch: StrategySchemaPatch) -> EngineResult<()> {
        self.registries
            .strategy
            .override_with(name, |current| current.patched(patch))
    }

    pub fn override_frame(&self, name: &str, patch: FrameSchemaPatch) -> EngineResult<()> {
        self.registries
            .frame
            .override_with(name, |current| current.patched(patch))
    }

    pub fn override_risk(&self, name: &str, patch: RiskSchemaPatch) -> EngineResult<()> {
        self.registries
            .risk
            .override_with(name, |current| current.patched(patch))
    }

    pub fn override_walker(&self, name: &str, patch: WalkerSchemaPatch) -> EngineResult<()> {
        self.registries
            .walker
            .override_with(name, |current| current.patched(patch))
    }

    pub fn override_sizing(&self, name: &str, patch: SizingSchemaPatch) -> EngineResult<()> {
        self.registries
            .sizing
            .override_with(name, |current| current.patched(patch))
    }

    pub fn override_optimizer(&self, name: &str, patch: OptimizerSchemaPatch) -> EngineResult<()> {
        self.registries
            .optimizer
            .override_with(name, |current| current.patched(patch))
    }

    // ---- execution --------------------------------------------------------

    /// Lazy, finite stream of closed signals for one (symbol, strategy).
    pub fn backtest(&self, symbol: &str, request: BacktestRequest) -> EngineResult<BacktestRun> {
        engine::backtest::run(Arc::clone(&self.connections), symbol, request)
    }

    /// Backtest observable only through events; returns the cancel handle.
    pub fn backtest_background(
        &self,
        symbol: &str,
        request: BacktestRequest,
    ) -> EngineResult<CancelHandle> {
        engine::backtest::background(Arc::clone(&self.connections), symbol, request)
    }

    /// Infinite stream of opened/closed updates from the live loop.
    pub fn live(&self, symbol: &str, request: LiveRequest) -> EngineResult<LiveRun> {
        engine::live::run(Arc::clone(&self.connections), symbol, request)
    }

    pub fn live_background(&self, symbol: &str, request: LiveRequest) -> EngineResult<CancelHandle> {
        engine::live::background(Arc::clone(&self.connections), symbol, request)
    }

    /// Sequential multi-strategy comparison; one progress record per
    /// strategy tested.
    pub fn walker(&self, symbol: &str, request: WalkerRequest) -> EngineResult<WalkerRun> {
        engine::walker::run(Arc::clone(&self.connections), symbol, request)
    }

    pub fn walker_background(
        &self,
        symbol: &str,
        request: WalkerRequest,
    ) -> EngineResult<CancelHandle> {
        engine::walker::background(Arc::clone(&self.connections), symbol, request)
    }

    /// Soft-stop a backtest strategy for one symbol: no new signals, the
    /// current one closes naturally.
    pub async fn stop_backtest(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
    ) -> EngineResult<()> {
        let strategy = self
            .connections
            .get_strategy(strategy_name, exchange_name, frame_name, true)?;
        strategy.stop(symbol).await;
        Ok(())
    }

    /// Soft-stop a live strategy for one symbol; the live loop exits after
    /// the tracked signal (if any) closes.
    pub async fn stop_live(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
    ) -> EngineResult<()> {
        let strategy = self.connections.get_strategy(
            strategy_name,
            exchange_name,
            engine::live::LIVE_FRAME,
            false,
        )?;
        strategy.stop(symbol).await;
        Ok(())
    }

    /// The tracked non-closed signal for a (strategy, symbol), if any.
    pub async fn current_signal(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
        backtest: bool,
    ) -> EngineResult<Option<SignalRow>> {
        let strategy = self
            .connections
            .get_strategy(strategy_name, exchange_name, frame_name, backtest)?;
        Ok(strategy.current_signal(symbol).await)
    }

    /// Drop every memoized client instance. Registered schemas survive.
    pub fn clear_connections(&self) {
        self.connections.clear();
    }

    // ---- ambient utilities ------------------------------------------------

    /// Candles at or before the ambient timestamp, for the exchange named
    /// by the ambient method context.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let method = context::method()?;
        let exchange = self.connections.get_exchange(&method.exchange_name)?;
        exchange.get_candles(symbol, interval, limit).await
    }

    pub async fn get_average_price(&self, symbol: &str) -> EngineResult<Decimal> {
        let method = context::method()?;
        let exchange = self.connections.get_exchange(&method.exchange_name)?;
        exchange.get_average_price(symbol).await
    }

    pub fn format_price(&self, symbol: &str, price: Decimal) -> EngineResult<String> {
        let method = context::method()?;
        let exchange = self.connections.get_exchange(&method.exchange_name)?;
        Ok(exchange.format_price(symbol, price))
    }

    pub fn format_quantity(&self, symbol: &str, quantity: Decimal) -> EngineResult<String> {
        let method = context::method()?;
        let exchange = self.connections.get_exchange(&method.exchange_name)?;
        Ok(exchange.format_quantity(symbol, quantity))
    }

    /// Timestamp of the ambient tick.
    pub fn get_date(&self) -> EngineResult<DateTime<Utc>> {
        context::now()
    }

    /// `"backtest"` or `"live"` per the ambient execution context.
    pub fn get_mode(&self) -> EngineResult<&'static str> {
        Ok(if context::is_backtest()? {
            "backtest"
        } else {
            "live"
        })
    }
}

macro_rules! listen_methods {
    ($(($listen:ident, $once:ident, $subject:ident, $event:ty)),* $(,)?) => {
        impl Engine {
            $(
                pub fn $listen<F, Fut>(&self, callback: F) -> Subscription
                where
                    F: Fn($event) -> Fut + Send + Sync + 'static,
                    Fut: Future<Output = ()> + Send,
                {
                    self.bus.$subject.subscribe(callback)
                }

                pub fn $once<P, F, Fut>(&self, filter: P, callback: F) -> Subscription
                where
                    P: Fn(&$event) -> bool + Send + Sync + 'static,
                    F: FnOnce($event) -> Fut + Send + 'static,
                    Fut: Future<Output = ()> + Send,
                {
                    self.bus.$subject.subscribe_once(filter, callback)
                }
            )*
        }
    };
}

listen_methods!(
    (listen_signal, listen_signal_once, signal, SignalEvent),
    (listen_signal_backtest, listen_signal_backtest_once, signal_backtest, SignalEvent),
    (listen_signal_live, listen_signal_live_once, signal_live, SignalEvent),
    (listen_done_backtest, listen_done_backtest_once, done_backtest, DoneEvent),
    (listen_done_live, listen_done_live_once, done_live, DoneEvent),
    (listen_done_walker, listen_done_walker_once, done_walker, DoneEvent),
    (listen_backtest_progress, listen_backtest_progress_once, progress_backtest, BacktestProgress),
    (listen_walker_progress, listen_walker_progress_once, progress_walker, WalkerProgress),
    (listen_partial_profit, listen_partial_profit_once, partial_profit, PartialEvent),
    (listen_partial_loss, listen_partial_loss_once, partial_loss, PartialEvent),
    (listen_breakeven, listen_breakeven_once, breakeven, BreakevenEvent),
    (listen_risk, listen_risk_once, risk, RiskEvent),
    (listen_performance, listen_performance_once, performance, PerformanceEvent),
    (listen_error, listen_error_once, error, ErrorEvent),
    (listen_exit, listen_exit_once, exit, ExitEvent),
);
