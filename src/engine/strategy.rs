use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::lifecycle::{run_pending_pass, run_scheduled_pass, CloseDecision, LevelEvent, ScheduledPass};
use super::simulator::{self, SimulationOutcome};
use crate::config::EngineConfig;
use crate::context;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::levels::ClientPartial;
use crate::market::ClientExchange;
use crate::persistence::SignalStore;
use crate::pnl::{self, SignalPnl};
use crate::risk::ClientRisk;
use crate::schema::{SignalContext, StrategySchema};
use crate::types::{
    BreakevenEvent, Candle, CloseReason, ClosedSignal, ErrorEvent, Interval, PartialEvent,
    PingEvent, RiskEvent, SignalEvent, SignalRow, SignalState, TickOutcome,
};
use crate::validation::validate_signal;

/// Per-symbol mutable state. Each symbol gets its own lock so parallel
/// symbols under one strategy never serialize on each other.
#[derive(Default)]
struct SymbolState {
    signal: Option<SignalRow>,
    stop_requested: bool,
    last_get_signal: Option<DateTime<Utc>>,
    restored: bool,
}

/// The signal lifecycle state machine for one (strategy, exchange, frame,
/// mode) tuple. Guarantees at most one non-closed signal per symbol.
pub struct ClientStrategy {
    schema: Arc<StrategySchema>,
    frame_name: String,
    exchange: Arc<ClientExchange>,
    risk: Arc<ClientRisk>,
    partial: Arc<ClientPartial>,
    store: Arc<SignalStore>,
    bus: EventBus,
    config: Arc<EngineConfig>,
    backtest: bool,
    symbols: StdMutex<HashMap<String, Arc<Mutex<SymbolState>>>>,
}

impl ClientStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema: Arc<StrategySchema>,
        frame_name: String,
        exchange: Arc<ClientExchange>,
        risk: Arc<ClientRisk>,
        partial: Arc<ClientPartial>,
        store: Arc<SignalStore>,
        bus: EventBus,
        config: Arc<EngineConfig>,
        backtest: bool,
    ) -> Self {
        Self {
            schema,
            frame_name,
            exchange,
            risk,
            partial,
            store,
            bus,
            config,
            backtest,
            symbols: StdMutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    fn symbol_state(&self, symbol: &str) -> Arc<Mutex<SymbolState>> {
        let mut symbols = self.symbols.lock().expect("symbol map lock poisoned");
        Arc::clone(symbols.entry(symbol.to_string()).or_default())
    }

    /// Soft stop: no further `get_signal` calls for the symbol. Existing
    /// signals keep being monitored until they close naturally.
    pub async fn stop(&self, symbol: &str) {
        let state = self.symbol_state(symbol);
        state.lock().await.stop_requested = true;
        info!("strategy '{}' stop requested for {}", self.schema.name, symbol);
    }

    pub async fn is_stopped(&self, symbol: &str) -> bool {
        self.symbol_state(symbol).lock().await.stop_requested
    }

    pub async fn has_signal(&self, symbol: &str) -> bool {
        self.symbol_state(symbol).lock().await.signal.is_some()
    }

    /// Snapshot of the tracked signal, if any.
    pub async fn current_signal(&self, symbol: &str) -> Option<SignalRow> {
        self.symbol_state(symbol).lock().await.signal.clone()
    }

    /// Idempotent. On the first call in live mode, rehydrates the persisted
    /// signal record for this (strategy, symbol).
    pub async fn wait_for_init(&self, symbol: &str) -> EngineResult<()> {
        let state_arc = self.symbol_state(symbol);
        let mut state = state_arc.lock().await;
        if state.restored {
            return Ok(());
        }
        state.restored = true;

        if self.backtest {
            return Ok(());
        }

        self.store.init(true).await?;
        let entity_id = crate::types::signal_entity_id(&self.schema.name, symbol);
        if let Some(row) = self.store.read(&entity_id).await? {
            info!(
                "restored persisted signal {} for {}/{} (state {:?})",
                row.id, self.schema.name, symbol, row.state
            );
            if row.state == SignalState::Pending {
                self.risk.register_open(&row).await;
            }
            state.signal = Some(row);
        }
        Ok(())
    }

    /// One evaluation cycle at the ambient execution timestamp.
    pub async fn tick(&self, symbol: &str) -> EngineResult<TickOutcome> {
        self.wait_for_init(symbol).await?;
        let execution = context::execution()?;
        let when = execution.when;

        let state_arc = self.symbol_state(symbol);
        let mut state = state_arc.lock().await;

        let current = state.signal.clone();
        match current {
            None => self.tick_idle(symbol, when, &mut state).await,
            Some(row) if row.state == SignalState::Scheduled => {
                self.tick_scheduled(symbol, when, row, &mut state).await
            }
            Some(row) => self.tick_pending(symbol, when, row, &mut state).await,
        }
    }

    /// Deterministic fast-forward over a contiguous 1m candle window,
    /// producing the signal's terminal result. Used by the backtest loop
    /// right after a `scheduled` or `opened` tick.
    pub async fn backtest(&self, symbol: &str, candles: &[Candle]) -> EngineResult<ClosedSignal> {
        let state_arc = self.symbol_state(symbol);
        let mut state = state_arc.lock().await;
        let row = state.signal.clone().ok_or_else(|| {
            EngineError::InvalidSignal(format!("no live signal for {} to simulate", symbol))
        })?;

        let was_scheduled = row.state == SignalState::Scheduled;
        let outcome = simulator::simulate(row, candles, &self.partial, &self.config);
        let SimulationOutcome {
            mut row,
            activated_at,
            events,
            decision,
        } = outcome;

        if was_scheduled {
            if let Some(at) = activated_at {
                if let Err(e) = self.risk.check_signal(&row, at, self.backtest).await {
                    self.emit_risk(symbol, at, e.to_string());
                    row.state = SignalState::Scheduled;
                    row.pending_at = None;
                    let cancel = CloseDecision {
                        reason: CloseReason::Cancelled,
                        price_close: row.price_open,
                        at,
                    };
                    return self.finalize(&mut state, row, cancel).await;
                }
                self.risk.register_open(&row).await;
                if let Some(hooks) = &self.schema.hooks {
                    hooks.on_open(&row).await;
                }
                self.bus
                    .publish_signal(SignalEvent::Opened(row.clone()), self.backtest);
            }
        }

        self.emit_level_events(&row, &events);
        self.finalize(&mut state, row, decision).await
    }

    async fn tick_idle(
        &self,
        symbol: &str,
        when: DateTime<Utc>,
        state: &mut SymbolState,
    ) -> EngineResult<TickOutcome> {
        if state.stop_requested {
            return Ok(TickOutcome::Idle);
        }

        // Throttle get_signal to the schema interval.
        if let Some(last) = state.last_get_signal {
            if when - last < self.schema.interval.as_duration() {
                return Ok(TickOutcome::Idle);
            }
        }
        state.last_get_signal = Some(when);

        let ctx = SignalContext {
            symbol,
            when,
            backtest: self.backtest,
            market: self.exchange.as_ref(),
        };
        let dto = match self.schema.api.get_signal(&ctx).await {
            Ok(Some(dto)) => dto,
            Ok(None) => return Ok(TickOutcome::Idle),
            Err(e) => {
                self.emit_error(symbol, when, format!("get_signal failed: {}", e));
                return Ok(TickOutcome::Idle);
            }
        };

        let current_price = self.exchange.get_average_price(symbol).await?;
        let price_open = dto.price_open.unwrap_or(current_price);

        if let Err(e) = validate_signal(&dto, price_open, None, &self.config) {
            self.emit_error(symbol, when, e.to_string());
            return Ok(TickOutcome::Idle);
        }

        let immediate = dto.price_open.is_none()
            || within_tolerance(price_open, current_price, self.config.immediate_open_tolerance_pct);

        let mut row = SignalRow::from_dto(
            dto,
            symbol,
            &self.schema.name,
            self.exchange.name(),
            &self.frame_name,
            price_open,
            when,
        );

        if !immediate {
            debug!(
                "signal {} scheduled for {} at entry {}",
                row.id, symbol, row.price_open
            );
            state.signal = Some(row.clone());
            self.bus
                .publish_signal(SignalEvent::Scheduled(row.clone()), self.backtest);
            return Ok(TickOutcome::Scheduled(row));
        }

        // Activation-ready: the risk slot is consulted before anything opens.
        if let Err(e) = self.risk.check_signal(&row, when, self.backtest).await {
            self.emit_risk(symbol, when, e.to_string());
            return Ok(TickOutcome::Idle);
        }

        row.activate(when);
        row.scheduled_at = when;
        if !self.persist_pending_transition(symbol, when, &mut row, state).await {
            return Ok(TickOutcome::Scheduled(row));
        }
        self.risk.register_open(&row).await;
        if let Some(hooks) = &self.schema.hooks {
            hooks.on_open(&row).await;
        }
        info!(
            "signal {} opened for {} at {} ({})",
            row.id, symbol, row.price_open, row.position
        );
        state.signal = Some(row.clone());
        self.bus
            .publish_signal(SignalEvent::Opened(row.clone()), self.backtest);
        Ok(TickOutcome::Opened(row))
    }

    async fn tick_scheduled(
        &self,
        symbol: &str,
        when: DateTime<Utc>,
        row: SignalRow,
        state: &mut SymbolState,
    ) -> EngineResult<TickOutcome> {
        let minutes = row.minutes_scheduled(when).max(0) as usize;
        let limit = (minutes + 2).min(self.config.schedule_await_min as usize + 2);
        let candles = self.exchange.get_candles(symbol, Interval::M1, limit).await?;

        match run_scheduled_pass(&row, &candles, &self.config) {
            ScheduledPass::Waiting => {
                self.bus.schedule_ping.emit(PingEvent {
                    row: row.clone(),
                    when,
                });
                Ok(TickOutcome::Scheduled(row))
            }
            ScheduledPass::Cancelled(decision) => {
                let closed = self.finalize(state, row, decision).await?;
                Ok(TickOutcome::Cancelled(closed))
            }
            ScheduledPass::Activated { at, from_index } => {
                let mut row = row;
                if let Err(e) = self.risk.check_signal(&row, at, self.backtest).await {
                    self.emit_risk(symbol, when, e.to_string());
                    let cancel = CloseDecision {
                        reason: CloseReason::Cancelled,
                        price_close: candles
                            .get(from_index)
                            .map(|c| c.close)
                            .unwrap_or(row.price_open),
                        at,
                    };
                    let closed = self.finalize(state, row, cancel).await?;
                    return Ok(TickOutcome::Cancelled(closed));
                }

                row.activate(at);
                if !self.persist_pending_transition(symbol, when, &mut row, state).await {
                    return Ok(TickOutcome::Scheduled(row));
                }
                self.risk.register_open(&row).await;
                if let Some(hooks) = &self.schema.hooks {
                    hooks.on_open(&row).await;
                }
                info!("signal {} activated for {} at {}", row.id, symbol, at);
                self.bus
                    .publish_signal(SignalEvent::Opened(row.clone()), self.backtest);

                // TP/SL may fire on the activation candle itself.
                let mut pending = row;
                let pass = run_pending_pass(
                    &mut pending,
                    &candles[from_index..],
                    &self.partial,
                    &self.config,
                );
                self.emit_level_events(&pending, &pass.events);
                if let Some(decision) = pass.close {
                    let closed = self.finalize(state, pending, decision).await?;
                    return Ok(TickOutcome::Closed(closed));
                }
                self.persist_update(&pending).await;
                state.signal = Some(pending.clone());
                Ok(TickOutcome::Opened(pending))
            }
        }
    }

    async fn tick_pending(
        &self,
        symbol: &str,
        when: DateTime<Utc>,
        row: SignalRow,
        state: &mut SymbolState,
    ) -> EngineResult<TickOutcome> {
        let minutes = row.minutes_pending(when).max(0) as usize;
        let limit = (minutes + 2).min(row.minute_estimated_time as usize + 2);
        let candles = self.exchange.get_candles(symbol, Interval::M1, limit).await?;

        let mut pending = row;
        let pass = run_pending_pass(&mut pending, &candles, &self.partial, &self.config);
        self.emit_level_events(&pending, &pass.events);

        if let Some(decision) = pass.close {
            let closed = self.finalize(state, pending, decision).await?;
            return Ok(TickOutcome::Closed(closed));
        }

        // Candles may lag the tick timestamp; the expiry clock does not.
        if pending.minutes_pending(when) >= pending.minute_estimated_time {
            let price_close = self.exchange.get_average_price(symbol).await?;
            let decision = CloseDecision {
                reason: CloseReason::TimeExpired,
                price_close,
                at: when,
            };
            let closed = self.finalize(state, pending, decision).await?;
            return Ok(TickOutcome::Closed(closed));
        }

        self.persist_update(&pending).await;
        self.bus.active_ping.emit(PingEvent {
            row: pending.clone(),
            when,
        });
        state.signal = Some(pending.clone());
        Ok(TickOutcome::Active(pending))
    }

    /// First write of the pending transition. A persistence failure refuses
    /// the transition: the signal stays scheduled and retries next tick.
    async fn persist_pending_transition(
        &self,
        symbol: &str,
        when: DateTime<Utc>,
        row: &mut SignalRow,
        state: &mut SymbolState,
    ) -> bool {
        if self.backtest {
            return true;
        }
        match self.store.write(row).await {
            Ok(()) => true,
            Err(e) => {
                self.emit_error(symbol, when, e.to_string());
                row.state = SignalState::Scheduled;
                row.pending_at = None;
                state.signal = Some(row.clone());
                false
            }
        }
    }

    /// Later row updates (milestones, stop moves) fall back to in-memory
    /// state when the adapter misbehaves.
    async fn persist_update(&self, row: &SignalRow) {
        if self.backtest {
            return;
        }
        if let Err(e) = self.store.write(row).await {
            warn!("failed to persist signal {} update: {}", row.id, e);
        }
    }

    /// Close out a signal: PnL, persistence clear, risk slot release,
    /// hooks, lifecycle event. Cancellations (never activated) carry a
    /// zero PnL since no position existed.
    async fn finalize(
        &self,
        state: &mut SymbolState,
        row: SignalRow,
        decision: CloseDecision,
    ) -> EngineResult<ClosedSignal> {
        let was_pending = row.pending_at.is_some();
        let pnl = if was_pending {
            pnl::compute(row.position, row.price_open, decision.price_close, &self.config)
        } else {
            SignalPnl {
                pnl_percentage: Decimal::ZERO,
                price_open_adjusted: row.price_open,
                price_close_adjusted: decision.price_close,
            }
        };

        let closed = ClosedSignal {
            row: row.clone(),
            close_timestamp: decision.at,
            close_reason: decision.reason,
            price_close: decision.price_close,
            pnl,
        };

        if !self.backtest {
            if let Err(e) = self.store.remove(&row.entity_id()).await {
                warn!("failed to clear persisted signal {}: {}", row.id, e);
            }
        }
        if was_pending {
            self.risk.register_close(&row).await;
        }
        if let Some(hooks) = &self.schema.hooks {
            hooks.on_close(&closed).await;
        }

        info!(
            "signal {} closed for {} ({}, pnl {:.4}%)",
            row.id, row.symbol, decision.reason, pnl.pnl_percentage
        );
        state.signal = None;

        let event = if was_pending {
            SignalEvent::Closed(closed.clone())
        } else {
            SignalEvent::Cancelled(closed.clone())
        };
        self.bus.publish_signal(event, self.backtest);
        Ok(closed)
    }

    fn emit_level_events(&self, row: &SignalRow, events: &[LevelEvent]) {
        for event in events {
            match event {
                LevelEvent::PartialProfit {
                    level,
                    pnl_percentage,
                    at,
                } => {
                    self.bus.partial_profit.emit(PartialEvent {
                        row: row.clone(),
                        level: *level,
                        pnl_percentage: *pnl_percentage,
                        when: *at,
                    });
                }
                LevelEvent::PartialLoss {
                    level,
                    pnl_percentage,
                    at,
                } => {
                    self.bus.partial_loss.emit(PartialEvent {
                        row: row.clone(),
                        level: *level,
                        pnl_percentage: *pnl_percentage,
                        when: *at,
                    });
                }
                LevelEvent::Breakeven {
                    price_stop_loss,
                    at,
                } => {
                    self.bus.breakeven.emit(BreakevenEvent {
                        row: row.clone(),
                        price_stop_loss: *price_stop_loss,
                        when: *at,
                    });
                }
            }
        }
    }

    fn emit_error(&self, symbol: &str, when: DateTime<Utc>, message: String) {
        warn!("{}/{}: {}", self.schema.name, symbol, message);
        self.bus.error.emit(ErrorEvent {
            symbol: Some(symbol.to_string()),
            strategy_name: Some(self.schema.name.clone()),
            message,
            when,
        });
    }

    fn emit_risk(&self, symbol: &str, when: DateTime<Utc>, reason: String) {
        debug!("{}/{} risk rejection: {}", self.schema.name, symbol, reason);
        self.bus.risk.emit(RiskEvent {
            symbol: symbol.to_string(),
            strategy_name: self.schema.name.clone(),
            reason,
            when,
        });
    }
}

fn within_tolerance(price_open: Decimal, current: Decimal, tolerance_pct: Decimal) -> bool {
    if current.is_zero() {
        return false;
    }
    ((price_open - current).abs() / current) * Decimal::from(100) <= tolerance_pct
}
