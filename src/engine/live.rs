use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backtest::CancelHandle;
use crate::connection::Connections;
use crate::context::{self, ExecutionContext, MethodContext};
use crate::error::EngineResult;
use crate::types::{
    ClosedSignal, DoneEvent, ErrorEvent, ExitEvent, PerformanceEvent, SignalRow, TickOutcome,
};

/// Frame name recorded on live signal rows; live mode has no frame vector.
pub const LIVE_FRAME: &str = "live";

#[derive(Debug, Clone)]
pub struct LiveRequest {
    pub strategy_name: String,
    pub exchange_name: String,
}

/// Update yielded to the live consumer: only openings and closures; pings
/// and partials stay on the event bus.
#[derive(Debug, Clone)]
pub enum LiveUpdate {
    Opened(SignalRow),
    Closed(ClosedSignal),
}

/// Streaming handle over the infinite live loop.
pub struct LiveRun {
    rx: mpsc::Receiver<LiveUpdate>,
    cancel: CancelHandle,
    handle: JoinHandle<()>,
}

impl LiveRun {
    pub async fn next(&mut self) -> Option<LiveUpdate> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl futures_util::Stream for LiveRun {
    type Item = LiveUpdate;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Start the live polling loop for one (symbol, strategy) pair. Persisted
/// state is restored before the first tick; the loop survives recoverable
/// errors by sleeping one interval and trying again.
pub fn run(
    connections: Arc<Connections>,
    symbol: &str,
    request: LiveRequest,
) -> EngineResult<LiveRun> {
    let strategy = connections.get_strategy(
        &request.strategy_name,
        &request.exchange_name,
        LIVE_FRAME,
        false,
    )?;

    let bus = connections.bus().clone();
    let config = Arc::clone(connections.config());
    let symbol = symbol.to_string();
    let cancel = CancelHandle::new();
    let cancel_flag = cancel.clone();
    let (tx, rx) = mpsc::channel::<LiveUpdate>(8);

    let method_ctx = MethodContext {
        strategy_name: request.strategy_name.clone(),
        exchange_name: request.exchange_name.clone(),
        frame_name: LIVE_FRAME.to_string(),
        walker_name: None,
    };

    let handle = tokio::spawn(context::with_method(method_ctx, async move {
        info!("live loop starting for {}/{}", request.strategy_name, symbol);
        if let Err(e) = strategy.wait_for_init(&symbol).await {
            bus.exit.emit(ExitEvent {
                symbol: Some(symbol.clone()),
                strategy_name: Some(request.strategy_name.clone()),
                message: format!("live init failed: {}", e),
                when: Utc::now(),
            });
            return;
        }

        let interval = std::time::Duration::from_millis(config.tick_poll_interval_ms);
        loop {
            if cancel_flag.is_cancelled() {
                break;
            }

            let when = Utc::now();
            let exec = ExecutionContext {
                symbol: symbol.clone(),
                when,
                backtest: false,
            };

            let started = Instant::now();
            let outcome = context::with_execution(exec, strategy.tick(&symbol)).await;
            bus.performance.emit(PerformanceEvent {
                label: "live_tick".to_string(),
                symbol: symbol.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                when,
            });

            match outcome {
                Ok(TickOutcome::Opened(row)) => {
                    if tx.send(LiveUpdate::Opened(row)).await.is_err() {
                        break;
                    }
                }
                Ok(TickOutcome::Closed(closed)) | Ok(TickOutcome::Cancelled(closed)) => {
                    if tx.send(LiveUpdate::Closed(closed)).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "live tick for {}/{} failed: {}",
                        request.strategy_name, symbol, e
                    );
                    bus.error.emit(ErrorEvent {
                        symbol: Some(symbol.clone()),
                        strategy_name: Some(request.strategy_name.clone()),
                        message: e.to_string(),
                        when,
                    });
                }
                Err(e) => {
                    bus.exit.emit(ExitEvent {
                        symbol: Some(symbol.clone()),
                        strategy_name: Some(request.strategy_name.clone()),
                        message: e.to_string(),
                        when,
                    });
                    break;
                }
            }

            // A soft stop lets the current signal close naturally before
            // the loop winds down.
            if strategy.is_stopped(&symbol).await && !strategy.has_signal(&symbol).await {
                info!(
                    "live loop for {}/{} stopped after final close",
                    request.strategy_name, symbol
                );
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel_flag.cancelled() => break,
            }
        }

        bus.done_live.emit(DoneEvent {
            symbol: symbol.clone(),
            strategy_name: Some(request.strategy_name.clone()),
            exchange_name: Some(request.exchange_name.clone()),
            frame_name: None,
            walker_name: None,
            backtest: false,
            when: Utc::now(),
        });
        info!("live loop for {}/{} done", request.strategy_name, symbol);
    }));

    Ok(LiveRun { rx, cancel, handle })
}

/// Live loop with results observable only through the event bus.
pub fn background(
    connections: Arc<Connections>,
    symbol: &str,
    request: LiveRequest,
) -> EngineResult<CancelHandle> {
    let mut running = run(connections, symbol, request)?;
    let handle = running.cancel_handle();
    tokio::spawn(async move { while running.next().await.is_some() {} });
    Ok(handle)
}
