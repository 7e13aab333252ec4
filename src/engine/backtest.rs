use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connections;
use crate::context::{self, ExecutionContext, MethodContext};
use crate::error::EngineResult;
use crate::types::{
    BacktestProgress, ClosedSignal, DoneEvent, ErrorEvent, ExitEvent, Interval, TickOutcome,
};

/// Cooperative cancellation for a background loop: flips a flag observed at
/// the next iteration boundary and wakes any loop parked on a sleep.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
}

/// Streaming handle over a running backtest: a lazy, finite sequence of
/// closed signals in ascending close order. Dropping the handle (or calling
/// `cancel`) stops the producer at its next suspension point.
pub struct BacktestRun {
    rx: mpsc::Receiver<ClosedSignal>,
    cancel: CancelHandle,
    handle: JoinHandle<()>,
}

impl BacktestRun {
    pub async fn next(&mut self) -> Option<ClosedSignal> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drain the remaining results.
    pub async fn collect(mut self) -> Vec<ClosedSignal> {
        let mut results = Vec::new();
        while let Some(closed) = self.next().await {
            results.push(closed);
        }
        results
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl futures_util::Stream for BacktestRun {
    type Item = ClosedSignal;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Start a backtest for one (symbol, strategy) pair. Schema references are
/// resolved eagerly so missing registrations fail here, not mid-run.
pub fn run(
    connections: Arc<Connections>,
    symbol: &str,
    request: BacktestRequest,
) -> EngineResult<BacktestRun> {
    let strategy = connections.get_strategy(
        &request.strategy_name,
        &request.exchange_name,
        &request.frame_name,
        true,
    )?;
    let exchange = connections.get_exchange(&request.exchange_name)?;
    let frame = connections.get_frame(&request.frame_name)?;

    let bus = connections.bus().clone();
    let config = Arc::clone(connections.config());
    let symbol = symbol.to_string();
    let cancel = CancelHandle::new();
    let cancel_flag = cancel.clone();
    // Capacity 1 keeps the producer demand-driven: it parks on send until
    // the consumer asks for the next closed signal.
    let (tx, rx) = mpsc::channel::<ClosedSignal>(1);

    let method_ctx = MethodContext {
        strategy_name: request.strategy_name.clone(),
        exchange_name: request.exchange_name.clone(),
        frame_name: request.frame_name.clone(),
        walker_name: None,
    };

    let handle = tokio::spawn(context::with_method(method_ctx, async move {
        let frames = frame.timeframes();
        let total_frames = frames.len();
        info!(
            "backtest {}/{} over {} frames",
            request.strategy_name, symbol, total_frames
        );

        let mut i = 0;
        while i < total_frames {
            if cancel_flag.is_cancelled() {
                debug!("backtest {}/{} cancelled", request.strategy_name, symbol);
                break;
            }
            let when = frames[i];
            bus.progress_backtest.emit(BacktestProgress {
                symbol: symbol.clone(),
                strategy_name: request.strategy_name.clone(),
                processed_frames: i,
                total_frames,
            });

            let exec = ExecutionContext {
                symbol: symbol.clone(),
                when,
                backtest: true,
            };

            let outcome = context::with_execution(exec.clone(), strategy.tick(&symbol)).await;
            match outcome {
                Ok(TickOutcome::Scheduled(row)) | Ok(TickOutcome::Opened(row)) => {
                    let scheduled = row.pending_at.is_none();
                    let window = row.minute_estimated_time
                        + if scheduled { config.schedule_await_min } else { 0 }
                        + 2;
                    let simulated = context::with_execution(exec.clone(), async {
                        let candles = exchange
                            .get_next_candles(&symbol, Interval::M1, window as usize)
                            .await?;
                        strategy.backtest(&symbol, &candles).await
                    })
                    .await;

                    match simulated {
                        Ok(closed) => {
                            let close_timestamp = closed.close_timestamp;
                            if !closed.was_cancelled() && tx.send(closed).await.is_err() {
                                debug!("backtest consumer dropped; stopping {}", symbol);
                                break;
                            }
                            // Skip ahead past the simulated window.
                            while i < total_frames && frames[i] <= close_timestamp {
                                i += 1;
                            }
                        }
                        Err(e) => {
                            abort(&bus, &symbol, &request.strategy_name, e);
                            break;
                        }
                    }
                }
                Ok(TickOutcome::Closed(closed)) => {
                    if tx.send(closed).await.is_err() {
                        break;
                    }
                    i += 1;
                }
                Ok(_) => {
                    i += 1;
                }
                Err(e) => {
                    abort(&bus, &symbol, &request.strategy_name, e);
                    break;
                }
            }
        }

        bus.done_backtest.emit(DoneEvent {
            symbol: symbol.clone(),
            strategy_name: Some(request.strategy_name.clone()),
            exchange_name: Some(request.exchange_name.clone()),
            frame_name: Some(request.frame_name.clone()),
            walker_name: None,
            backtest: true,
            when: Utc::now(),
        });
        info!("backtest {}/{} done", request.strategy_name, symbol);
    }));

    Ok(BacktestRun { rx, cancel, handle })
}

/// Start a backtest whose results are observable only through the event
/// bus; returns the cancellation handle.
pub fn background(
    connections: Arc<Connections>,
    symbol: &str,
    request: BacktestRequest,
) -> EngineResult<CancelHandle> {
    let mut running = run(connections, symbol, request)?;
    let handle = running.cancel_handle();
    tokio::spawn(async move { while running.next().await.is_some() {} });
    Ok(handle)
}

/// A tick error ends the backtest for this symbol only: recoverable causes
/// are reported on `error`, and the task exit is always announced.
fn abort(
    bus: &crate::events::EventBus,
    symbol: &str,
    strategy_name: &str,
    e: crate::error::EngineError,
) {
    warn!("backtest {}/{} aborted: {}", strategy_name, symbol, e);
    let when = Utc::now();
    if e.is_recoverable() {
        bus.error.emit(ErrorEvent {
            symbol: Some(symbol.to_string()),
            strategy_name: Some(strategy_name.to_string()),
            message: e.to_string(),
            when,
        });
    }
    bus.exit.emit(ExitEvent {
        symbol: Some(symbol.to_string()),
        strategy_name: Some(strategy_name.to_string()),
        message: e.to_string(),
        when,
    });
}
