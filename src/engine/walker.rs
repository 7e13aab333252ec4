use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backtest::{self, BacktestRequest, CancelHandle};
use crate::connection::Connections;
use crate::context::{self, MethodContext};
use crate::error::EngineResult;
use crate::report::StrategyReports;
use crate::types::{DoneEvent, WalkerComplete, WalkerProgress, WalkerStrategyResult};

#[derive(Debug, Clone)]
pub struct WalkerRequest {
    pub walker_name: String,
}

/// Streaming handle over a walker run: one progress record per strategy
/// tested, in order.
pub struct WalkerRun {
    rx: mpsc::Receiver<WalkerProgress>,
    cancel: CancelHandle,
    handle: JoinHandle<()>,
}

impl WalkerRun {
    pub async fn next(&mut self) -> Option<WalkerProgress> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn collect(mut self) -> Vec<WalkerProgress> {
        let mut progress = Vec::new();
        while let Some(record) = self.next().await {
            progress.push(record);
        }
        progress
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

impl futures_util::Stream for WalkerRun {
    type Item = WalkerProgress;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Run every strategy of the walker schema sequentially over identical
/// historical data and rank them by the configured metric. A strategy that
/// errors counts as a null metric and never aborts the walk.
pub fn run(
    connections: Arc<Connections>,
    symbol: &str,
    request: WalkerRequest,
) -> EngineResult<WalkerRun> {
    let schema = connections.registries().walker.get(&request.walker_name)?;
    // The shared exchange and frame must exist before the walk starts;
    // individual strategies are resolved lazily per iteration.
    connections.get_exchange(&schema.exchange_name)?;
    connections.get_frame(&schema.frame_name)?;

    let bus = connections.bus().clone();
    let symbol = symbol.to_string();
    let cancel = CancelHandle::new();
    let cancel_flag = cancel.clone();
    let (tx, rx) = mpsc::channel::<WalkerProgress>(1);

    let method_ctx = MethodContext {
        strategy_name: String::new(),
        exchange_name: schema.exchange_name.clone(),
        frame_name: schema.frame_name.clone(),
        walker_name: Some(request.walker_name.clone()),
    };

    let handle = tokio::spawn(context::with_method(method_ctx, async move {
        let reports = StrategyReports::new();
        for strategy_name in &schema.strategies {
            reports.clear(strategy_name);
        }

        let total_strategies = schema.strategies.len();
        let mut best_strategy: Option<String> = None;
        let mut best_metric: Option<f64> = None;
        let mut results: Vec<(String, Option<f64>)> = Vec::new();

        info!(
            "walker '{}' comparing {} strategies on {} by {}",
            request.walker_name, total_strategies, symbol, schema.metric
        );

        for (index, strategy_name) in schema.strategies.iter().enumerate() {
            if cancel_flag.is_cancelled() {
                break;
            }

            let metric_value = match backtest::run(
                Arc::clone(&connections),
                &symbol,
                BacktestRequest {
                    strategy_name: strategy_name.clone(),
                    exchange_name: schema.exchange_name.clone(),
                    frame_name: schema.frame_name.clone(),
                },
            ) {
                Ok(mut running) => {
                    while let Some(closed) = running.next().await {
                        reports.add(closed);
                    }
                    running.join().await;
                    reports.metric_value(strategy_name, schema.metric)
                }
                Err(e) => {
                    warn!(
                        "walker '{}' skipping strategy '{}': {}",
                        request.walker_name, strategy_name, e
                    );
                    None
                }
            };

            bus.walker.emit(WalkerStrategyResult {
                walker_name: request.walker_name.clone(),
                symbol: symbol.clone(),
                strategy_name: strategy_name.clone(),
                metric_value,
                closed_signals: reports.closed_count(strategy_name),
            });

            if let Some(value) = metric_value {
                let improved = match best_metric {
                    Some(best) => schema.metric.improves(value, best),
                    None => true,
                };
                if improved {
                    best_metric = Some(value);
                    best_strategy = Some(strategy_name.clone());
                }
            }
            results.push((strategy_name.clone(), metric_value));

            let progress = WalkerProgress {
                walker_name: request.walker_name.clone(),
                symbol: symbol.clone(),
                strategies_tested: index + 1,
                total_strategies,
                current_strategy: strategy_name.clone(),
                metric_value,
                best_strategy: best_strategy.clone(),
                best_metric,
            };
            bus.progress_walker.emit(progress.clone());
            if tx.send(progress).await.is_err() {
                break;
            }
        }

        bus.walker_complete.emit(WalkerComplete {
            walker_name: request.walker_name.clone(),
            symbol: symbol.clone(),
            best_strategy: best_strategy.clone(),
            best_metric,
            results,
        });
        bus.done_walker.emit(DoneEvent {
            symbol: symbol.clone(),
            strategy_name: None,
            exchange_name: Some(schema.exchange_name.clone()),
            frame_name: Some(schema.frame_name.clone()),
            walker_name: Some(request.walker_name.clone()),
            backtest: true,
            when: Utc::now(),
        });
        info!(
            "walker '{}' done; best {:?} ({:?})",
            request.walker_name, best_strategy, best_metric
        );
    }));

    Ok(WalkerRun { rx, cancel, handle })
}

/// Walker with progress observable only through the event bus.
pub fn background(
    connections: Arc<Connections>,
    symbol: &str,
    request: WalkerRequest,
) -> EngineResult<CancelHandle> {
    let mut running = run(connections, symbol, request)?;
    let handle = running.cancel_handle();
    tokio::spawn(async move { while running.next().await.is_some() {} });
    Ok(handle)
}
