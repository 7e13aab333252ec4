//! End-to-end lifecycle scenarios driven through the backtest loop.

mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{
    candle, fixture_engine, flat, flat_series, settle, t0, EventLog, FixtureExchange,
    ScriptedStrategy,
};
use signalrunner::types::SignalEvent;
use signalrunner::{BacktestRequest, CloseReason, PositionSide, SignalDto};

fn request() -> BacktestRequest {
    BacktestRequest {
        strategy_name: "scripted".to_string(),
        exchange_name: "fixture".to_string(),
        frame_name: "window".to_string(),
    }
}

fn long_dto(open: Decimal, tp: Decimal, sl: Decimal, minutes: i64) -> SignalDto {
    SignalDto {
        position: PositionSide::Long,
        price_open: Some(open),
        price_take_profit: tp,
        price_stop_loss: sl,
        minute_estimated_time: minutes,
        note: None,
        id: None,
    }
}

/// Scenario A: a long limit entry fills and takes profit on the same wide
/// candle; the close executes at the TP level with a positive PnL.
#[tokio::test]
async fn test_long_take_profit_on_single_candle() {
    let mut series = flat_series(35, dec!(42300));
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(42300),
        dec!(43000),
        dec!(41900),
        dec!(43000),
    ));
    for m in 6..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(43000)));
    }

    let engine = fixture_engine(
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(42000), dec!(43000), dec!(41000), 60)),
        40,
    );
    let log = EventLog::new();
    log.attach(&engine);

    let run = engine.backtest("BTCUSDT", request()).unwrap();
    let results = run.collect().await;
    settle().await;

    assert_eq!(results.len(), 1);
    let closed = &results[0];
    assert_eq!(closed.close_reason, CloseReason::TakeProfit);
    assert_eq!(closed.price_close, dec!(43000));
    assert!(closed.pnl.pnl_percentage > Decimal::ZERO);

    // Activation and close land on the same wide candle.
    let activation = t0() + Duration::minutes(5);
    assert_eq!(closed.row.pending_at, Some(activation));
    assert_eq!(closed.close_timestamp, activation);
    assert_eq!(closed.row.scheduled_at, t0());

    assert_eq!(log.kinds_for("BTCUSDT"), vec!["scheduled", "opened", "closed"]);
}

/// Scenario B: a short entry fills on a gap-up candle and stops out when a
/// later candle tags the stop level.
#[tokio::test]
async fn test_short_stop_loss_after_activation() {
    let mut series = flat_series(35, dec!(41000));
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(42900),
        dec!(43050),
        dec!(42800),
        dec!(42900),
    ));
    for m in 6..10 {
        series.push(flat(t0() + Duration::minutes(m), dec!(42900)));
    }
    series.push(candle(
        t0() + Duration::minutes(10),
        dec!(42900),
        dec!(44050),
        dec!(42850),
        dec!(43900),
    ));
    for m in 11..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(43900)));
    }

    let dto = SignalDto {
        position: PositionSide::Short,
        price_open: Some(dec!(43000)),
        price_take_profit: dec!(42000),
        price_stop_loss: dec!(44000),
        minute_estimated_time: 60,
        note: None,
        id: None,
    };
    let engine = fixture_engine(
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", dto),
        40,
    );
    let log = EventLog::new();
    log.attach(&engine);

    let results = engine.backtest("BTCUSDT", request()).unwrap().collect().await;
    settle().await;

    assert_eq!(results.len(), 1);
    let closed = &results[0];
    assert_eq!(closed.close_reason, CloseReason::StopLoss);
    assert_eq!(closed.price_close, dec!(44000));
    assert!(closed.pnl.pnl_percentage < Decimal::ZERO);
    assert_eq!(log.kinds_for("BTCUSDT"), vec!["scheduled", "opened", "closed"]);
}

/// Scenario C: an entry that never fills is cancelled once the schedule
/// await window elapses.
#[tokio::test]
async fn test_scheduled_timeout_cancellation() {
    let series = flat_series(240, dec!(42000));
    let engine = fixture_engine(
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(40000), dec!(41000), dec!(39000), 60)),
        200,
    );
    let log = EventLog::new();
    log.attach(&engine);

    let done = Arc::new(AtomicUsize::new(0));
    let done_clone = Arc::clone(&done);
    engine.listen_done_backtest(move |_| {
        let done = Arc::clone(&done_clone);
        async move {
            done.fetch_add(1, Ordering::SeqCst);
        }
    });

    // Cancellations are reported through events, not the result stream.
    let results = engine.backtest("BTCUSDT", request()).unwrap().collect().await;
    settle().await;
    assert!(results.is_empty());

    assert_eq!(log.kinds_for("BTCUSDT"), vec!["scheduled", "cancelled"]);
    let cancelled = match &log.all()[1] {
        SignalEvent::Cancelled(closed) => closed.clone(),
        other => panic!("expected cancellation, got {:?}", other),
    };
    assert_eq!(cancelled.close_reason, CloseReason::TimeExpired);
    let waited = cancelled.close_timestamp - cancelled.row.scheduled_at;
    assert!(waited >= Duration::minutes(119) && waited <= Duration::minutes(121));
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

/// Scenario D: partial-profit milestones fire once each, in ascending
/// order, before the take profit closes the signal.
#[tokio::test]
async fn test_partial_levels_emit_in_order() {
    let mut series = flat_series(35, dec!(1010));
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(1010),
        dec!(1012),
        dec!(999),
        dec!(1005),
    ));
    series.push(candle(
        t0() + Duration::minutes(6),
        dec!(1005),
        dec!(1125),
        dec!(1005),
        dec!(1120),
    ));
    series.push(candle(
        t0() + Duration::minutes(7),
        dec!(1120),
        dec!(1255),
        dec!(1120),
        dec!(1250),
    ));
    series.push(candle(
        t0() + Duration::minutes(8),
        dec!(1250),
        dec!(1355),
        dec!(1250),
        dec!(1350),
    ));
    series.push(candle(
        t0() + Duration::minutes(9),
        dec!(1350),
        dec!(1505),
        dec!(1350),
        dec!(1500),
    ));
    for m in 10..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(1500)));
    }

    let engine = fixture_engine(
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(1000), dec!(1500), dec!(500), 600)),
        40,
    );
    let log = EventLog::new();
    log.attach(&engine);

    let levels: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let levels_clone = Arc::clone(&levels);
    engine.listen_partial_profit(move |event| {
        let levels = Arc::clone(&levels_clone);
        async move {
            levels.lock().unwrap().push(event.level);
        }
    });

    let results = engine.backtest("BTCUSDT", request()).unwrap().collect().await;
    settle().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].close_reason, CloseReason::TakeProfit);
    assert_eq!(*levels.lock().unwrap(), vec![10, 20, 30]);
    assert_eq!(log.kinds_for("BTCUSDT"), vec!["scheduled", "opened", "closed"]);
}

/// Scenario E: two symbols run concurrently under one strategy name; each
/// receives exactly its own lifecycle, and both loops announce completion.
#[tokio::test]
async fn test_parallel_symbols_stay_isolated() {
    // BTC rallies to its target.
    let mut btc = flat_series(35, dec!(42300));
    btc.push(candle(
        t0() + Duration::minutes(5),
        dec!(42300),
        dec!(43000),
        dec!(41900),
        dec!(43000),
    ));
    for m in 6..=40 {
        btc.push(flat(t0() + Duration::minutes(m), dec!(43000)));
    }

    // ETH fills and bleeds to its stop.
    let mut eth = flat_series(35, dec!(3030));
    eth.push(candle(
        t0() + Duration::minutes(5),
        dec!(3030),
        dec!(3035),
        dec!(2995),
        dec!(3000),
    ));
    eth.push(candle(
        t0() + Duration::minutes(6),
        dec!(3000),
        dec!(3005),
        dec!(2890),
        dec!(2900),
    ));
    for m in 7..=40 {
        eth.push(flat(t0() + Duration::minutes(m), dec!(2900)));
    }

    let engine = fixture_engine(
        FixtureExchange::new(HashMap::from([
            ("BTCUSDT".to_string(), btc),
            ("ETHUSDT".to_string(), eth),
        ])),
        ScriptedStrategy::new(HashMap::from([
            (
                "BTCUSDT".to_string(),
                long_dto(dec!(42000), dec!(43000), dec!(41000), 60),
            ),
            (
                "ETHUSDT".to_string(),
                long_dto(dec!(3000), dec!(3200), dec!(2900), 60),
            ),
        ])),
        40,
    );
    let log = EventLog::new();
    log.attach(&engine);

    let done = Arc::new(AtomicUsize::new(0));
    let done_clone = Arc::clone(&done);
    engine.listen_done_backtest(move |_| {
        let done = Arc::clone(&done_clone);
        async move {
            done.fetch_add(1, Ordering::SeqCst);
        }
    });

    let btc_run = engine.backtest("BTCUSDT", request()).unwrap();
    let eth_run = engine.backtest("ETHUSDT", request()).unwrap();
    let (btc_results, eth_results) = tokio::join!(btc_run.collect(), eth_run.collect());
    settle().await;

    assert_eq!(btc_results.len(), 1);
    assert_eq!(btc_results[0].close_reason, CloseReason::TakeProfit);
    assert_eq!(btc_results[0].row.symbol, "BTCUSDT");

    assert_eq!(eth_results.len(), 1);
    assert_eq!(eth_results[0].close_reason, CloseReason::StopLoss);
    assert_eq!(eth_results[0].row.symbol, "ETHUSDT");

    assert_eq!(log.kinds_for("BTCUSDT"), vec!["scheduled", "opened", "closed"]);
    assert_eq!(log.kinds_for("ETHUSDT"), vec!["scheduled", "opened", "closed"]);
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

/// Scenario F: a signal with the target on the wrong side of the entry is
/// rejected before any lifecycle event fires.
#[tokio::test]
async fn test_invalid_signal_is_rejected() {
    let series = flat_series(120, dec!(41000));
    let engine = fixture_engine(
        FixtureExchange::single("BTCUSDT", series),
        // Take profit below the long entry.
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(41000), dec!(40000), dec!(39000), 60)),
        60,
    );
    let log = EventLog::new();
    log.attach(&engine);

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = Arc::clone(&errors);
    engine.listen_error(move |event| {
        let errors = Arc::clone(&errors_clone);
        async move {
            errors.lock().unwrap().push(event.message);
        }
    });

    let results = engine.backtest("BTCUSDT", request()).unwrap().collect().await;
    settle().await;

    assert!(results.is_empty());
    assert!(log.kinds_for("BTCUSDT").is_empty());
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("take profit"));
}

/// The wide-candle conflict books the stop under the conservative default;
/// the optimistic mode books the target instead.
#[tokio::test]
async fn test_conflicting_candle_respects_close_mode() {
    let mut series = flat_series(35, dec!(42300));
    // Entry, target and stop all inside one candle.
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(42300),
        dec!(43100),
        dec!(40900),
        dec!(42000),
    ));
    for m in 6..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(42000)));
    }

    // The scheduled-phase stop rule would cancel first; disable it to probe
    // the pending-phase conflict.
    let mut config = signalrunner::EngineConfig::default();
    config.cancel_scheduled_on_stop_loss = false;
    config.price_anomaly_threshold = 10.0;
    let engine_conservative = common::fixture_engine_with_config(
        config.clone(),
        FixtureExchange::single("BTCUSDT", series.clone()),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(42000), dec!(43000), dec!(41000), 60)),
        40,
    );

    let results = engine_conservative
        .backtest("BTCUSDT", request())
        .unwrap()
        .collect()
        .await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].close_reason, CloseReason::StopLoss);

    config.conservative_close = false;
    let engine_optimistic = common::fixture_engine_with_config(
        config,
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(42000), dec!(43000), dec!(41000), 60)),
        40,
    );
    let results = engine_optimistic
        .backtest("BTCUSDT", request())
        .unwrap()
        .collect()
        .await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].close_reason, CloseReason::TakeProfit);
}

/// Breakeven arms once, moves the stop to the cost-adjusted entry, and a
/// later retrace to the original stop level no longer books a loss.
#[tokio::test]
async fn test_breakeven_moves_stop_and_protects_entry() {
    let mut series = flat_series(35, dec!(1010));
    // Fill, rally well past the breakeven threshold, then fall back to the
    // cost-adjusted entry (but far above the original stop).
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(1010),
        dec!(1012),
        dec!(999),
        dec!(1005),
    ));
    series.push(candle(
        t0() + Duration::minutes(6),
        dec!(1005),
        dec!(1060),
        dec!(1005),
        dec!(1055),
    ));
    series.push(candle(
        t0() + Duration::minutes(7),
        dec!(1055),
        dec!(1056),
        dec!(1000),
        dec!(1001),
    ));
    for m in 8..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(1001)));
    }

    let engine = fixture_engine(
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(1000), dec!(1500), dec!(900), 600)),
        40,
    );

    let breakevens: Arc<Mutex<Vec<rust_decimal::Decimal>>> = Arc::new(Mutex::new(Vec::new()));
    let breakevens_clone = Arc::clone(&breakevens);
    engine.listen_breakeven(move |event| {
        let breakevens = Arc::clone(&breakevens_clone);
        async move {
            breakevens.lock().unwrap().push(event.price_stop_loss);
        }
    });

    let results = engine.backtest("BTCUSDT", request()).unwrap().collect().await;
    settle().await;

    // The retrace tags the moved stop: the signal closes at the adjusted
    // entry instead of riding down to the original 900 stop.
    assert_eq!(results.len(), 1);
    let closed = &results[0];
    assert_eq!(closed.close_reason, CloseReason::StopLoss);
    assert!(closed.price_close > dec!(1000));
    assert_eq!(closed.row.original_price_stop_loss, dec!(900));
    assert!(closed.row.price_stop_loss > dec!(1000));
    assert!(closed.row.breakeven_applied);

    let breakevens = breakevens.lock().unwrap();
    assert_eq!(breakevens.len(), 1, "breakeven is idempotent per signal");
    assert!(breakevens[0] > dec!(1000));
}

/// A configured trailing stop ratchets behind the favorable extreme and
/// converts a deep retrace into a profitable exit.
#[tokio::test]
async fn test_trailing_stop_tightens_and_exits() {
    let mut series = flat_series(35, dec!(1010));
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(1010),
        dec!(1012),
        dec!(999),
        dec!(1005),
    ));
    // Strong rally: trailing arms and drags the stop up to 1200 * 0.98.
    series.push(candle(
        t0() + Duration::minutes(6),
        dec!(1005),
        dec!(1200),
        dec!(1005),
        dec!(1195),
    ));
    // Retrace through the trailed stop.
    series.push(candle(
        t0() + Duration::minutes(7),
        dec!(1195),
        dec!(1196),
        dec!(1100),
        dec!(1105),
    ));
    for m in 8..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(1105)));
    }

    let mut config = signalrunner::EngineConfig::default();
    config.candles_retry_delay_ms = 1;
    config.price_anomaly_threshold = 10.0;
    let engine = common::fixture_engine_with_config(
        config,
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(1000), dec!(1500), dec!(900), 600)),
        40,
    );
    engine
        .override_strategy(
            "scripted",
            signalrunner::schema::StrategySchemaPatch {
                trailing: Some(signalrunner::schema::TrailingConfig {
                    activation_pct: dec!(5),
                    trail_pct: dec!(2),
                }),
                ..Default::default()
            },
        )
        .unwrap();

    let results = engine.backtest("BTCUSDT", request()).unwrap().collect().await;
    settle().await;

    assert_eq!(results.len(), 1);
    let closed = &results[0];
    assert_eq!(closed.close_reason, CloseReason::StopLoss);
    // Exit at the trailed level (1200 * 0.98 = 1176), locking in a gain.
    assert_eq!(closed.price_close, dec!(1176.00));
    assert!(closed.pnl.pnl_percentage > Decimal::ZERO);
}

/// A candle that tags the stop level before the entry ever fills cancels
/// the scheduled signal (pre-activation stop rule).
#[tokio::test]
async fn test_stop_cross_cancels_scheduled_signal() {
    let mut series = flat_series(35, dec!(42300));
    // Straight drop through the stop without lingering at the entry.
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(42300),
        dec!(42300),
        dec!(40900),
        dec!(41200),
    ));
    for m in 6..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(41200)));
    }

    let engine = fixture_engine(
        FixtureExchange::single("BTCUSDT", series),
        ScriptedStrategy::single("BTCUSDT", long_dto(dec!(42000), dec!(43000), dec!(41000), 60)),
        40,
    );
    let log = EventLog::new();
    log.attach(&engine);

    let results = engine.backtest("BTCUSDT", request()).unwrap().collect().await;
    settle().await;

    assert!(results.is_empty());
    assert_eq!(log.kinds_for("BTCUSDT"), vec!["scheduled", "cancelled"]);
    match &log.all()[1] {
        SignalEvent::Cancelled(closed) => {
            assert_eq!(closed.close_reason, CloseReason::StopLoss);
            assert!(closed.row.pending_at.is_none());
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
}
