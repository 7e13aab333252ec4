//! Walker comparator: sequential strategy ranking over identical data.

mod common;

use chrono::Duration;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

use common::{candle, flat, flat_series, settle, t0, FixtureExchange, ScriptedStrategy};
use signalrunner::schema::{
    ExchangeSchema, FrameSchema, StrategySchema, WalkerMetric, WalkerSchema,
};
use signalrunner::types::WalkerComplete;
use signalrunner::{Engine, EngineConfig, Interval, PositionSide, SignalDto, WalkerRequest};

fn long_dto(tp: rust_decimal::Decimal, sl: rust_decimal::Decimal) -> SignalDto {
    SignalDto {
        position: PositionSide::Long,
        price_open: Some(dec!(42000)),
        price_take_profit: tp,
        price_stop_loss: sl,
        minute_estimated_time: 60,
        note: None,
        id: None,
    }
}

/// Series where a long from 42000 either reaches 43000 (winner's target)
/// or first gives back to 41500 (loser's stop), depending on the levels.
fn shared_series() -> Vec<signalrunner::Candle> {
    let mut series = flat_series(35, dec!(42300));
    series.push(candle(
        t0() + Duration::minutes(5),
        dec!(42300),
        dec!(42400),
        dec!(41900),
        dec!(42000),
    ));
    for m in 6..10 {
        series.push(flat(t0() + Duration::minutes(m), dec!(42000)));
    }
    series.push(candle(
        t0() + Duration::minutes(10),
        dec!(42000),
        dec!(43100),
        dec!(41400),
        dec!(43000),
    ));
    for m in 11..=40 {
        series.push(flat(t0() + Duration::minutes(m), dec!(43000)));
    }
    series
}

fn walker_engine() -> Engine {
    let engine = Engine::in_memory(EngineConfig {
        candles_retry_delay_ms: 1,
        price_anomaly_threshold: 10.0,
        ..EngineConfig::default()
    });
    engine
        .add_exchange(ExchangeSchema {
            name: "fixture".to_string(),
            api: Arc::new(FixtureExchange::single("BTCUSDT", shared_series())),
        })
        .unwrap();
    engine
        .add_strategy(StrategySchema {
            name: "winner".to_string(),
            interval: Interval::M1,
            api: Arc::new(ScriptedStrategy::single(
                "BTCUSDT",
                long_dto(dec!(43000), dec!(40000)),
            )),
            risk_name: None,
            trailing: None,
            hooks: None,
        })
        .unwrap();
    engine
        .add_strategy(StrategySchema {
            name: "loser".to_string(),
            interval: Interval::M1,
            api: Arc::new(ScriptedStrategy::single(
                "BTCUSDT",
                long_dto(dec!(44000), dec!(41500)),
            )),
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
            end: t0() + Duration::minutes(40),
        })
        .unwrap();
    engine
        .add_walker(WalkerSchema {
            name: "compare".to_string(),
            // "ghost" is unregistered: it must count as a null metric
            // without aborting the walk.
            strategies: vec!["loser".to_string(), "ghost".to_string(), "winner".to_string()],
            metric: WalkerMetric::TotalPnl,
            exchange_name: "fixture".to_string(),
            frame_name: "window".to_string(),
        })
        .unwrap();
    engine
}

#[tokio::test]
async fn test_walker_ranks_strategies_and_tolerates_errors() {
    let engine = walker_engine();

    let complete: Arc<Mutex<Option<WalkerComplete>>> = Arc::new(Mutex::new(None));
    let complete_clone = Arc::clone(&complete);
    engine.events().walker_complete.subscribe(move |event| {
        let complete = Arc::clone(&complete_clone);
        async move {
            *complete.lock().unwrap() = Some(event);
        }
    });

    let run = engine
        .walker(
            "BTCUSDT",
            WalkerRequest {
                walker_name: "compare".to_string(),
            },
        )
        .unwrap();
    let progress = run.collect().await;
    settle().await;

    assert_eq!(progress.len(), 3);
    assert_eq!(progress[0].current_strategy, "loser");
    assert!(progress[0].metric_value.unwrap() < 0.0);
    assert_eq!(progress[0].best_strategy.as_deref(), Some("loser"));

    // The unregistered strategy reports no metric and keeps the best.
    assert_eq!(progress[1].current_strategy, "ghost");
    assert!(progress[1].metric_value.is_none());
    assert_eq!(progress[1].best_strategy.as_deref(), Some("loser"));

    assert_eq!(progress[2].current_strategy, "winner");
    assert!(progress[2].metric_value.unwrap() > 0.0);
    assert_eq!(progress[2].best_strategy.as_deref(), Some("winner"));

    // Running best never regresses for a higher-is-better metric.
    let bests: Vec<f64> = progress.iter().filter_map(|p| p.best_metric).collect();
    assert!(bests.windows(2).all(|w| w[1] >= w[0]));

    let complete = complete.lock().unwrap().clone().expect("walker completed");
    assert_eq!(complete.best_strategy.as_deref(), Some("winner"));
    assert_eq!(complete.results.len(), 3);
    assert_eq!(complete.results[1], ("ghost".to_string(), None));
}

#[tokio::test]
async fn test_walker_missing_schema_fails_fast() {
    let engine = walker_engine();
    assert!(engine
        .walker(
            "BTCUSDT",
            WalkerRequest {
                walker_name: "unknown".to_string(),
            },
        )
        .is_err());
}
