//! Persistence: crash-safe round-trips, refused transitions, restoration.

mod common;

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal_macros::dec;
use std::sync::Arc;

use common::{flat_series, t0, FixtureExchange, ScriptedStrategy};
use signalrunner::connection::Connections;
use signalrunner::context::{with_execution, ExecutionContext};
use signalrunner::error::{EngineError, EngineResult};
use signalrunner::events::EventBus;
use signalrunner::persistence::{FilePersistence, PersistenceAdapter, SignalStore};
use signalrunner::schema::{ExchangeSchema, Registries, StrategySchema};
use signalrunner::types::{SignalState, TickOutcome};
use signalrunner::{EngineConfig, Interval, PositionSide, SignalDto, SignalRow};

fn immediate_long() -> SignalDto {
    SignalDto {
        position: PositionSide::Long,
        price_open: None,
        price_take_profit: dec!(43000),
        price_stop_loss: dec!(41000),
        minute_estimated_time: 60,
        note: Some("market entry".to_string()),
        id: None,
    }
}

fn registries(dto: SignalDto) -> Arc<Registries> {
    let registries = Arc::new(Registries::new());
    registries
        .exchange
        .register(ExchangeSchema {
            name: "fixture".to_string(),
            api: Arc::new(FixtureExchange::single(
                "BTCUSDT",
                flat_series(35, dec!(42000)),
            )),
        })
        .unwrap();
    registries
        .strategy
        .register(StrategySchema {
            name: "scripted".to_string(),
            interval: Interval::M1,
            api: Arc::new(ScriptedStrategy::single("BTCUSDT", dto)),
            risk_name: None,
            trailing: None,
            hooks: None,
        })
        .unwrap();
    registries
}

fn connections(registries: Arc<Registries>, adapter: Arc<dyn PersistenceAdapter>) -> Arc<Connections> {
    Arc::new(Connections::new(
        registries,
        Arc::new(EngineConfig {
            candles_retry_delay_ms: 1,
            ..EngineConfig::default()
        }),
        EventBus::new(),
        Arc::new(SignalStore::new(adapter)),
    ))
}

fn live_ctx() -> ExecutionContext {
    ExecutionContext {
        symbol: "BTCUSDT".to_string(),
        when: t0(),
        backtest: false,
    }
}

/// Property 4: persist-and-restore reproduces every semantic field.
#[tokio::test]
async fn test_file_roundtrip_is_byte_equivalent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = SignalStore::new(Arc::new(FilePersistence::new(tmp.path(), "signal")));
    store.init(true).await.unwrap();

    let mut row = SignalRow::from_dto(
        immediate_long(),
        "BTCUSDT",
        "scripted",
        "fixture",
        "live",
        dec!(42000),
        t0(),
    );
    row.activate(t0() + Duration::minutes(1));
    row.total_executed = 3;
    row.executed_profit_levels = vec![10, 20, 30];
    row.breakeven_applied = true;

    store.write(&row).await.unwrap();
    let restored = store.read(&row.entity_id()).await.unwrap().unwrap();

    assert_eq!(
        serde_json::to_value(&row).unwrap(),
        serde_json::to_value(&restored).unwrap()
    );
}

mockall::mock! {
    Adapter {}

    #[async_trait]
    impl PersistenceAdapter for Adapter {
        async fn wait_for_init(&self, initial: bool) -> EngineResult<()>;
        async fn read_value(&self, entity_id: &str) -> EngineResult<Option<serde_json::Value>>;
        async fn has_value(&self, entity_id: &str) -> EngineResult<bool>;
        async fn write_value(&self, entity_id: &str, entity: serde_json::Value) -> EngineResult<()>;
        async fn remove_value(&self, entity_id: &str) -> EngineResult<()>;
        async fn keys(&self) -> EngineResult<Vec<String>>;
        async fn values(&self) -> EngineResult<Vec<serde_json::Value>>;
    }
}

/// A write failure refuses the pending transition: the signal stays
/// scheduled instead of opening without a durable record.
#[tokio::test]
async fn test_write_failure_refuses_pending_transition() {
    let mut adapter = MockAdapter::new();
    adapter.expect_wait_for_init().returning(|_| Ok(()));
    adapter.expect_read_value().returning(|_| Ok(None));
    adapter
        .expect_write_value()
        .returning(|_, _| Err(EngineError::PersistenceFailure("disk full".to_string())));

    let connections = connections(registries(immediate_long()), Arc::new(adapter));
    let strategy = connections
        .get_strategy("scripted", "fixture", "live", false)
        .unwrap();

    let outcome = with_execution(live_ctx(), strategy.tick("BTCUSDT")).await.unwrap();
    match outcome {
        TickOutcome::Scheduled(row) => {
            assert_eq!(row.state, SignalState::Scheduled);
            assert!(row.pending_at.is_none());
        }
        other => panic!("expected refused transition, got {:?}", other.kind()),
    }
}

/// Crash recovery: a fresh client for the same (strategy, symbol) restores
/// the persisted pending signal before its first tick.
#[tokio::test]
async fn test_restoration_after_restart() {
    let adapter: Arc<dyn PersistenceAdapter> =
        Arc::new(signalrunner::persistence::MemoryPersistence::new());
    let connections = connections(registries(immediate_long()), Arc::clone(&adapter));

    let strategy = connections
        .get_strategy("scripted", "fixture", "live", false)
        .unwrap();
    let outcome = with_execution(live_ctx(), strategy.tick("BTCUSDT")).await.unwrap();
    let opened = match outcome {
        TickOutcome::Opened(row) => row,
        other => panic!("expected open, got {:?}", other.kind()),
    };

    // Simulate a process restart: a new client instance over the same
    // adapter must rehydrate the record.
    connections.evict_strategy("scripted", "fixture", "live", false);
    let restarted = connections
        .get_strategy("scripted", "fixture", "live", false)
        .unwrap();
    restarted.wait_for_init("BTCUSDT").await.unwrap();

    let restored = restarted.current_signal("BTCUSDT").await.expect("signal restored");
    assert_eq!(restored.id, opened.id);
    assert_eq!(restored.state, SignalState::Pending);
    assert_eq!(restored.pending_at, opened.pending_at);
}
