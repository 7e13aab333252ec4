use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::strategy::ClientStrategy;
use crate::error::EngineResult;
use crate::events::EventBus;
use crate::levels::ClientPartial;
use crate::market::ClientExchange;
use crate::persistence::SignalStore;
use crate::risk::{self, ClientRisk};
use crate::schema::{FrameSchema, Registries};

/// Frame client: the resolved timeframe vector for a backtest period.
pub struct ClientFrame {
    schema: Arc<FrameSchema>,
}

impl ClientFrame {
    pub fn new(schema: Arc<FrameSchema>) -> Self {
        Self { schema }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn interval(&self) -> crate::types::Interval {
        self.schema.interval
    }

    pub fn timeframes(&self) -> Vec<chrono::DateTime<chrono::Utc>> {
        self.schema.timeframes()
    }
}

/// Memoized client instances, one per unique name tuple. Construction
/// happens under the cache lock (compute-once, cache until cleared).
pub struct Connections {
    registries: Arc<Registries>,
    config: Arc<EngineConfig>,
    bus: EventBus,
    store: Arc<SignalStore>,
    exchanges: Mutex<HashMap<String, Arc<ClientExchange>>>,
    frames: Mutex<HashMap<String, Arc<ClientFrame>>>,
    risks: Mutex<HashMap<String, Arc<ClientRisk>>>,
    partials: Mutex<HashMap<String, Arc<ClientPartial>>>,
    strategies: Mutex<HashMap<String, Arc<ClientStrategy>>>,
}

fn mode_str(backtest: bool) -> &'static str {
    if backtest {
        "backtest"
    } else {
        "live"
    }
}

impl Connections {
    pub fn new(
        registries: Arc<Registries>,
        config: Arc<EngineConfig>,
        bus: EventBus,
        store: Arc<SignalStore>,
    ) -> Self {
        Self {
            registries,
            config,
            bus,
            store,
            exchanges: Mutex::new(HashMap::new()),
            frames: Mutex::new(HashMap::new()),
            risks: Mutex::new(HashMap::new()),
            partials: Mutex::new(HashMap::new()),
            strategies: Mutex::new(HashMap::new()),
        }
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn get_exchange(&self, name: &str) -> EngineResult<Arc<ClientExchange>> {
        let mut cache = self.exchanges.lock().expect("exchange cache lock poisoned");
        if let Some(client) = cache.get(name) {
            return Ok(Arc::clone(client));
        }
        let schema = self.registries.exchange.get(name)?;
        let client = Arc::new(ClientExchange::new(schema, Arc::clone(&self.config)));
        debug!("built exchange client '{}'", name);
        cache.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub fn get_frame(&self, name: &str) -> EngineResult<Arc<ClientFrame>> {
        let mut cache = self.frames.lock().expect("frame cache lock poisoned");
        if let Some(client) = cache.get(name) {
            return Ok(Arc::clone(client));
        }
        let schema = self.registries.frame.get(name)?;
        let client = Arc::new(ClientFrame::new(schema));
        cache.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Risk clients are keyed by the full tuple so backtests never share a
    /// position ledger with live runs.
    pub fn get_risk(
        &self,
        risk_name: Option<&str>,
        exchange_name: &str,
        frame_name: &str,
        backtest: bool,
    ) -> EngineResult<Arc<ClientRisk>> {
        let resolved_name = risk_name.unwrap_or("unrestricted");
        let key = format!(
            "{}:{}:{}:{}",
            resolved_name,
            exchange_name,
            frame_name,
            mode_str(backtest)
        );
        let mut cache = self.risks.lock().expect("risk cache lock poisoned");
        if let Some(client) = cache.get(&key) {
            return Ok(Arc::clone(client));
        }
        let schema = match risk_name {
            Some(name) => self.registries.risk.get(name)?,
            None => Arc::new(risk::permissive_schema(resolved_name)),
        };
        let client = Arc::new(ClientRisk::new(schema));
        debug!("built risk client '{}'", key);
        cache.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub fn get_partial(
        &self,
        strategy_name: &str,
        backtest: bool,
    ) -> EngineResult<Arc<ClientPartial>> {
        let key = format!("{}:{}", strategy_name, mode_str(backtest));
        let mut cache = self.partials.lock().expect("partial cache lock poisoned");
        if let Some(client) = cache.get(&key) {
            return Ok(Arc::clone(client));
        }
        let schema = self.registries.strategy.get(strategy_name)?;
        let client = Arc::new(ClientPartial::new(Arc::clone(&self.config), schema.trailing));
        cache.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub fn get_strategy(
        &self,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
        backtest: bool,
    ) -> EngineResult<Arc<ClientStrategy>> {
        let key = format!(
            "{}:{}:{}:{}",
            strategy_name,
            exchange_name,
            frame_name,
            mode_str(backtest)
        );
        {
            let cache = self.strategies.lock().expect("strategy cache lock poisoned");
            if let Some(client) = cache.get(&key) {
                return Ok(Arc::clone(client));
            }
        }

        // Resolve dependencies before taking the cache lock again; each
        // resolution may build and cache its own client.
        let schema = self.registries.strategy.get(strategy_name)?;
        let exchange = self.get_exchange(exchange_name)?;
        let risk = self.get_risk(schema.risk_name.as_deref(), exchange_name, frame_name, backtest)?;
        let partial = self.get_partial(strategy_name, backtest)?;

        let mut cache = self.strategies.lock().expect("strategy cache lock poisoned");
        if let Some(client) = cache.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(ClientStrategy::new(
            schema,
            frame_name.to_string(),
            exchange,
            risk,
            partial,
            Arc::clone(&self.store),
            self.bus.clone(),
            Arc::clone(&self.config),
            backtest,
        ));
        debug!("built strategy client '{}'", key);
        cache.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Evict a single strategy client (and nothing else).
    pub fn evict_strategy(
        &self,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
        backtest: bool,
    ) {
        let key = format!(
            "{}:{}:{}:{}",
            strategy_name,
            exchange_name,
            frame_name,
            mode_str(backtest)
        );
        self.strategies
            .lock()
            .expect("strategy cache lock poisoned")
            .remove(&key);
    }

    /// Drop every memoized client. Schemas are untouched.
    pub fn clear(&self) {
        self.exchanges.lock().expect("exchange cache lock poisoned").clear();
        self.frames.lock().expect("frame cache lock poisoned").clear();
        self.risks.lock().expect("risk cache lock poisoned").clear();
        self.partials.lock().expect("partial cache lock poisoned").clear();
        self.strategies.lock().expect("strategy cache lock poisoned").clear();
    }
}
