use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::schema::{RiskContext, RiskSchema};
use crate::types::SignalRow;

/// Risk client: ordered validation predicates plus a ledger of pending
/// positions. A scheduled signal holds no slot; slots are taken on
/// activation and released on closure.
pub struct ClientRisk {
    schema: Arc<RiskSchema>,
    open_positions: Mutex<HashSet<String>>,
}

impl ClientRisk {
    pub fn new(schema: Arc<RiskSchema>) -> Self {
        Self {
            schema,
            open_positions: Mutex::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Evaluate the candidate against the concurrency limit and every
    /// predicate in registration order. The first failure rejects.
    pub async fn check_signal(
        &self,
        row: &SignalRow,
        when: chrono::DateTime<chrono::Utc>,
        backtest: bool,
    ) -> EngineResult<()> {
        let active_positions = self.open_positions.lock().await.len();

        if let Some(max) = self.schema.max_concurrent_positions {
            if active_positions >= max {
                return Err(EngineError::RiskRejected(format!(
                    "{} concurrent positions reached (max {})",
                    active_positions, max
                )));
            }
        }

        let ctx = RiskContext {
            row,
            when,
            backtest,
            active_positions,
        };
        for predicate in &self.schema.predicates {
            predicate
                .check(&ctx)
                .await
                .map_err(|e| EngineError::RiskRejected(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn register_open(&self, row: &SignalRow) {
        let mut open = self.open_positions.lock().await;
        open.insert(row.entity_id());
        debug!(
            "risk '{}' tracking {} open positions",
            self.schema.name,
            open.len()
        );
    }

    pub async fn register_close(&self, row: &SignalRow) {
        self.open_positions.lock().await.remove(&row.entity_id());
    }

    pub async fn open_position_count(&self) -> usize {
        self.open_positions.lock().await.len()
    }
}

/// Pass-through used when a strategy declares no risk schema.
pub fn permissive_schema(name: &str) -> RiskSchema {
    RiskSchema {
        name: name.to_string(),
        predicates: Vec::new(),
        max_concurrent_positions: None,
    }
}
