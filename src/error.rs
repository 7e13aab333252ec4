use thiserror::Error;

/// Engine error taxonomy.
///
/// Recoverable errors are published to the `error` subject and the loop
/// proceeds; fatal errors go to the `exit` subject and terminate the task.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("risk rejected: {0}")]
    RiskRejected(String),

    #[error("candle anomaly for {symbol}: close {close} deviates {deviation_pct:.2}% from median {median}")]
    CandleAnomaly {
        symbol: String,
        close: rust_decimal::Decimal,
        median: rust_decimal::Decimal,
        deviation_pct: f64,
    },

    #[error("candle fetch failed for {symbol} after {attempts} attempts: {reason}")]
    CandleFetchFailed {
        symbol: String,
        attempts: u32,
        reason: String,
    },

    #[error("future candle data requested outside backtest mode")]
    FutureDataInLive,

    #[error("no {0} context active on this task")]
    ContextMissing(&'static str),

    #[error("{kind} schema '{name}' is not registered")]
    SchemaMissing { kind: &'static str, name: String },

    #[error("{kind} schema '{name}' is already registered")]
    DuplicateSchema { kind: &'static str, name: String },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("user {callback} callback failed: {reason}")]
    UserCallback { callback: &'static str, reason: String },
}

impl EngineError {
    /// Whether the loop may continue after publishing this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::FutureDataInLive
                | EngineError::ContextMissing(_)
                | EngineError::SchemaMissing { .. }
                | EngineError::DuplicateSchema { .. }
        )
    }

    pub fn user_callback(callback: &'static str, err: impl std::fmt::Display) -> Self {
        EngineError::UserCallback {
            callback,
            reason: err.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(EngineError::InvalidSignal("tp below entry".into()).is_recoverable());
        assert!(EngineError::RiskRejected("limit".into()).is_recoverable());
        assert!(EngineError::PersistenceFailure("disk".into()).is_recoverable());
        assert!(!EngineError::FutureDataInLive.is_recoverable());
        assert!(!EngineError::ContextMissing("execution").is_recoverable());
        assert!(!EngineError::SchemaMissing {
            kind: "strategy",
            name: "missing".into()
        }
        .is_recoverable());
    }
}
