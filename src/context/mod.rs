//! Ambient per-task contexts.
//!
//! Strategy and exchange callbacks run inside two task-local scopes: the
//! method context (which schemas are executing) and the execution context
//! (symbol, timestamp, mode). Scopes nest; an inner scope shadows the outer
//! one and is popped on every exit path because the scoping is structural.
//! Parallel tasks never share frames.

use chrono::{DateTime, Utc};
use std::future::Future;

use crate::error::{EngineError, EngineResult};

/// Which schemas the current call chain is executing under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodContext {
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
    pub walker_name: Option<String>,
}

/// Where and when the current tick is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub symbol: String,
    pub when: DateTime<Utc>,
    pub backtest: bool,
}

tokio::task_local! {
    static METHOD_CTX: MethodContext;
    static EXECUTION_CTX: ExecutionContext;
}

/// Run `fut` with `ctx` as the ambient method context.
pub async fn with_method<F: Future>(ctx: MethodContext, fut: F) -> F::Output {
    METHOD_CTX.scope(ctx, fut).await
}

/// Run `fut` with `ctx` as the ambient execution context.
pub async fn with_execution<F: Future>(ctx: ExecutionContext, fut: F) -> F::Output {
    EXECUTION_CTX.scope(ctx, fut).await
}

/// Current method context, or `ContextMissing` outside a frame.
pub fn method() -> EngineResult<MethodContext> {
    METHOD_CTX
        .try_with(|ctx| ctx.clone())
        .map_err(|_| EngineError::ContextMissing("method"))
}

/// Current execution context, or `ContextMissing` outside a frame.
pub fn execution() -> EngineResult<ExecutionContext> {
    EXECUTION_CTX
        .try_with(|ctx| ctx.clone())
        .map_err(|_| EngineError::ContextMissing("execution"))
}

/// Timestamp of the current tick.
pub fn now() -> EngineResult<DateTime<Utc>> {
    execution().map(|ctx| ctx.when)
}

/// Whether the current task runs in backtest mode.
pub fn is_backtest() -> EngineResult<bool> {
    execution().map(|ctx| ctx.backtest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn method_ctx(strategy: &str) -> MethodContext {
        MethodContext {
            strategy_name: strategy.to_string(),
            exchange_name: "binance".to_string(),
            frame_name: "q1".to_string(),
            walker_name: None,
        }
    }

    fn execution_ctx(symbol: &str) -> ExecutionContext {
        ExecutionContext {
            symbol: symbol.to_string(),
            when: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            backtest: true,
        }
    }

    #[tokio::test]
    async fn test_accessors_fail_outside_frame() {
        assert!(matches!(method(), Err(EngineError::ContextMissing("method"))));
        assert!(matches!(
            execution(),
            Err(EngineError::ContextMissing("execution"))
        ));
    }

    #[tokio::test]
    async fn test_scope_provides_and_pops() {
        with_method(method_ctx("momo"), async {
            assert_eq!(method().unwrap().strategy_name, "momo");
        })
        .await;
        assert!(method().is_err());
    }

    #[tokio::test]
    async fn test_nested_scope_shadows() {
        with_execution(execution_ctx("BTCUSDT"), async {
            assert_eq!(execution().unwrap().symbol, "BTCUSDT");
            with_execution(execution_ctx("ETHUSDT"), async {
                assert_eq!(execution().unwrap().symbol, "ETHUSDT");
            })
            .await;
            assert_eq!(execution().unwrap().symbol, "BTCUSDT");
        })
        .await;
    }

    #[tokio::test]
    async fn test_parallel_tasks_do_not_leak() {
        let a = tokio::spawn(with_execution(execution_ctx("BTCUSDT"), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            execution().unwrap().symbol
        }));
        let b = tokio::spawn(with_execution(execution_ctx("ETHUSDT"), async {
            execution().unwrap().symbol
        }));
        assert_eq!(a.await.unwrap(), "BTCUSDT");
        assert_eq!(b.await.unwrap(), "ETHUSDT");
    }

    #[tokio::test]
    async fn test_pop_on_panic_path() {
        let result = tokio::spawn(with_method(method_ctx("momo"), async {
            panic!("boom");
        }))
        .await;
        assert!(result.is_err());
        assert!(method().is_err());
    }
}
