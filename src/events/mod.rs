pub mod subject;

pub use subject::{Subject, Subscription};

use crate::types::{
    BacktestProgress, BreakevenEvent, DoneEvent, ErrorEvent, ExitEvent, PartialEvent,
    PerformanceEvent, PingEvent, RiskEvent, SignalEvent, WalkerComplete, WalkerProgress,
    WalkerStrategyResult,
};

/// All engine subjects. Ordering is guaranteed within a subject, never
/// across subjects.
pub struct EventBus {
    /// Every lifecycle event regardless of mode.
    pub signal: Subject<SignalEvent>,
    pub signal_backtest: Subject<SignalEvent>,
    pub signal_live: Subject<SignalEvent>,
    pub done_backtest: Subject<DoneEvent>,
    pub done_live: Subject<DoneEvent>,
    pub done_walker: Subject<DoneEvent>,
    pub progress_backtest: Subject<BacktestProgress>,
    pub progress_walker: Subject<WalkerProgress>,
    pub performance: Subject<PerformanceEvent>,
    pub partial_profit: Subject<PartialEvent>,
    pub partial_loss: Subject<PartialEvent>,
    pub breakeven: Subject<BreakevenEvent>,
    pub schedule_ping: Subject<PingEvent>,
    pub active_ping: Subject<PingEvent>,
    pub risk: Subject<RiskEvent>,
    pub walker: Subject<WalkerStrategyResult>,
    pub walker_complete: Subject<WalkerComplete>,
    pub error: Subject<ErrorEvent>,
    pub exit: Subject<ExitEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            signal: Subject::new("signal"),
            signal_backtest: Subject::new("signal_backtest"),
            signal_live: Subject::new("signal_live"),
            done_backtest: Subject::new("done_backtest"),
            done_live: Subject::new("done_live"),
            done_walker: Subject::new("done_walker"),
            progress_backtest: Subject::new("progress_backtest"),
            progress_walker: Subject::new("progress_walker"),
            performance: Subject::new("performance"),
            partial_profit: Subject::new("partial_profit"),
            partial_loss: Subject::new("partial_loss"),
            breakeven: Subject::new("breakeven"),
            schedule_ping: Subject::new("schedule_ping"),
            active_ping: Subject::new("active_ping"),
            risk: Subject::new("risk"),
            walker: Subject::new("walker"),
            walker_complete: Subject::new("walker_complete"),
            error: Subject::new("error"),
            exit: Subject::new("exit"),
        }
    }

    /// Publish a lifecycle event to `signal` plus the mode-specific subject.
    pub fn publish_signal(&self, event: SignalEvent, backtest: bool) {
        self.signal.emit(event.clone());
        if backtest {
            self.signal_backtest.emit(event);
        } else {
            self.signal_live.emit(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            signal_backtest: self.signal_backtest.clone(),
            signal_live: self.signal_live.clone(),
            done_backtest: self.done_backtest.clone(),
            done_live: self.done_live.clone(),
            done_walker: self.done_walker.clone(),
            progress_backtest: self.progress_backtest.clone(),
            progress_walker: self.progress_walker.clone(),
            performance: self.performance.clone(),
            partial_profit: self.partial_profit.clone(),
            partial_loss: self.partial_loss.clone(),
            breakeven: self.breakeven.clone(),
            schedule_ping: self.schedule_ping.clone(),
            active_ping: self.active_ping.clone(),
            risk: self.risk.clone(),
            walker: self.walker.clone(),
            walker_complete: self.walker_complete.clone(),
            error: self.error.clone(),
            exit: self.exit.clone(),
        }
    }
}
