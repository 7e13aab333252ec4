pub mod backtest;
pub mod lifecycle;
pub mod live;
pub mod simulator;
pub mod strategy;
pub mod walker;

pub use backtest::{BacktestRequest, BacktestRun, CancelHandle};
pub use live::{LiveRequest, LiveRun, LiveUpdate};
pub use strategy::ClientStrategy;
pub use walker::{WalkerRequest, WalkerRun};
