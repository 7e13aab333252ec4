use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use signalrunner::connectors::BinanceMarketData;
use signalrunner::schema::{
    ExchangeSchema, FrameSchema, RiskContext, RiskPredicate, RiskSchema, SignalContext,
    StrategyApi, StrategySchema, WalkerMetric, WalkerSchema,
};
use signalrunner::{
    BacktestRequest, Engine, EngineConfig, Interval, LiveRequest, LiveUpdate, PositionSide,
    SignalDto, WalkerRequest,
};

#[derive(Parser)]
#[command(name = "signalrunner")]
#[command(version = "0.1.0")]
#[command(about = "Strategy signal lifecycle engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "signalrunner.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest the demo momentum strategy on historical data
    Backtest {
        /// Symbol, e.g. BTCUSDT
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: String,
        /// Print the markdown report after the run
        #[arg(long)]
        report: bool,
    },
    /// Run the demo momentum strategy against live market data
    Live {
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,
    },
    /// Compare the demo strategies over identical historical data
    Walker {
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Show the current average price for a symbol
    Price {
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,
    },
}

/// Demo momentum strategy: long when the fast SMA runs above the slow one.
struct SmaMomentum {
    fast: usize,
    slow: usize,
}

#[async_trait]
impl StrategyApi for SmaMomentum {
    async fn get_signal(&self, ctx: &SignalContext<'_>) -> Result<Option<SignalDto>> {
        let candles = ctx
            .market
            .candles(ctx.symbol, Interval::H1, self.slow + 1)
            .await?;
        if candles.len() < self.slow {
            return Ok(None);
        }

        let sma = |n: usize| -> Decimal {
            let tail = &candles[candles.len() - n..];
            tail.iter().map(|c| c.close).sum::<Decimal>() / Decimal::from(n as u64)
        };
        let fast = sma(self.fast);
        let slow = sma(self.slow);
        if fast <= slow * dec!(1.001) {
            return Ok(None);
        }

        let price = candles.last().map(|c| c.close).unwrap_or_default();
        Ok(Some(SignalDto {
            position: PositionSide::Long,
            price_open: None,
            price_take_profit: price * dec!(1.02),
            price_stop_loss: price * dec!(0.99),
            minute_estimated_time: 240,
            note: Some(format!("sma {:.2} > {:.2}", fast, slow)),
            id: None,
        }))
    }
}

/// Demo mean-reversion strategy: limit-buy dips below the rolling mean.
struct DipBuyer {
    lookback: usize,
}

#[async_trait]
impl StrategyApi for DipBuyer {
    async fn get_signal(&self, ctx: &SignalContext<'_>) -> Result<Option<SignalDto>> {
        let candles = ctx
            .market
            .candles(ctx.symbol, Interval::H1, self.lookback)
            .await?;
        if candles.len() < self.lookback {
            return Ok(None);
        }

        let mean =
            candles.iter().map(|c| c.close).sum::<Decimal>() / Decimal::from(candles.len() as u64);
        let last = candles.last().map(|c| c.close).unwrap_or_default();
        if last >= mean * dec!(0.995) {
            return Ok(None);
        }

        // Schedule the entry slightly below the current price.
        let entry = last * dec!(0.997);
        Ok(Some(SignalDto {
            position: PositionSide::Long,
            price_open: Some(entry),
            price_take_profit: mean,
            price_stop_loss: entry * dec!(0.985),
            minute_estimated_time: 480,
            note: Some("dip below rolling mean".to_string()),
            id: None,
        }))
    }
}

/// Demo risk rule: refuse entries whose stop is further than 5% away.
struct MaxStopDistance;

#[async_trait]
impl RiskPredicate for MaxStopDistance {
    async fn check(&self, ctx: &RiskContext<'_>) -> Result<()> {
        let distance = (ctx.row.price_open - ctx.row.price_stop_loss).abs() / ctx.row.price_open;
        if distance > dec!(0.05) {
            return Err(anyhow!("stop distance {:.2}% above 5%", distance * dec!(100)));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if std::path::Path::new(&cli.config).exists() {
        info!("loading config from {}", cli.config);
        EngineConfig::from_toml_file(&cli.config)?
    } else {
        EngineConfig::default()
    };

    match cli.command {
        Commands::Backtest {
            symbol,
            start,
            end,
            report,
        } => run_backtest(config, &symbol, &start, &end, report).await,
        Commands::Live { symbol } => run_live(config, &symbol).await,
        Commands::Walker { symbol, start, end } => run_walker(config, &symbol, &start, &end).await,
        Commands::Price { symbol } => show_price(config, &symbol).await,
    }
}

fn register_demo_schemas(engine: &Engine, start: &str, end: &str) -> Result<()> {
    engine.add_exchange(ExchangeSchema {
        name: "binance".to_string(),
        api: Arc::new(BinanceMarketData::new()),
    })?;
    engine.add_risk(RiskSchema {
        name: "tight-stops".to_string(),
        predicates: vec![Arc::new(MaxStopDistance)],
        max_concurrent_positions: Some(1),
    })?;
    engine.add_strategy(StrategySchema {
        name: "sma-momentum".to_string(),
        interval: Interval::H1,
        api: Arc::new(SmaMomentum { fast: 9, slow: 21 }),
        risk_name: Some("tight-stops".to_string()),
        trailing: None,
        hooks: None,
    })?;
    engine.add_strategy(StrategySchema {
        name: "dip-buyer".to_string(),
        interval: Interval::H1,
        api: Arc::new(DipBuyer { lookback: 24 }),
        risk_name: Some("tight-stops".to_string()),
        trailing: None,
        hooks: None,
    })?;
    engine.add_frame(FrameSchema {
        name: "cli".to_string(),
        interval: Interval::H1,
        start: parse_date(start)?,
        end: parse_date(end)?,
    })?;
    Ok(())
}

fn parse_date(raw: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
    Utc.from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
        .single()
        .ok_or_else(|| anyhow!("invalid date {}", raw))
}

async fn run_backtest(
    config: EngineConfig,
    symbol: &str,
    start: &str,
    end: &str,
    report: bool,
) -> Result<()> {
    let engine = Engine::in_memory(config);
    register_demo_schemas(&engine, start, end)?;

    engine.listen_backtest_progress(|progress| async move {
        if progress.processed_frames % 100 == 0 {
            info!(
                "progress {}/{} frames",
                progress.processed_frames, progress.total_frames
            );
        }
    });

    let mut run = engine.backtest(
        symbol,
        BacktestRequest {
            strategy_name: "sma-momentum".to_string(),
            exchange_name: "binance".to_string(),
            frame_name: "cli".to_string(),
        },
    )?;

    let mut count = 0usize;
    while let Some(closed) = run.next().await {
        count += 1;
        info!(
            "closed {} {} {} -> {} ({}, {:.4}%)",
            closed.row.symbol,
            closed.row.position,
            closed.row.price_open,
            closed.price_close,
            closed.close_reason,
            closed.pnl.pnl_percentage
        );
    }
    info!("backtest finished with {} closed signals", count);

    if report {
        println!("{}", engine.reports().markdown("sma-momentum"));
    }
    Ok(())
}

async fn run_live(config: EngineConfig, symbol: &str) -> Result<()> {
    let engine = Engine::new(config);
    // Live mode has no frame vector; a far-future frame keeps the schema
    // registry satisfied for the walker/backtest paths of this binary.
    register_demo_schemas(&engine, "2024-01-01", "2030-01-01")?;

    engine.listen_error(|error| async move {
        tracing::warn!("engine error: {}", error.message);
    });

    let mut run = engine.live(
        symbol,
        LiveRequest {
            strategy_name: "sma-momentum".to_string(),
            exchange_name: "binance".to_string(),
        },
    )?;

    info!("live loop running for {}; ctrl-c to stop", symbol);
    loop {
        tokio::select! {
            update = run.next() => match update {
                Some(LiveUpdate::Opened(row)) => {
                    info!("opened {} at {}", row.symbol, row.price_open);
                }
                Some(LiveUpdate::Closed(closed)) => {
                    info!(
                        "closed {} ({}, {:.4}%)",
                        closed.row.symbol, closed.close_reason, closed.pnl.pnl_percentage
                    );
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                run.cancel();
                break;
            }
        }
    }
    run.join().await;
    Ok(())
}

async fn run_walker(config: EngineConfig, symbol: &str, start: &str, end: &str) -> Result<()> {
    let engine = Engine::in_memory(config);
    register_demo_schemas(&engine, start, end)?;
    engine.add_walker(WalkerSchema {
        name: "demo".to_string(),
        strategies: vec!["sma-momentum".to_string(), "dip-buyer".to_string()],
        metric: WalkerMetric::SharpeRatio,
        exchange_name: "binance".to_string(),
        frame_name: "cli".to_string(),
    })?;

    engine.listen_done_walker(|done| async move {
        info!("walker finished for {}", done.symbol);
    });
    engine.events().walker_complete.subscribe(|complete| async move {
        println!(
            "{}",
            signalrunner::report::markdown::render_walker(&complete, "sharpe_ratio")
        );
    });

    let mut run = engine.walker(
        symbol,
        WalkerRequest {
            walker_name: "demo".to_string(),
        },
    )?;
    while let Some(progress) = run.next().await {
        info!(
            "[{}/{}] {} -> {:?} (best: {:?} {:?})",
            progress.strategies_tested,
            progress.total_strategies,
            progress.current_strategy,
            progress.metric_value,
            progress.best_strategy,
            progress.best_metric
        );
    }
    // Give the queued report listener a beat to print before returning.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    Ok(())
}

async fn show_price(config: EngineConfig, symbol: &str) -> Result<()> {
    let engine = Engine::in_memory(config);
    register_demo_schemas(&engine, "2024-01-01", "2024-01-02")?;

    // Price checks run under an ad-hoc live execution context.
    let method = signalrunner::context::MethodContext {
        strategy_name: "sma-momentum".to_string(),
        exchange_name: "binance".to_string(),
        frame_name: "cli".to_string(),
        walker_name: None,
    };
    let execution = signalrunner::context::ExecutionContext {
        symbol: symbol.to_string(),
        when: Utc::now(),
        backtest: false,
    };

    let symbol = symbol.to_string();
    signalrunner::context::with_method(method, async {
        signalrunner::context::with_execution(execution, async {
            let price = engine.get_average_price(&symbol).await?;
            let formatted = engine.format_price(&symbol, price)?;
            println!("{}: {}", symbol, formatted);
            Ok::<_, anyhow::Error>(())
        })
        .await
    })
    .await?;
    Ok(())
}
