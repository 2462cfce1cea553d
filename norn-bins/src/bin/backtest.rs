//! Backtest runner
//!
//! Replays a symbol's recorded ticks through the backtest engine with the
//! order-flow imbalance strategy and prints the metrics table.

use anyhow::{bail, Context, Result};
use clap::Parser;
use norn_bins::common::{date_to_micros, init_logging, parse_date};
use norn_core::backtest::{BacktestConfig, BacktestEngine};
use norn_core::risk::{RiskLimits, RiskManager};
use norn_core::tickstore::TickStore;
use norn_strategies::{OrderFlowConfig, OrderFlowImbalanceStrategy};
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(name = "norn-backtest", about = "Replay recorded ticks through the simulator")]
struct Args {
    /// Tick store root directory
    #[arg(long, default_value = "data/ticks")]
    store: String,

    /// Instrument symbol to replay
    #[arg(long)]
    symbol: String,

    /// Start date (YYYY-MM-DD, inclusive)
    #[arg(long)]
    start: String,

    /// End date (YYYY-MM-DD, inclusive)
    #[arg(long)]
    end: String,

    /// Initial capital
    #[arg(long, default_value = "1000000")]
    capital: Decimal,

    /// Backtest config as JSON (overrides the defaults)
    #[arg(long)]
    config: Option<String>,

    /// Seed for the slippage noise generator
    #[arg(long)]
    seed: Option<u64>,

    /// Route orders through the pre-trade risk gate
    #[arg(long, default_value_t = true)]
    risk_gate: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    let start = parse_date(&args.start)?;
    // End bound is inclusive: run through the end of that calendar day
    let end = parse_date(&args.end)? + chrono::Duration::days(1) - chrono::Duration::microseconds(1);

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {path}"))?;
            serde_json::from_str::<BacktestConfig>(&raw)
                .with_context(|| format!("parsing config {path}"))?
        }
        None => BacktestConfig::new(start, end, args.capital),
    };
    config.start_date = start;
    config.end_date = end;
    config.initial_capital = args.capital;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let mut store = TickStore::open(&args.store)?;
    let ticks = store.query_ticks(
        &args.symbol,
        date_to_micros(&args.start)?,
        end.timestamp_micros() as u64,
        None,
    )?;
    if ticks.is_empty() {
        bail!(
            "no ticks for {} in [{}, {}] under {}",
            args.symbol,
            args.start,
            args.end,
            args.store
        );
    }
    tracing::info!(symbol = %args.symbol, ticks = ticks.len(), "tick data loaded");

    let mut engine = BacktestEngine::new(config);
    if args.risk_gate {
        engine = engine.with_risk_manager(RiskManager::new(RiskLimits::default(), args.capital));
    }

    let mut strategy = OrderFlowImbalanceStrategy::new(OrderFlowConfig::new(args.symbol.clone()));
    let result = engine.run(ticks, &mut strategy);

    print!("{}", result.render_table());
    Ok(())
}
