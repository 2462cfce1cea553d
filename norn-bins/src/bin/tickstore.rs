//! Tick store maintenance tool
//!
//! Inspect partitions, import CSV trade data, compress aged partitions and
//! print OHLCV bars.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use norn_bins::common::{date_to_micros, init_logging};
use norn_core::core::Side;
use norn_core::tickstore::{DataType, TickData, TickStore};

#[derive(Parser, Debug)]
#[command(name = "norn-tickstore", about = "Inspect and maintain tick partitions")]
struct Args {
    /// Tick store root directory
    #[arg(long, default_value = "data/ticks")]
    store: String,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-symbol partition counts and sizes
    Info,
    /// Import trades from CSV: timestamp_us,price,quantity,side
    Import {
        #[arg(long)]
        symbol: String,
        /// CSV file path
        #[arg(long)]
        file: String,
    },
    /// Gzip partitions older than the given age
    Compress {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Print OHLCV bars for a symbol and date range
    Ohlcv {
        #[arg(long)]
        symbol: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end: String,
        /// Bar interval: <n><s|m|h|d>
        #[arg(long, default_value = "1m")]
        interval: String,
    },
    /// Show the most recent trade tick for a symbol
    Latest {
        #[arg(long)]
        symbol: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, false);
    let mut store = TickStore::open(&args.store)?;

    match args.command {
        Command::Info => {
            let stats = store.storage_stats()?;
            if stats.is_empty() {
                println!("empty store at {}", args.store);
                return Ok(());
            }
            println!("{:<16} {:>10} {:>14}", "symbol", "partitions", "bytes");
            for (symbol, files, bytes) in stats {
                println!("{symbol:<16} {files:>10} {bytes:>14}");
            }
        }
        Command::Import { symbol, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {file}"))?;
            let mut ticks = Vec::new();
            for (line_no, line) in raw.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let fields: Vec<&str> = line.split(',').collect();
                if fields.len() != 4 {
                    anyhow::bail!("{file}:{}: expected 4 fields, got {}", line_no + 1, fields.len());
                }
                let timestamp_us: u64 = fields[0]
                    .trim()
                    .parse()
                    .with_context(|| format!("{file}:{}: bad timestamp", line_no + 1))?;
                let price: f64 = fields[1]
                    .trim()
                    .parse()
                    .with_context(|| format!("{file}:{}: bad price", line_no + 1))?;
                let quantity: f64 = fields[2]
                    .trim()
                    .parse()
                    .with_context(|| format!("{file}:{}: bad quantity", line_no + 1))?;
                let side = match fields[3].trim().to_uppercase().as_str() {
                    "BUY" | "B" | "0" => Side::Buy,
                    "SELL" | "S" | "1" => Side::Sell,
                    other => anyhow::bail!("{file}:{}: bad side {other:?}", line_no + 1),
                };
                ticks.push(TickData::trade(symbol.clone(), timestamp_us, price, quantity, side));
            }
            let count = ticks.len();
            store.write_ticks_batch(ticks)?;
            store.flush()?;
            println!("imported {count} trades into {symbol}");
        }
        Command::Compress { days } => {
            let compressed = store.compress_older_than(days, chrono::Utc::now())?;
            println!("compressed {compressed} partitions older than {days} days");
        }
        Command::Ohlcv {
            symbol,
            start,
            end,
            interval,
        } => {
            let start_us = date_to_micros(&start)?;
            let end_us = date_to_micros(&end)? + 86_400_000_000 - 1;
            let bars = store.query_ohlcv(&symbol, start_us, end_us, &interval)?;
            println!(
                "{:<20} {:>10} {:>10} {:>10} {:>10} {:>12} {:>10} {:>7}",
                "bar_start_us", "open", "high", "low", "close", "volume", "vwap", "trades"
            );
            for bar in bars {
                println!(
                    "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>12.4} {:>10.4} {:>7}",
                    bar.timestamp_us,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.vwap,
                    bar.trade_count
                );
            }
        }
        Command::Latest { symbol } => {
            match store.latest_tick(&symbol, DataType::Trade)? {
                Some(tick) => println!(
                    "{} {} {:?} @ {:?} x {:?}",
                    tick.timestamp_us, tick.symbol, tick.trade_side, tick.trade_price, tick.trade_size
                ),
                None => println!("no trades recorded for {symbol}"),
            }
        }
    }
    Ok(())
}
