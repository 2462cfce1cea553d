use crate::core::StoreError;
use crate::tickstore::codec::{DataType, TickData};
use serde::{Deserialize, Serialize};

/// OHLCV bar aggregated from trade ticks.
///
/// `vwap` is the size-weighted mean trade price within the bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub symbol: String,
    /// Bar start, microseconds since epoch, floored to the interval
    pub timestamp_us: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: f64,
    pub trade_count: u32,
}

/// Parse an interval of the form `<n><unit>` with unit in {s, m, h, d}
/// into seconds.
pub fn parse_interval(interval: &str) -> Result<u64, StoreError> {
    let invalid = || StoreError::InvalidInterval(interval.to_string());
    if interval.len() < 2 {
        return Err(invalid());
    }
    let (value, unit) = interval.split_at(interval.len() - 1);
    let value: u64 = value.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return Err(invalid()),
    };
    Ok(value * multiplier)
}

/// Aggregate trade ticks (assumed timestamp-sorted) into OHLCV bars with
/// edges floored to the interval boundary.
pub fn aggregate_ohlcv(
    symbol: &str,
    ticks: &[TickData],
    interval: &str,
) -> Result<Vec<OhlcvBar>, StoreError> {
    let interval_us = parse_interval(interval)? * 1_000_000;
    let mut bars: Vec<OhlcvBar> = Vec::new();
    let mut notional = 0.0f64;

    for tick in ticks {
        if tick.data_type != DataType::Trade {
            continue;
        }
        let (Some(price), Some(size)) = (tick.trade_price, tick.trade_size) else {
            continue;
        };
        let bar_start = tick.timestamp_us / interval_us * interval_us;

        let start_new_bar = bars
            .last()
            .map_or(true, |bar| bar.timestamp_us != bar_start);
        if start_new_bar {
            if let Some(bar) = bars.last_mut() {
                bar.vwap = if bar.volume > 0.0 { notional / bar.volume } else { bar.close };
            }
            notional = 0.0;
            bars.push(OhlcvBar {
                symbol: symbol.to_string(),
                timestamp_us: bar_start,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
                vwap: price,
                trade_count: 0,
            });
        }
        let bar = bars.last_mut().unwrap();
        bar.high = bar.high.max(price);
        bar.low = bar.low.min(price);
        bar.close = price;
        bar.volume += size;
        bar.trade_count += 1;
        notional += price * size;
    }
    if let Some(bar) = bars.last_mut() {
        bar.vwap = if bar.volume > 0.0 { notional / bar.volume } else { bar.close };
    }
    Ok(bars)
}
