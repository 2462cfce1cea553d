use crate::core::{Side, Trade};
use crate::orderbook::OrderBook;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

/// Trades and mid prices retained per symbol
const HISTORY_CAPACITY: usize = 1000;

/// Flow window for volume and effective-spread metrics
const FLOW_WINDOW_SECS: i64 = 5;

/// Annualization factor for the realized volatility estimate, assuming
/// roughly 78,000 five-second sampling intervals per trading year. A coarse
/// proxy, adequate for regime classification.
const INTERVALS_PER_YEAR: f64 = 78_000.0;

/// Rule-classified market regime. First matching rule wins, in the order
/// the variants are tested by [`MicrostructureAnalyzer::regime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    HighLiquidity,
    LowLiquidity,
    Volatile,
    Stable,
    Trending,
    MeanReverting,
    Normal,
    Unknown,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Regime::HighLiquidity => "HIGH_LIQUIDITY",
            Regime::LowLiquidity => "LOW_LIQUIDITY",
            Regime::Volatile => "VOLATILE",
            Regime::Stable => "STABLE",
            Regime::Trending => "TRENDING",
            Regime::MeanReverting => "MEAN_REVERTING",
            Regime::Normal => "NORMAL",
            Regime::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Point-in-time microstructure metrics for one (instrument, venue)
#[derive(Debug, Clone)]
pub struct MicrostructureMetrics {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,

    // Spread metrics
    pub bid_ask_spread: Decimal,
    pub relative_spread_bps: f64,
    /// |VWAP of recent trades - mid| / mid * 10000 over the flow window
    pub effective_spread_bps: f64,

    // Liquidity metrics
    pub bid_liquidity: Decimal,
    pub ask_liquidity: Decimal,
    pub order_book_imbalance: f64,

    // Depth within 5 / 10 bps of mid
    pub depth_5_bid: Decimal,
    pub depth_5_ask: Decimal,
    pub depth_10_bid: Decimal,
    pub depth_10_ask: Decimal,

    // Price metrics
    pub microprice: Decimal,
    pub mid_price: Decimal,

    // Flow metrics over the window
    pub recent_buy_volume: Decimal,
    pub recent_sell_volume: Decimal,
    pub order_flow_imbalance: f64,

    /// Annualized realized volatility from the stored mid series
    pub realized_volatility: f64,
}

/// Real-time market microstructure analyzer.
///
/// Keeps bounded per-symbol ring buffers of trades and mid prices and
/// computes metrics on demand against a caller-supplied book.
pub struct MicrostructureAnalyzer {
    capacity: usize,
    trade_history: HashMap<String, VecDeque<Trade>>,
    mid_history: HashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
}

impl Default for MicrostructureAnalyzer {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl MicrostructureAnalyzer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            trade_history: HashMap::new(),
            mid_history: HashMap::new(),
        }
    }

    /// Record a trade print for flow analysis
    pub fn on_trade(&mut self, trade: &Trade) {
        let trades = self.trade_history.entry(trade.symbol.clone()).or_default();
        if trades.len() == self.capacity {
            trades.pop_front();
        }
        trades.push_back(trade.clone());

        let mids = self.mid_history.entry(trade.symbol.clone()).or_default();
        if mids.len() == self.capacity {
            mids.pop_front();
        }
        mids.push_back((trade.timestamp, trade.price));
    }

    /// Record a mid-price observation (from a book update)
    pub fn on_mid_price(&mut self, symbol: &str, mid: Decimal, timestamp: DateTime<Utc>) {
        let mids = self.mid_history.entry(symbol.to_string()).or_default();
        if mids.len() == self.capacity {
            mids.pop_front();
        }
        mids.push_back((timestamp, mid));
    }

    /// Compute current metrics against the given book. Returns `None` while
    /// either book side is empty.
    pub fn metrics(&self, book: &OrderBook, now: DateTime<Utc>) -> Option<MicrostructureMetrics> {
        let mid = book.mid_price()?;
        let spread = book.spread()?;
        let relative_spread_bps = (spread / mid * Decimal::from(10_000))
            .to_f64()
            .unwrap_or(0.0);

        let bid_liquidity: Decimal = book.bid_levels().map(|l| l.size).sum();
        let ask_liquidity: Decimal = book.ask_levels().map(|l| l.size).sum();

        let cutoff = now - Duration::seconds(FLOW_WINDOW_SECS);
        let (buy_volume, sell_volume, traded_value) = self
            .trade_history
            .get(book.symbol())
            .map(|trades| {
                let mut buy = Decimal::ZERO;
                let mut sell = Decimal::ZERO;
                let mut value = Decimal::ZERO;
                for t in trades.iter().filter(|t| t.timestamp >= cutoff) {
                    match t.side {
                        Side::Buy => buy += t.size,
                        Side::Sell => sell += t.size,
                    }
                    value += t.price * t.size;
                }
                (buy, sell, value)
            })
            .unwrap_or((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));

        let total_volume = buy_volume + sell_volume;
        let order_flow_imbalance = if total_volume.is_zero() {
            0.0
        } else {
            ((buy_volume - sell_volume) / total_volume)
                .to_f64()
                .unwrap_or(0.0)
        };

        let effective_spread_bps = if total_volume.is_zero() {
            0.0
        } else {
            let trade_vwap = traded_value / total_volume;
            ((trade_vwap - mid) / mid * Decimal::from(10_000))
                .to_f64()
                .unwrap_or(0.0)
                .abs()
        };

        Some(MicrostructureMetrics {
            timestamp: now,
            symbol: book.symbol().to_string(),
            bid_ask_spread: spread,
            relative_spread_bps,
            effective_spread_bps,
            bid_liquidity,
            ask_liquidity,
            order_book_imbalance: book.imbalance(),
            depth_5_bid: book.depth_at_distance(Side::Buy, 5.0),
            depth_5_ask: book.depth_at_distance(Side::Sell, 5.0),
            depth_10_bid: book.depth_at_distance(Side::Buy, 10.0),
            depth_10_ask: book.depth_at_distance(Side::Sell, 10.0),
            microprice: book.microprice().unwrap_or(mid),
            mid_price: mid,
            recent_buy_volume: buy_volume,
            recent_sell_volume: sell_volume,
            order_flow_imbalance,
            realized_volatility: self.realized_volatility(book.symbol()),
        })
    }

    /// Annualized standard deviation of log-returns on the stored mid
    /// series. Zero until at least two observations exist.
    pub fn realized_volatility(&self, symbol: &str) -> f64 {
        let Some(mids) = self.mid_history.get(symbol) else {
            return 0.0;
        };
        if mids.len() < 2 {
            return 0.0;
        }
        let mut returns = Vec::with_capacity(mids.len() - 1);
        let mut prev: Option<f64> = None;
        for (_, price) in mids {
            let p = price.to_f64().unwrap_or(0.0);
            if let Some(q) = prev {
                if q > 0.0 && p > 0.0 {
                    returns.push((p / q).ln());
                }
            }
            prev = Some(p);
        }
        if returns.is_empty() {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        var.sqrt() * INTERVALS_PER_YEAR.sqrt()
    }

    /// VPIN-like flow toxicity: mean absolute signed-volume imbalance over
    /// consecutive buckets of `bucket_trades` prints. 0 with no history.
    pub fn flow_toxicity(&self, symbol: &str, bucket_trades: usize) -> f64 {
        let Some(trades) = self.trade_history.get(symbol) else {
            return 0.0;
        };
        if trades.is_empty() || bucket_trades == 0 {
            return 0.0;
        }
        let trades: Vec<&Trade> = trades.iter().collect();
        let mut imbalances = Vec::new();
        for bucket in trades.chunks(bucket_trades) {
            let mut buy = Decimal::ZERO;
            let mut sell = Decimal::ZERO;
            for t in bucket {
                match t.side {
                    Side::Buy => buy += t.size,
                    Side::Sell => sell += t.size,
                }
            }
            let total = buy + sell;
            if !total.is_zero() {
                let imb = ((buy - sell) / total).to_f64().unwrap_or(0.0).abs();
                imbalances.push(imb);
            }
        }
        if imbalances.is_empty() {
            0.0
        } else {
            imbalances.iter().sum::<f64>() / imbalances.len() as f64
        }
    }

    /// Classify the current market regime. Threshold tests run in listed
    /// order; the first match wins.
    pub fn regime(&self, book: &OrderBook, now: DateTime<Utc>) -> Regime {
        let Some(m) = self.metrics(book, now) else {
            return Regime::Unknown;
        };

        // Tight spread and deep book on both sides
        if m.relative_spread_bps < 2.0
            && m.depth_5_bid > Decimal::from(10_000)
            && m.depth_5_ask > Decimal::from(10_000)
        {
            return Regime::HighLiquidity;
        }
        // Wide spread or thin book
        if m.relative_spread_bps > 10.0 || m.depth_5_bid < Decimal::from(1_000) {
            return Regime::LowLiquidity;
        }
        if m.realized_volatility > 0.30 {
            return Regime::Volatile;
        }
        if m.realized_volatility < 0.10 {
            return Regime::Stable;
        }
        if m.order_flow_imbalance.abs() > 0.6 {
            return Regime::Trending;
        }
        if m.order_flow_imbalance.abs() < 0.2 {
            return Regime::MeanReverting;
        }
        Regime::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(symbol: &str, price: Decimal, size: Decimal, side: Side, ts: DateTime<Utc>) -> Trade {
        Trade {
            symbol: symbol.into(),
            venue_id: "SIM".into(),
            trade_id: format!("{}", ts.timestamp_micros()),
            price,
            size,
            side,
            timestamp: ts,
        }
    }

    fn deep_tight_book() -> OrderBook {
        let mut book = OrderBook::new("AAPL", "SIM");
        let t = Utc::now();
        book.set_level(Side::Buy, dec!(100.00), dec!(20000), t).unwrap();
        book.set_level(Side::Sell, dec!(100.01), dec!(20000), t).unwrap();
        book
    }

    #[test]
    fn test_metrics_basic() {
        let mut analyzer = MicrostructureAnalyzer::default();
        let now = Utc::now();
        analyzer.on_trade(&trade("AAPL", dec!(100.00), dec!(10), Side::Buy, now));
        analyzer.on_trade(&trade("AAPL", dec!(100.02), dec!(30), Side::Sell, now));

        let book = deep_tight_book();
        let m = analyzer.metrics(&book, now).unwrap();
        assert_eq!(m.bid_ask_spread, dec!(0.01));
        assert_eq!(m.recent_buy_volume, dec!(10));
        assert_eq!(m.recent_sell_volume, dec!(30));
        assert!((m.order_flow_imbalance - (-0.5)).abs() < 1e-12);
        assert!(m.relative_spread_bps < 2.0);
        assert_eq!(m.order_book_imbalance, 0.0);
    }

    #[test]
    fn test_metrics_window_excludes_old_trades() {
        let mut analyzer = MicrostructureAnalyzer::default();
        let now = Utc::now();
        let stale = now - Duration::seconds(30);
        analyzer.on_trade(&trade("AAPL", dec!(100.00), dec!(500), Side::Buy, stale));
        analyzer.on_trade(&trade("AAPL", dec!(100.00), dec!(10), Side::Sell, now));

        let book = deep_tight_book();
        let m = analyzer.metrics(&book, now).unwrap();
        assert_eq!(m.recent_buy_volume, Decimal::ZERO);
        assert_eq!(m.recent_sell_volume, dec!(10));
    }

    #[test]
    fn test_metrics_none_on_one_sided_book() {
        let analyzer = MicrostructureAnalyzer::default();
        let mut book = OrderBook::new("AAPL", "SIM");
        book.set_level(Side::Buy, dec!(100.00), dec!(10), Utc::now()).unwrap();
        assert!(analyzer.metrics(&book, Utc::now()).is_none());
    }

    #[test]
    fn test_realized_volatility_flat_series_is_zero() {
        let mut analyzer = MicrostructureAnalyzer::default();
        let now = Utc::now();
        for i in 0..10 {
            analyzer.on_mid_price("AAPL", dec!(100.00), now + Duration::seconds(i));
        }
        assert_eq!(analyzer.realized_volatility("AAPL"), 0.0);
        assert_eq!(analyzer.realized_volatility("MSFT"), 0.0);
    }

    #[test]
    fn test_realized_volatility_nonzero() {
        let mut analyzer = MicrostructureAnalyzer::default();
        let now = Utc::now();
        let prices = [dec!(100), dec!(101), dec!(99.5), dec!(100.5), dec!(99)];
        for (i, p) in prices.iter().enumerate() {
            analyzer.on_mid_price("AAPL", *p, now + Duration::seconds(i as i64));
        }
        assert!(analyzer.realized_volatility("AAPL") > 0.0);
    }

    #[test]
    fn test_ring_buffer_bounded() {
        let mut analyzer = MicrostructureAnalyzer::new(5);
        let now = Utc::now();
        for i in 0..20 {
            analyzer.on_trade(&trade(
                "AAPL",
                dec!(100),
                dec!(1),
                Side::Buy,
                now + Duration::seconds(i),
            ));
        }
        assert_eq!(analyzer.trade_history.get("AAPL").unwrap().len(), 5);
        assert_eq!(analyzer.mid_history.get("AAPL").unwrap().len(), 5);
    }

    #[test]
    fn test_flow_toxicity() {
        let mut analyzer = MicrostructureAnalyzer::default();
        let now = Utc::now();
        // All buys: every bucket fully imbalanced
        for i in 0..100 {
            analyzer.on_trade(&trade("ONE", dec!(100), dec!(1), Side::Buy, now + Duration::seconds(i)));
        }
        assert!((analyzer.flow_toxicity("ONE", 10) - 1.0).abs() < 1e-12);

        // Alternating buys and sells of equal size: buckets balance out
        for i in 0..100 {
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            analyzer.on_trade(&trade("BAL", dec!(100), dec!(1), side, now + Duration::seconds(i)));
        }
        assert!(analyzer.flow_toxicity("BAL", 10) < 1e-12);
        assert_eq!(analyzer.flow_toxicity("NONE", 10), 0.0);
    }

    #[test]
    fn test_regime_high_liquidity() {
        let analyzer = MicrostructureAnalyzer::default();
        let book = deep_tight_book();
        assert_eq!(analyzer.regime(&book, Utc::now()), Regime::HighLiquidity);
    }

    #[test]
    fn test_regime_low_liquidity() {
        let analyzer = MicrostructureAnalyzer::default();
        let mut book = OrderBook::new("AAPL", "SIM");
        let t = Utc::now();
        // Wide spread, thin book
        book.set_level(Side::Buy, dec!(99.00), dec!(10), t).unwrap();
        book.set_level(Side::Sell, dec!(101.00), dec!(10), t).unwrap();
        assert_eq!(analyzer.regime(&book, t), Regime::LowLiquidity);
    }

    #[test]
    fn test_regime_trending() {
        let mut analyzer = MicrostructureAnalyzer::default();
        let now = Utc::now();
        // Moderately deep/tight book that fails the high-liquidity test,
        // volatile enough to dodge STABLE, with one-sided flow.
        let mut book = OrderBook::new("AAPL", "SIM");
        book.set_level(Side::Buy, dec!(100.00), dec!(5000), now).unwrap();
        book.set_level(Side::Sell, dec!(100.05), dec!(5000), now).unwrap();

        // Strongly one-sided recent flow whose prints alternate between two
        // prices, leaving the mid series with moderate dispersion: the
        // resulting vol lands between the STABLE and VOLATILE thresholds.
        for i in 0..20 {
            let price = if i % 2 == 0 { dec!(100.00) } else { dec!(100.07) };
            analyzer.on_trade(&trade(
                "AAPL",
                price,
                dec!(10),
                Side::Buy,
                now - Duration::milliseconds(i),
            ));
        }
        let vol = analyzer.realized_volatility("AAPL");
        assert!(vol > 0.10 && vol < 0.30, "vol {} outside band", vol);
        assert_eq!(analyzer.regime(&book, now), Regime::Trending);
    }

    #[test]
    fn test_regime_unknown_on_empty_book() {
        let analyzer = MicrostructureAnalyzer::default();
        let book = OrderBook::new("AAPL", "SIM");
        assert_eq!(analyzer.regime(&book, Utc::now()), Regime::Unknown);
    }
}
