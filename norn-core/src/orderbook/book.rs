use crate::core::{BookError, LiquidityError, OrderBookLevel, OrderBookSnapshot, Side};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Incremental book update action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookAction {
    Add,
    Update,
    Delete,
}

/// Incremental order book update.
///
/// `sequence` must be exactly one past the book's current sequence number;
/// anything else is a gap and marks the book stale until the next full
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub action: BookAction,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Limit order book for one (instrument, venue) stream.
///
/// Levels live in `BTreeMap`s keyed by price, giving O(log n) upsert and
/// O(1) top-of-book through the sorted iterators. One level per price; a
/// level with size zero is removed, never stored.
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    venue_id: String,
    bids: BTreeMap<Decimal, OrderBookLevel>,
    asks: BTreeMap<Decimal, OrderBookLevel>,
    sequence_number: u64,
    last_update: Option<DateTime<Utc>>,
    /// Set on a sequence gap; incremental updates are refused until a full
    /// snapshot re-syncs the book
    stale: bool,
    update_count: u64,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>, venue_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            venue_id: venue_id.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence_number: 0,
            last_update: None,
            stale: false,
            update_count: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn venue_id(&self) -> &str {
        &self.venue_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Atomically replace the book from a full snapshot.
    ///
    /// A crossed snapshot is a protocol error and leaves the book unchanged.
    /// The snapshot's sequence number must not move backwards.
    pub fn apply_snapshot(&mut self, snapshot: &OrderBookSnapshot) -> Result<(), BookError> {
        if let (Some(bid), Some(ask)) = (snapshot.best_bid(), snapshot.best_ask()) {
            if bid.price >= ask.price {
                return Err(BookError::Crossed {
                    bid: bid.price,
                    ask: ask.price,
                });
            }
        }
        if snapshot.sequence_number < self.sequence_number {
            return Err(BookError::SequenceGap {
                expected: self.sequence_number,
                got: snapshot.sequence_number,
            });
        }

        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.bids {
            if level.size > Decimal::ZERO {
                self.bids.insert(level.price, *level);
            }
        }
        for level in &snapshot.asks {
            if level.size > Decimal::ZERO {
                self.asks.insert(level.price, *level);
            }
        }
        self.sequence_number = snapshot.sequence_number;
        self.last_update = Some(snapshot.timestamp);
        self.stale = false;
        self.update_count += 1;
        debug!(
            symbol = %self.symbol,
            bids = self.bids.len(),
            asks = self.asks.len(),
            seq = self.sequence_number,
            "book snapshot applied"
        );
        Ok(())
    }

    /// Apply an incremental update.
    ///
    /// Size zero or `Delete` removes the level. An update that would cross
    /// the book is refused and leaves the book unchanged. A non-contiguous
    /// sequence number marks the book stale and the update is discarded.
    pub fn apply_update(&mut self, update: &BookUpdate) -> Result<(), BookError> {
        if self.stale {
            return Err(BookError::Stale);
        }
        let expected = self.sequence_number + 1;
        if update.sequence != expected {
            self.stale = true;
            return Err(BookError::SequenceGap {
                expected,
                got: update.sequence,
            });
        }

        let remove = update.action == BookAction::Delete || update.size.is_zero();
        if !remove {
            // Refuse an upsert that would cross the book
            match update.side {
                Side::Buy => {
                    if let Some((&best_ask, _)) = self.asks.iter().next() {
                        if update.price >= best_ask {
                            return Err(BookError::Crossed {
                                bid: update.price,
                                ask: best_ask,
                            });
                        }
                    }
                }
                Side::Sell => {
                    if let Some((&best_bid, _)) = self.bids.iter().next_back() {
                        if update.price <= best_bid {
                            return Err(BookError::Crossed {
                                bid: best_bid,
                                ask: update.price,
                            });
                        }
                    }
                }
            }
        }

        let side = match update.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if remove {
            side.remove(&update.price);
        } else {
            side.insert(
                update.price,
                OrderBookLevel::new(update.price, update.size),
            );
        }

        self.sequence_number = update.sequence;
        self.last_update = Some(update.timestamp);
        self.update_count += 1;
        Ok(())
    }

    /// Top of the bid side
    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.values().next_back()
    }

    /// Top of the ask side
    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.values().next()
    }

    /// Arithmetic mean of the tops; undefined if either side is empty
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Ask minus bid; undefined if either side is empty
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        }
    }

    /// Size-weighted mid that anticipates short-horizon price given visible
    /// imbalance:
    /// `(ask_size * bid + bid_size * ask) / (bid_size + ask_size)`
    pub fn microprice(&self) -> Option<Decimal> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        let total = bid.size + ask.size;
        if total.is_zero() {
            return None;
        }
        Some((ask.size * bid.price + bid.size * ask.price) / total)
    }

    /// Sum of sizes within `distance_bps` of mid on the given side.
    /// Threshold is `mid * (1 - bps/10000)` for bids, `mid * (1 + bps/10000)`
    /// for asks.
    pub fn depth_at_distance(&self, side: Side, distance_bps: f64) -> Decimal {
        let Some(mid) = self.mid_price() else {
            return Decimal::ZERO;
        };
        let fraction = Decimal::try_from(distance_bps / 10_000.0).unwrap_or_default();
        match side {
            Side::Buy => {
                let threshold = mid * (Decimal::ONE - fraction);
                self.bids
                    .range(threshold..)
                    .map(|(_, l)| l.size)
                    .sum()
            }
            Side::Sell => {
                let threshold = mid * (Decimal::ONE + fraction);
                self.asks
                    .range(..=threshold)
                    .map(|(_, l)| l.size)
                    .sum()
            }
        }
    }

    /// Book-wide size imbalance in [-1, 1]; 0 when both sides are empty.
    /// Positive values mean more resting size on the bid (buying pressure).
    pub fn imbalance(&self) -> f64 {
        let bid: Decimal = self.bids.values().map(|l| l.size).sum();
        let ask: Decimal = self.asks.values().map(|l| l.size).sum();
        let total = bid + ask;
        if total.is_zero() {
            return 0.0;
        }
        ((bid - ask) / total).to_f64().unwrap_or(0.0)
    }

    /// Volume-weighted average price to fill `quantity` by walking the
    /// opposite side from the top.
    pub fn vwap_to_fill(&self, quantity: Decimal, side: Side) -> Result<Decimal, LiquidityError> {
        if quantity <= Decimal::ZERO {
            return Err(LiquidityError {
                requested: quantity,
                available: Decimal::ZERO,
            });
        }
        let mut remaining = quantity;
        let mut cost = Decimal::ZERO;
        // Buys consume the ask side (ascending), sells the bid side (descending)
        let levels: Box<dyn Iterator<Item = &OrderBookLevel>> = match side {
            Side::Buy => Box::new(self.asks.values()),
            Side::Sell => Box::new(self.bids.values().rev()),
        };
        for level in levels {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(level.size);
            cost += take * level.price;
            remaining -= take;
        }
        if remaining > Decimal::ZERO {
            return Err(LiquidityError {
                requested: quantity,
                available: quantity - remaining,
            });
        }
        Ok(cost / quantity)
    }

    /// Estimated price impact of sweeping `quantity` against the book, as a
    /// fraction of the far touch: `|vwap - top| / top`.
    pub fn market_impact_estimate(
        &self,
        quantity: Decimal,
        side: Side,
    ) -> Result<f64, LiquidityError> {
        let vwap = self.vwap_to_fill(quantity, side)?;
        let top = match side {
            Side::Buy => self.best_ask(),
            Side::Sell => self.best_bid(),
        }
        .map(|l| l.price)
        .unwrap_or(vwap);
        if top.is_zero() {
            return Ok(0.0);
        }
        let impact = (vwap - top).abs() / top;
        Ok(impact.to_f64().unwrap_or(0.0))
    }

    /// Bids sorted descending by price
    pub fn bid_levels(&self) -> impl Iterator<Item = &OrderBookLevel> {
        self.bids.values().rev()
    }

    /// Asks sorted ascending by price
    pub fn ask_levels(&self) -> impl Iterator<Item = &OrderBookLevel> {
        self.asks.values()
    }

    /// Top N levels of each side
    pub fn depth(&self, levels: usize) -> (Vec<OrderBookLevel>, Vec<OrderBookLevel>) {
        (
            self.bid_levels().take(levels).copied().collect(),
            self.ask_levels().take(levels).copied().collect(),
        )
    }

    /// Immutable capture of the current state
    pub fn snapshot(&self, now: DateTime<Utc>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: self.symbol.clone(),
            venue_id: self.venue_id.clone(),
            bids: self.bid_levels().copied().collect(),
            asks: self.ask_levels().copied().collect(),
            timestamp: self.last_update.unwrap_or(now),
            sequence_number: self.sequence_number,
        }
    }

    /// Convenience upsert used by feed adapters and the backtester: applies
    /// an update with the next sequence number.
    pub fn set_level(&mut self, side: Side, price: Decimal, size: Decimal, now: DateTime<Utc>) -> Result<(), BookError> {
        let action = if size.is_zero() {
            BookAction::Delete
        } else {
            BookAction::Update
        };
        self.apply_update(&BookUpdate {
            side,
            price,
            size,
            action,
            sequence: self.sequence_number + 1,
            timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new("AAPL", "SIM");
        let t = now();
        book.set_level(Side::Buy, dec!(100.00), dec!(10), t).unwrap();
        book.set_level(Side::Buy, dec!(99.50), dec!(20), t).unwrap();
        book.set_level(Side::Sell, dec!(100.50), dec!(15), t).unwrap();
        book.set_level(Side::Sell, dec!(101.00), dec!(25), t).unwrap();
        book
    }

    #[test]
    fn test_derived_metrics() {
        let book = sample_book();
        assert_eq!(book.best_bid().unwrap().price, dec!(100.00));
        assert_eq!(book.best_ask().unwrap().price, dec!(100.50));
        assert_eq!(book.mid_price(), Some(dec!(100.25)));
        assert_eq!(book.spread(), Some(dec!(0.50)));
        // microprice = (15*100.00 + 10*100.50) / 25 = 100.20
        assert_eq!(book.microprice(), Some(dec!(100.20)));
        // imbalance = (30 - 40) / 70
        let imb = book.imbalance();
        assert!((imb - (-10.0 / 70.0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_book_metrics_undefined() {
        let book = OrderBook::new("AAPL", "SIM");
        assert!(book.best_bid().is_none());
        assert!(book.mid_price().is_none());
        assert!(book.spread().is_none());
        assert!(book.microprice().is_none());
        assert_eq!(book.imbalance(), 0.0);
        assert_eq!(book.depth_at_distance(Side::Buy, 10.0), Decimal::ZERO);
    }

    #[test]
    fn test_zero_size_removes_level() {
        let mut book = sample_book();
        book.set_level(Side::Buy, dec!(100.00), dec!(0), now()).unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(99.50));
        assert!(book.bid_levels().all(|l| l.size > Decimal::ZERO));
    }

    #[test]
    fn test_crossed_update_refused() {
        let mut book = sample_book();
        let seq = book.sequence_number();
        let err = book
            .set_level(Side::Buy, dec!(100.50), dec!(5), now())
            .unwrap_err();
        assert!(matches!(err, BookError::Crossed { .. }));
        // Book unchanged
        assert_eq!(book.sequence_number(), seq);
        assert_eq!(book.best_bid().unwrap().price, dec!(100.00));
    }

    #[test]
    fn test_crossed_snapshot_refused() {
        let mut book = OrderBook::new("AAPL", "SIM");
        let snap = OrderBookSnapshot {
            symbol: "AAPL".into(),
            venue_id: "SIM".into(),
            bids: vec![OrderBookLevel::new(dec!(101), dec!(10))],
            asks: vec![OrderBookLevel::new(dec!(100), dec!(10))],
            timestamp: now(),
            sequence_number: 1,
        };
        assert!(matches!(
            book.apply_snapshot(&snap),
            Err(BookError::Crossed { .. })
        ));
    }

    #[test]
    fn test_sequence_gap_marks_stale() {
        let mut book = sample_book();
        let seq = book.sequence_number();
        let gap = BookUpdate {
            side: Side::Buy,
            price: dec!(99.00),
            size: dec!(5),
            action: BookAction::Add,
            sequence: seq + 3,
            timestamp: now(),
        };
        assert!(matches!(
            book.apply_update(&gap),
            Err(BookError::SequenceGap { .. })
        ));
        assert!(book.is_stale());
        // Further increments are discarded until a snapshot re-sync
        let next = BookUpdate {
            sequence: seq + 1,
            ..gap
        };
        assert_eq!(book.apply_update(&next), Err(BookError::Stale));

        // Full snapshot clears staleness
        let snap = OrderBookSnapshot {
            symbol: "AAPL".into(),
            venue_id: "SIM".into(),
            bids: vec![OrderBookLevel::new(dec!(100), dec!(10))],
            asks: vec![OrderBookLevel::new(dec!(101), dec!(10))],
            timestamp: now(),
            sequence_number: seq + 10,
        };
        book.apply_snapshot(&snap).unwrap();
        assert!(!book.is_stale());
        assert_eq!(book.sequence_number(), seq + 10);
    }

    #[test]
    fn test_depth_at_distance() {
        let t = now();
        let mut book = OrderBook::new("AAPL", "SIM");
        book.set_level(Side::Buy, dec!(100.00), dec!(10), t).unwrap();
        book.set_level(Side::Buy, dec!(99.96), dec!(20), t).unwrap();
        book.set_level(Side::Buy, dec!(99.00), dec!(100), t).unwrap();
        book.set_level(Side::Sell, dec!(100.04), dec!(15), t).unwrap();
        book.set_level(Side::Sell, dec!(100.08), dec!(25), t).unwrap();
        book.set_level(Side::Sell, dec!(102.00), dec!(100), t).unwrap();
        // mid = 100.02; 10 bps ~= 0.10
        let bid_depth = book.depth_at_distance(Side::Buy, 10.0);
        assert_eq!(bid_depth, dec!(30)); // 100.00 and 99.96, not 99.00
        let ask_depth = book.depth_at_distance(Side::Sell, 10.0);
        assert_eq!(ask_depth, dec!(40)); // 100.04 and 100.08, not 102.00
    }

    #[test]
    fn test_vwap_to_fill_and_impact() {
        let book = sample_book();
        // Buy 20: 15 @ 100.50 + 5 @ 101.00 => (1507.5 + 505) / 20 = 100.625
        let vwap = book.vwap_to_fill(dec!(20), Side::Buy).unwrap();
        assert_eq!(vwap, dec!(100.625));
        let impact = book.market_impact_estimate(dec!(20), Side::Buy).unwrap();
        assert!((impact - (0.125 / 100.50)).abs() < 1e-9);

        // Insufficient depth
        let err = book.vwap_to_fill(dec!(100), Side::Buy).unwrap_err();
        assert_eq!(err.available, dec!(40));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let book = sample_book();
        let snap = book.snapshot(now());
        let mut rebuilt = OrderBook::new("AAPL", "SIM");
        rebuilt.apply_snapshot(&snap).unwrap();
        let snap2 = rebuilt.snapshot(now());
        assert_eq!(snap.bids, snap2.bids);
        assert_eq!(snap.asks, snap2.asks);
        assert_eq!(snap.sequence_number, snap2.sequence_number);
    }

    #[test]
    fn test_incremental_equals_snapshot_construction() {
        let t = now();
        let incremental = sample_book();
        let snap = OrderBookSnapshot {
            symbol: "AAPL".into(),
            venue_id: "SIM".into(),
            bids: vec![
                OrderBookLevel::new(dec!(100.00), dec!(10)),
                OrderBookLevel::new(dec!(99.50), dec!(20)),
            ],
            asks: vec![
                OrderBookLevel::new(dec!(100.50), dec!(15)),
                OrderBookLevel::new(dec!(101.00), dec!(25)),
            ],
            timestamp: t,
            sequence_number: incremental.sequence_number(),
        };
        let mut from_snap = OrderBook::new("AAPL", "SIM");
        from_snap.apply_snapshot(&snap).unwrap();

        let a = incremental.snapshot(t);
        let b = from_snap.snapshot(t);
        assert_eq!(a.bids, b.bids);
        assert_eq!(a.asks, b.asks);
    }
}
