use crate::core::{Side, Venue};
use crate::orderbook::book::OrderBook;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;

/// Aggregates order books across venues for the same symbol.
///
/// Provides the consolidated best bid/offer (CBBO) and a fee-aware routing
/// decision: `best_venue_for` minimizes the effective buy price (or
/// maximizes the effective sell price) after the venue's taker fee.
#[derive(Debug, Default)]
pub struct BookAggregator {
    /// symbol -> venue_id -> book
    books: HashMap<String, HashMap<String, OrderBook>>,
    venues: HashMap<String, Venue>,
}

impl BookAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a venue's fee schedule for routing decisions
    pub fn register_venue(&mut self, venue: Venue) {
        self.venues.insert(venue.venue_id.clone(), venue);
    }

    /// Add (or replace) the book for one (symbol, venue) stream
    pub fn add_book(&mut self, book: OrderBook) {
        info!(symbol = book.symbol(), venue = book.venue_id(), "registered order book");
        self.books
            .entry(book.symbol().to_string())
            .or_default()
            .insert(book.venue_id().to_string(), book);
    }

    pub fn book(&self, symbol: &str, venue_id: &str) -> Option<&OrderBook> {
        self.books.get(symbol)?.get(venue_id)
    }

    pub fn book_mut(&mut self, symbol: &str, venue_id: &str) -> Option<&mut OrderBook> {
        self.books.get_mut(symbol)?.get_mut(venue_id)
    }

    pub fn venue(&self, venue_id: &str) -> Option<&Venue> {
        self.venues.get(venue_id)
    }

    /// Consolidated best bid and offer across all venues
    pub fn cbbo(&self, symbol: &str) -> (Option<Decimal>, Option<Decimal>) {
        let Some(venue_books) = self.books.get(symbol) else {
            return (None, None);
        };
        let mut best_bid: Option<Decimal> = None;
        let mut best_ask: Option<Decimal> = None;
        for book in venue_books.values() {
            if let Some(bid) = book.best_bid() {
                if best_bid.map_or(true, |b| bid.price > b) {
                    best_bid = Some(bid.price);
                }
            }
            if let Some(ask) = book.best_ask() {
                if best_ask.map_or(true, |a| ask.price < a) {
                    best_ask = Some(ask.price);
                }
            }
        }
        (best_bid, best_ask)
    }

    /// The venue with the best effective price after taker fees for an
    /// order of `quantity`, requiring the full size at the touch.
    pub fn best_venue_for(&self, symbol: &str, side: Side, quantity: Decimal) -> Option<String> {
        let venue_books = self.books.get(symbol)?;
        let mut best: Option<(String, Decimal)> = None;

        for (venue_id, book) in venue_books {
            let fee = self
                .venues
                .get(venue_id)
                .map(|v| v.taker_fee)
                .unwrap_or(Decimal::ZERO);
            match side {
                Side::Buy => {
                    let Some(level) = book.best_ask() else { continue };
                    if level.size < quantity {
                        continue;
                    }
                    let effective = level.price * (Decimal::ONE + fee);
                    if best.as_ref().map_or(true, |(_, p)| effective < *p) {
                        best = Some((venue_id.clone(), effective));
                    }
                }
                Side::Sell => {
                    let Some(level) = book.best_bid() else { continue };
                    if level.size < quantity {
                        continue;
                    }
                    let effective = level.price * (Decimal::ONE - fee);
                    if best.as_ref().map_or(true, |(_, p)| effective > *p) {
                        best = Some((venue_id.clone(), effective));
                    }
                }
            }
        }
        best.map(|(venue_id, _)| venue_id)
    }

    /// Total liquidity within `max_distance_bps` of mid across all venues
    pub fn total_liquidity(&self, symbol: &str, side: Side, max_distance_bps: f64) -> Decimal {
        self.books
            .get(symbol)
            .map(|venue_books| {
                venue_books
                    .values()
                    .map(|b| b.depth_at_distance(side, max_distance_bps))
                    .sum()
            })
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Venue;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn book_with_top(
        symbol: &str,
        venue: &str,
        bid: Decimal,
        bid_size: Decimal,
        ask: Decimal,
        ask_size: Decimal,
    ) -> OrderBook {
        let mut book = OrderBook::new(symbol, venue);
        let t = Utc::now();
        book.set_level(Side::Buy, bid, bid_size, t).unwrap();
        book.set_level(Side::Sell, ask, ask_size, t).unwrap();
        book
    }

    #[test]
    fn test_cbbo() {
        let mut agg = BookAggregator::new();
        agg.add_book(book_with_top("AAPL", "NYSE", dec!(100.00), dec!(10), dec!(100.10), dec!(10)));
        agg.add_book(book_with_top("AAPL", "ARCA", dec!(100.02), dec!(5), dec!(100.08), dec!(5)));

        let (bid, ask) = agg.cbbo("AAPL");
        assert_eq!(bid, Some(dec!(100.02)));
        assert_eq!(ask, Some(dec!(100.08)));

        assert_eq!(agg.cbbo("MSFT"), (None, None));
    }

    #[test]
    fn test_best_venue_fee_aware() {
        let mut agg = BookAggregator::new();
        let mut cheap = Venue::new("CHEAP", "Cheap Fees");
        cheap.taker_fee = dec!(0.0001);
        let mut pricey = Venue::new("PRICEY", "High Fees");
        pricey.taker_fee = dec!(0.0100);
        agg.register_venue(cheap);
        agg.register_venue(pricey);

        // PRICEY shows a marginally better ask, but fees flip the ranking:
        // 100.05 * 1.0001 = 100.06 vs 100.04 * 1.01 = 101.04
        agg.add_book(book_with_top("AAPL", "CHEAP", dec!(99.90), dec!(50), dec!(100.05), dec!(50)));
        agg.add_book(book_with_top("AAPL", "PRICEY", dec!(99.95), dec!(50), dec!(100.04), dec!(50)));

        assert_eq!(
            agg.best_venue_for("AAPL", Side::Buy, dec!(10)),
            Some("CHEAP".to_string())
        );
    }

    #[test]
    fn test_best_venue_requires_size() {
        let mut agg = BookAggregator::new();
        agg.register_venue(Venue::new("A", "A"));
        agg.register_venue(Venue::new("B", "B"));
        // A has the better ask but only 5 on the touch
        agg.add_book(book_with_top("AAPL", "A", dec!(99.90), dec!(50), dec!(100.00), dec!(5)));
        agg.add_book(book_with_top("AAPL", "B", dec!(99.90), dec!(50), dec!(100.10), dec!(50)));

        assert_eq!(
            agg.best_venue_for("AAPL", Side::Buy, dec!(10)),
            Some("B".to_string())
        );
        assert_eq!(agg.best_venue_for("AAPL", Side::Buy, dec!(100)), None);
    }

    #[test]
    fn test_total_liquidity() {
        let mut agg = BookAggregator::new();
        agg.add_book(book_with_top("AAPL", "A", dec!(100.00), dec!(10), dec!(100.02), dec!(10)));
        agg.add_book(book_with_top("AAPL", "B", dec!(100.00), dec!(20), dec!(100.02), dec!(20)));
        assert_eq!(agg.total_liquidity("AAPL", Side::Buy, 10.0), dec!(30));
    }
}
