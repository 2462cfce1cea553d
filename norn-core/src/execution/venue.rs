use crate::core::{
    Fill, LiquidityFlag, Order, OrderId, OrderType, Quote, Side, Venue, VenueError,
};
use chrono::{DateTime, Utc};
use crossbeam::queue::ArrayQueue;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pending fills retained before the engine drains them
const MAX_PENDING_FILLS: usize = 1024;

/// The venue-facing contract shared by live adapters and simulators.
///
/// Submissions are synchronous accept/reject; fills surface asynchronously
/// through [`VenueAdapter::poll_fills`].
pub trait VenueAdapter {
    fn venue_id(&self) -> &str;

    /// Submit an order. `Ok` means the venue acknowledged (order is NEW).
    fn submit_order(&mut self, order: &Order, now: DateTime<Utc>) -> Result<(), VenueError>;

    /// Request a cancel. `Ok` means the venue acknowledged the cancel.
    fn cancel_order(&mut self, order_id: &OrderId, now: DateTime<Utc>) -> Result<(), VenueError>;

    /// Current top-of-book quote for a symbol, if known
    fn quote(&self, symbol: &str) -> Option<Quote>;

    /// Drain fills produced since the last poll, in fill-time order
    fn poll_fills(&mut self) -> Vec<Fill>;

    /// Round-trip latency attributed to this venue, for router statistics
    fn latency_ms(&self) -> f64 {
        0.0
    }

    /// Push a fresh market quote into the adapter. Simulators re-check
    /// resting orders against it; live adapters ignore it (the market is
    /// the market).
    fn update_quote(&mut self, quote: Quote, now: DateTime<Utc>) {
        let _ = (quote, now);
    }
}

/// Paper-trading venue: fills marketable orders immediately against its
/// quote board, passive limits when told the market crossed them.
///
/// Pessimistic in the simulated-executor tradition: a marketable limit
/// fills at its own limit price, a market order at the far touch.
pub struct SimulatedVenue {
    venue: Venue,
    quotes: HashMap<String, Quote>,
    open_orders: HashMap<OrderId, Order>,
    pending_fills: Arc<ArrayQueue<Fill>>,
    dropped_fills: u64,
    latency_ms: f64,
    total_fills: u64,
}

impl SimulatedVenue {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            quotes: HashMap::new(),
            open_orders: HashMap::new(),
            pending_fills: Arc::new(ArrayQueue::new(MAX_PENDING_FILLS)),
            dropped_fills: 0,
            latency_ms: 0.0,
            total_fills: 0,
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn venue(&self) -> &Venue {
        &self.venue
    }

    /// Post a quote to the board
    pub fn set_quote(&mut self, quote: Quote) {
        self.quotes.insert(quote.symbol.clone(), quote);
    }

    pub fn open_order_count(&self) -> usize {
        self.open_orders.len()
    }

    pub fn dropped_fill_count(&self) -> u64 {
        self.dropped_fills
    }

    fn enqueue_fill(&mut self, fill: Fill) {
        self.total_fills += 1;
        if let Err(returned) = self.pending_fills.push(fill) {
            self.dropped_fills += 1;
            warn!(
                order_id = %returned.order_id,
                dropped = self.dropped_fills,
                "fill queue overflow, dropping oldest"
            );
            self.pending_fills.pop();
            let _ = self.pending_fills.push(returned);
        }
    }

    fn try_execute(&mut self, order: &Order, now: DateTime<Utc>) -> Option<Fill> {
        let quote = self.quotes.get(&order.symbol)?;
        let (fill_price, liquidity) = match order.order_type {
            OrderType::Market => {
                let price = match order.side {
                    Side::Buy => quote.ask_price,
                    Side::Sell => quote.bid_price,
                };
                (price, LiquidityFlag::Taker)
            }
            _ => {
                let limit = order.price?;
                let marketable = match order.side {
                    Side::Buy => limit >= quote.ask_price,
                    Side::Sell => limit <= quote.bid_price,
                };
                if !marketable {
                    return None;
                }
                (limit, LiquidityFlag::Taker)
            }
        };
        let fee = fill_price * order.remaining_quantity() * self.venue.fee_rate(liquidity);
        Some(Fill::new(
            order.order_id,
            order.symbol.clone(),
            order.side,
            order.remaining_quantity(),
            fill_price,
            self.venue.venue_id.clone(),
            fee,
            now,
            liquidity,
        ))
    }

    /// Re-check resting orders against a fresh quote, filling any the
    /// market has crossed (as makers, at their limit price).
    pub fn match_resting(&mut self, now: DateTime<Utc>) {
        let resting: Vec<Order> = self.open_orders.values().cloned().collect();
        for order in resting {
            let Some(quote) = self.quotes.get(&order.symbol) else {
                continue;
            };
            let Some(limit) = order.price else { continue };
            let crossed = match order.side {
                Side::Buy => quote.ask_price <= limit,
                Side::Sell => quote.bid_price >= limit,
            };
            if !crossed {
                continue;
            }
            let fee =
                limit * order.remaining_quantity() * self.venue.fee_rate(LiquidityFlag::Maker);
            let fill = Fill::new(
                order.order_id,
                order.symbol.clone(),
                order.side,
                order.remaining_quantity(),
                limit,
                self.venue.venue_id.clone(),
                fee,
                now,
                LiquidityFlag::Maker,
            );
            self.open_orders.remove(&order.order_id);
            self.enqueue_fill(fill);
        }
    }
}

impl VenueAdapter for SimulatedVenue {
    fn venue_id(&self) -> &str {
        &self.venue.venue_id
    }

    fn submit_order(&mut self, order: &Order, now: DateTime<Utc>) -> Result<(), VenueError> {
        if order.quantity <= Decimal::ZERO {
            return Err(VenueError::Rejected("size must be positive".into()));
        }
        if order.quantity < self.venue.min_order_size {
            return Err(VenueError::Rejected(format!(
                "size {} below venue minimum {}",
                order.quantity, self.venue.min_order_size
            )));
        }
        info!(
            venue = %self.venue.venue_id,
            order_id = %order.order_id,
            side = %order.side,
            qty = %order.quantity,
            "order accepted"
        );
        if let Some(fill) = self.try_execute(order, now) {
            self.enqueue_fill(fill);
        } else {
            self.open_orders.insert(order.order_id, order.clone());
        }
        Ok(())
    }

    fn cancel_order(&mut self, order_id: &OrderId, now: DateTime<Utc>) -> Result<(), VenueError> {
        let _ = now;
        match self.open_orders.remove(order_id) {
            Some(order) => {
                debug!(venue = %self.venue.venue_id, order_id = %order.order_id, "order cancelled");
                Ok(())
            }
            None => Err(VenueError::UnknownOrder(*order_id)),
        }
    }

    fn quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes.get(symbol).cloned()
    }

    fn poll_fills(&mut self) -> Vec<Fill> {
        let mut fills = Vec::with_capacity(self.pending_fills.len());
        while let Some(fill) = self.pending_fills.pop() {
            fills.push(fill);
        }
        fills.sort_by_key(|f| f.timestamp);
        fills
    }

    fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    fn update_quote(&mut self, quote: Quote, now: DateTime<Utc>) {
        self.set_quote(quote);
        self.match_resting(now);
    }
}
