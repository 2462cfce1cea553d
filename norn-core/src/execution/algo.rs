use crate::core::{Order, OrderId, OrderType, Quote};
use crate::execution::iceberg::IcebergParams;
use crate::execution::sor::SorParams;
use crate::execution::vwap::VwapParams;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Algorithm selection plus its parameter bag
#[derive(Debug, Clone)]
pub enum AlgoParams {
    Vwap(VwapParams),
    Iceberg(IcebergParams),
    Sor(SorParams),
}

/// What an algorithm asks the engine to do on a tick
#[derive(Debug, Clone)]
pub enum AlgoAction {
    /// Submit a child order (risk gate, then venue)
    Place(Order),
    /// Cancel a previously placed child
    Cancel(OrderId),
}

/// Read-only view an algorithm gets on each tick
pub struct AlgoContext<'a> {
    pub now: DateTime<Utc>,
    /// The algorithm's parent order as the engine currently sees it
    pub parent: &'a Order,
    /// Top-of-book for the parent's symbol on its (or the default) venue
    pub quote: Option<&'a Quote>,
    /// Per-venue quotes for the parent's symbol, for routing decisions
    pub venue_quotes: &'a HashMap<String, Quote>,
}

/// A child-order generating execution algorithm, advanced by the engine as
/// a cooperative state machine.
///
/// Contract:
/// - `on_tick` must return quickly and never block; waits are expressed by
///   returning no actions until the clock reaches the next slice.
/// - `stop` is idempotent; after it, `on_tick` returns no further actions
///   and `is_complete` is true within one tick turn.
pub trait ExecutionAlgorithm {
    /// The parent order this algorithm is executing
    fn parent_id(&self) -> OrderId;

    /// Algorithm name for logging
    fn name(&self) -> &'static str;

    /// Advance the state machine; returns orders to place and cancels to
    /// issue.
    fn on_tick(&mut self, ctx: &AlgoContext<'_>) -> Vec<AlgoAction>;

    /// Observe a state change on one of this algorithm's own children
    /// (acceptance, fills, cancel, reject).
    fn on_child_update(&mut self, child: &Order) {
        let _ = child;
    }

    /// Observe submission latency for a child, for venue statistics
    fn on_child_submitted(&mut self, child: &Order, latency_ms: f64) {
        let _ = (child, latency_ms);
    }

    /// Whether the algorithm has nothing further to do
    fn is_complete(&self, parent: &Order) -> bool;

    /// Request cooperative cancellation. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Build a child order inheriting the parent's symbol, side and venue.
pub fn child_order(
    parent: &Order,
    quantity: Decimal,
    price: Option<Decimal>,
    order_type: OrderType,
    now: DateTime<Utc>,
) -> Order {
    let mut child = match order_type {
        OrderType::Market => Order::market(parent.symbol.clone(), parent.side, quantity, now),
        _ => Order::limit(
            parent.symbol.clone(),
            parent.side,
            quantity,
            price.unwrap_or_default(),
            now,
        )
        .with_order_type(order_type),
    };
    child.parent_order_id = Some(parent.order_id);
    child.venue_id = parent.venue_id.clone();
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_child_order_inherits_parent() {
        let now = Utc::now();
        let parent = Order::limit("AAPL", Side::Buy, dec!(1000), dec!(150), now)
            .with_venue("NYSE")
            .with_order_type(OrderType::Vwap);
        let child = child_order(&parent, dec!(100), Some(dec!(149.95)), OrderType::Limit, now);
        assert_eq!(child.symbol, "AAPL");
        assert_eq!(child.side, Side::Buy);
        assert_eq!(child.parent_order_id, Some(parent.order_id));
        assert_eq!(child.venue_id.as_deref(), Some("NYSE"));
        assert_eq!(child.quantity, dec!(100));
        assert_eq!(child.price, Some(dec!(149.95)));

        let market_child = child_order(&parent, dec!(50), None, OrderType::Market, now);
        assert_eq!(market_child.order_type, OrderType::Market);
        assert_eq!(market_child.price, None);
    }
}
