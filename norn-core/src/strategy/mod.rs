//! Strategy callback surface
//!
//! Strategies are thin collaborators above the core: they consume book
//! updates, trades, quotes and fills, and submit orders through the
//! context handed to every callback. Order submission is synchronous
//! accept/reject; fills arrive later through `on_fill`.
//!
//! The context is an explicit value, not a process-wide singleton: whatever
//! engine is driving the strategy (backtester or live) constructs it per
//! callback.

use crate::core::{Fill, Order, OrderBookSnapshot, OrderId, Quote, Trade};
use crate::risk::Position;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Per-callback view of the engine plus the submission queue.
///
/// Orders and cancels accumulate here and are drained by the driving
/// engine after the callback returns, which keeps the callback free of
/// re-entrant engine mutation.
pub struct StrategyContext<'a> {
    pub now: DateTime<Utc>,
    positions: &'a HashMap<String, Position>,
    submissions: Vec<Order>,
    cancellations: Vec<OrderId>,
}

impl<'a> StrategyContext<'a> {
    pub fn new(now: DateTime<Utc>, positions: &'a HashMap<String, Position>) -> Self {
        Self {
            now,
            positions,
            submissions: Vec::new(),
            cancellations: Vec::new(),
        }
    }

    /// The strategy's current position in a symbol, if any
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Queue an order for submission when the callback returns
    pub fn submit_order(&mut self, order: Order) {
        self.submissions.push(order);
    }

    /// Queue a cancel request
    pub fn cancel_order(&mut self, order_id: OrderId) {
        self.cancellations.push(order_id);
    }

    /// Drain the queued work (called by the driving engine)
    pub fn take_actions(&mut self) -> (Vec<Order>, Vec<OrderId>) {
        (
            std::mem::take(&mut self.submissions),
            std::mem::take(&mut self.cancellations),
        )
    }
}

/// The callback surface every strategy implements. All methods default to
/// no-ops so a strategy only implements the events it cares about.
pub trait Strategy {
    fn name(&self) -> &'static str;

    /// A fresh L2 snapshot for one (instrument, venue)
    fn on_orderbook_update(&mut self, snapshot: &OrderBookSnapshot, ctx: &mut StrategyContext<'_>) {
        let _ = (snapshot, ctx);
    }

    /// A trade print from the tape
    fn on_trade(&mut self, trade: &Trade, ctx: &mut StrategyContext<'_>) {
        let _ = (trade, ctx);
    }

    /// A top-of-book quote update
    fn on_quote(&mut self, quote: &Quote, ctx: &mut StrategyContext<'_>) {
        let _ = (quote, ctx);
    }

    /// One of this session's orders filled (possibly partially)
    fn on_fill(&mut self, fill: &Fill, ctx: &mut StrategyContext<'_>) {
        let _ = (fill, ctx);
    }
}
