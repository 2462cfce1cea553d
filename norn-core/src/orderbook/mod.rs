//! L2 Orderbook - Full Market Depth Tracking
//!
//! Sorted two-sided price-level book per (instrument, venue), fed either by
//! full snapshots (atomic replace) or incremental updates, plus the derived
//! quantities strategies and analyzers consume:
//! - Best bid/ask, mid, spread, microprice
//! - Depth within a basis-point distance of mid
//! - Orderbook imbalance (buy vs sell pressure)
//! - VWAP-to-fill and market impact estimates
//!
//! A cross-venue [`BookAggregator`] provides the consolidated best bid/offer
//! and fee-aware venue routing.

pub mod aggregator;
pub mod book;

#[cfg(test)]
mod book_proptest;

pub use aggregator::BookAggregator;
pub use book::{BookAction, BookUpdate, OrderBook};
