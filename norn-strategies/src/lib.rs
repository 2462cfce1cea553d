//! Norn Strategies - Strategy Implementations
//!
//! Thin strategy layer over norn-core's [`Strategy`] callback surface.
//! Strategies consume book updates, trades and fills, and submit orders
//! through the per-callback context; everything below the callbacks (risk,
//! routing, fill simulation) lives in the core.
//!
//! ## Strategies
//! - Order Flow Imbalance: microstructure mean-reversion / momentum on
//!   order-book flow signals
//!
//! [`Strategy`]: norn_core::strategy::Strategy

pub mod order_flow;

pub use order_flow::{OrderFlowConfig, OrderFlowImbalanceStrategy};
