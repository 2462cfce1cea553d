//! Core domain types
//!
//! Value types shared by every subsystem: order/fill/quote/trade records,
//! instrument and venue definitions, and the order lifecycle state machine.
//!
//! Records reference each other by id (`OrderId`, `FillId`), never by
//! pointer: tables own the records, which keeps lifetimes explicit and
//! avoids cyclic references between orders, fills and positions.

pub mod errors;
pub mod order;
pub mod types;

pub use errors::{BookError, LiquidityError, StateError, StoreError, ValidationError, VenueError};
pub use order::Order;
pub use types::{
    AssetClass, Fill, FillId, Instrument, LiquidityFlag, OrderBookLevel, OrderBookSnapshot,
    OrderId, OrderStatus, OrderType, Quote, Side, TimeInForce, Trade, Venue,
};
