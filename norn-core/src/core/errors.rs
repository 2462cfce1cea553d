use crate::core::types::{OrderId, OrderStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Invalid input rejected synchronously at the originating operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("quantity {0} must be positive")]
    NonPositiveQuantity(Decimal),
    #[error("price {0} must be positive")]
    NonPositivePrice(Decimal),
    #[error("limit order requires a price")]
    MissingLimitPrice,
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
}

/// Order book protocol violations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookError {
    #[error("crossed book: bid {bid} >= ask {ask}")]
    Crossed { bid: Decimal, ask: Decimal },
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
    #[error("book is stale, awaiting full snapshot re-sync")]
    Stale,
}

/// Illegal order lifecycle mutation. The order remains in its prior state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("fill quantity must be positive")]
    ZeroFillQuantity,
    #[error("fill price must be positive")]
    ZeroFillPrice,
    #[error("fill quantity {fill_qty} exceeds remaining {remaining}")]
    FillExceedsRemaining { fill_qty: Decimal, remaining: Decimal },
}

/// Insufficient visible depth for a computation or a market fill
#[derive(Debug, Clone, PartialEq, Error)]
#[error("insufficient liquidity: requested {requested}, available {available}")]
pub struct LiquidityError {
    pub requested: Decimal,
    pub available: Decimal,
}

/// Venue-side failures. Network and timeout errors are retried with
/// exponential backoff (3 attempts, 10s aggregate) before the order is
/// marked rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("venue does not know order {0}")]
    UnknownOrder(OrderId),
    #[error("venue rejected order: {0}")]
    Rejected(String),
    #[error("venue request timed out")]
    Timeout,
}

impl VenueError {
    /// Whether a retry may succeed. Explicit rejects never retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::Network(_) | VenueError::Timeout)
    }
}

/// Tick store failures. Writes are buffered and retried on reopen; reads
/// fail fast to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt partition {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("invalid interval {0:?}: expected <n><s|m|h|d>")]
    InvalidInterval(String),
    #[error("no data for symbol {0}")]
    UnknownSymbol(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display() {
        let e = BookError::Crossed {
            bid: dec!(101),
            ask: dec!(100),
        };
        assert_eq!(e.to_string(), "crossed book: bid 101 >= ask 100");

        let e = StateError::IllegalTransition {
            from: OrderStatus::Filled,
            to: OrderStatus::New,
        };
        assert!(e.to_string().contains("FILLED -> NEW"));

        let e = LiquidityError {
            requested: dec!(100),
            available: dec!(40),
        };
        assert!(e.to_string().contains("requested 100"));
    }

    #[test]
    fn test_venue_error_retryable() {
        assert!(VenueError::Network("reset".into()).is_retryable());
        assert!(VenueError::Timeout.is_retryable());
        assert!(!VenueError::Rejected("bad px".into()).is_retryable());
        assert!(!VenueError::UnknownOrder(OrderId::new()).is_retryable());
    }
}
