use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that would match against this one
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed direction: +1 for buys, -1 for sells
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute at best available price
    Market,
    /// Limit order with specified price
    Limit,
    /// Stop order, becomes a market order when the stop price trades
    Stop,
    /// Stop order, becomes a limit order when the stop price trades
    StopLimit,
    /// Parent order executed by the iceberg algorithm
    Iceberg,
    /// Parent order executed by the TWAP algorithm
    Twap,
    /// Parent order executed by the VWAP algorithm
    Vwap,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::Iceberg => "ICEBERG",
            OrderType::Twap => "TWAP",
            OrderType::Vwap => "VWAP",
        };
        write!(f, "{}", s)
    }
}

/// Order lifecycle states
///
/// ```text
/// PendingNew ──▶ New ──▶ PartiallyFilled ──▶ Filled
///     │           │    │        │
///     │           │    │        └──▶ PendingCancel ──▶ Canceled
///     │           │    └──▶ PendingCancel ──▶ Canceled
///     │           └──▶ Canceled | Expired
///     └──▶ Rejected
/// ```
///
/// Filled, Canceled, Rejected and Expired are terminal; a transition out of
/// a terminal state fails with [`StateError::IllegalTransition`].
/// PartiallyFilled is re-entrant (repeated fills). A cancel reject moves
/// PendingCancel back to the prior working state.
///
/// [`StateError::IllegalTransition`]: crate::core::StateError::IllegalTransition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingNew,
    New,
    PartiallyFilled,
    Filled,
    PendingCancel,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Terminal states admit no further mutation
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Whether the state machine admits `self -> to`
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        if self == to {
            // Re-entrant partial fills only
            return self == PartiallyFilled;
        }
        match (self, to) {
            (PendingNew, New) | (PendingNew, Rejected) => true,
            (New, PartiallyFilled)
            | (New, Filled)
            | (New, PendingCancel)
            | (New, Canceled)
            | (New, Rejected)
            | (New, Expired) => true,
            (PartiallyFilled, Filled)
            | (PartiallyFilled, PendingCancel)
            | (PartiallyFilled, Canceled)
            | (PartiallyFilled, Expired) => true,
            // Cancel ack, cancel reject (back to a working state), or a fill
            // that raced the cancel
            (PendingCancel, Canceled)
            | (PendingCancel, New)
            | (PendingCancel, PartiallyFilled)
            | (PendingCancel, Filled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::PendingNew => "PENDING_NEW",
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

/// Time-in-force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Expires at end of trading day
    Day,
    /// Good-til-cancelled
    Gtc,
    /// Immediate-or-cancel
    Ioc,
    /// Fill-or-kill
    Fok,
    /// Good-til-date
    Gtd,
}

/// Whether a fill added or removed resting liquidity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityFlag {
    Maker,
    Taker,
}

/// Unique identifier for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OrderId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Unique identifier for a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FillId(Uuid);

impl FillId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FillId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset class of an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    Fx,
    Equity,
    Futures,
    Crypto,
}

/// Trading instrument. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub asset_class: AssetClass,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_order_qty: Decimal,
    pub max_order_qty: Decimal,
    pub contract_multiplier: Decimal,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, asset_class: AssetClass) -> Self {
        use rust_decimal_macros::dec;
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            asset_class,
            tick_size: dec!(0.01),
            lot_size: dec!(1),
            min_order_qty: dec!(1),
            max_order_qty: dec!(1_000_000),
            contract_multiplier: Decimal::ONE,
        }
    }
}

/// Exchange or liquidity venue. Immutable after construction.
///
/// Fees are execution-only fractions of notional (maker/taker). There are
/// no time-based carry, swap or financing costs anywhere in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub venue_id: String,
    pub name: String,
    pub is_dark_pool: bool,
    /// Fee fraction charged when the fill added liquidity (e.g. 0.0001 = 1bp)
    pub maker_fee: Decimal,
    /// Fee fraction charged when the fill removed liquidity
    pub taker_fee: Decimal,
    pub tick_size: Decimal,
    pub min_order_size: Decimal,
}

impl Venue {
    pub fn new(venue_id: impl Into<String>, name: impl Into<String>) -> Self {
        use rust_decimal_macros::dec;
        Self {
            venue_id: venue_id.into(),
            name: name.into(),
            is_dark_pool: false,
            maker_fee: dec!(0.0001),
            taker_fee: dec!(0.0002),
            tick_size: dec!(0.01),
            min_order_size: dec!(0.01),
        }
    }

    pub fn dark_pool(venue_id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut v = Self::new(venue_id, name);
        v.is_dark_pool = true;
        v
    }

    /// Fee rate for the given liquidity flag
    pub fn fee_rate(&self, flag: LiquidityFlag) -> Decimal {
        match flag {
            LiquidityFlag::Maker => self.maker_fee,
            LiquidityFlag::Taker => self.taker_fee,
        }
    }
}

/// Execution fill. Append-only and immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: FillId,
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub venue_id: String,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
    pub liquidity: LiquidityFlag,
}

impl Fill {
    pub fn new(
        order_id: OrderId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        venue_id: impl Into<String>,
        commission: Decimal,
        timestamp: DateTime<Utc>,
        liquidity: LiquidityFlag,
    ) -> Self {
        Self {
            fill_id: FillId::new(),
            order_id,
            symbol: symbol.into(),
            side,
            quantity,
            price,
            venue_id: venue_id.into(),
            commission,
            timestamp,
            liquidity,
        }
    }

    /// Notional value (price * quantity)
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    /// Signed position change: positive for buys, negative for sells
    pub fn position_change(&self) -> Decimal {
        self.side.sign() * self.quantity
    }

    /// Signed cash flow including commission.
    /// Buy: -(notional + fee). Sell: +(notional - fee).
    pub fn cash_flow(&self) -> Decimal {
        match self.side {
            Side::Buy => -(self.notional() + self.commission),
            Side::Sell => self.notional() - self.commission,
        }
    }
}

/// Level 1 quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub venue_id: String,
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn mid_price(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask_price - self.bid_price
    }
}

/// Public trade print (the tape). `side` is the aggressor side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub venue_id: String,
    pub trade_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
}

/// Single aggregated level in an L2 book.
///
/// A level with size zero is semantically absent and is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub order_count: u32,
}

impl OrderBookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self {
            price,
            size,
            order_count: 1,
        }
    }

    pub fn with_count(price: Decimal, size: Decimal, order_count: u32) -> Self {
        Self {
            price,
            size,
            order_count,
        }
    }
}

/// Immutable L2 book capture for handoff into strategies, analyzers and the
/// backtest fill simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub venue_id: String,
    /// Sorted descending by price
    pub bids: Vec<OrderBookLevel>,
    /// Sorted ascending by price
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Book-wide size imbalance in [-1, 1]; 0 when both sides are empty
    pub fn imbalance(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let bid: Decimal = self.bids.iter().map(|l| l.size).sum();
        let ask: Decimal = self.asks.iter().map(|l| l.size).sum();
        let total = bid + ask;
        if total.is_zero() {
            return 0.0;
        }
        ((bid - ask) / total).to_f64().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite_and_sign() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert_eq!(Side::Buy.sign(), dec!(1));
        assert_eq!(Side::Sell.sign(), dec!(-1));
    }

    #[test]
    fn test_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PendingCancel.is_terminal());
    }

    #[test]
    fn test_status_transitions() {
        use OrderStatus::*;
        assert!(PendingNew.can_transition_to(New));
        assert!(New.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(PartiallyFilled)); // re-entrant
        assert!(PartiallyFilled.can_transition_to(Filled));
        assert!(New.can_transition_to(PendingCancel));
        assert!(PendingCancel.can_transition_to(Canceled));
        assert!(PendingCancel.can_transition_to(PartiallyFilled)); // cancel reject

        // Terminal states admit nothing
        assert!(!Filled.can_transition_to(New));
        assert!(!Canceled.can_transition_to(PendingCancel));
        assert!(!Rejected.can_transition_to(New));
        // No skipping the ack
        assert!(!PendingNew.can_transition_to(Filled));
    }

    #[test]
    fn test_fill_cash_flow() {
        let fill = Fill::new(
            OrderId::new(),
            "BTC-USD",
            Side::Buy,
            dec!(0.1),
            dec!(50000),
            "SIM",
            dec!(10),
            Utc::now(),
            LiquidityFlag::Taker,
        );
        assert_eq!(fill.notional(), dec!(5000));
        assert_eq!(fill.position_change(), dec!(0.1));
        assert_eq!(fill.cash_flow(), dec!(-5010));

        let sell = Fill::new(
            OrderId::new(),
            "BTC-USD",
            Side::Sell,
            dec!(0.1),
            dec!(50000),
            "SIM",
            dec!(10),
            Utc::now(),
            LiquidityFlag::Maker,
        );
        assert_eq!(sell.position_change(), dec!(-0.1));
        assert_eq!(sell.cash_flow(), dec!(4990));
    }

    #[test]
    fn test_quote_mid_and_spread() {
        let q = Quote {
            symbol: "AAPL".into(),
            venue_id: "SIM".into(),
            bid_price: dec!(100.00),
            bid_size: dec!(10),
            ask_price: dec!(100.50),
            ask_size: dec!(15),
            timestamp: Utc::now(),
        };
        assert_eq!(q.mid_price(), dec!(100.25));
        assert_eq!(q.spread(), dec!(0.50));
    }

    #[test]
    fn test_snapshot_imbalance() {
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
            timestamp: Utc::now(),
            sequence_number: 1,
        };
        assert_eq!(snap.mid_price(), Some(dec!(100.25)));
        let imb = snap.imbalance();
        assert!((imb - (-10.0 / 70.0)).abs() < 1e-12);
    }

    #[test]
    fn test_venue_fee_rate() {
        let v = Venue::new("NYSE", "New York");
        assert_eq!(v.fee_rate(LiquidityFlag::Maker), dec!(0.0001));
        assert_eq!(v.fee_rate(LiquidityFlag::Taker), dec!(0.0002));
        assert!(!v.is_dark_pool);
        assert!(Venue::dark_pool("DPX", "Dark").is_dark_pool);
    }
}
