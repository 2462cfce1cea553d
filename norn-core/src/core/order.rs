use crate::core::errors::StateError;
use crate::core::types::{OrderId, OrderStatus, OrderType, Side, TimeInForce};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An order owned by the execution engine until it reaches a terminal state.
///
/// Invariants maintained by the mutators here:
/// - `filled_quantity` is non-decreasing and never exceeds `quantity`
/// - `avg_fill_price` is the exact size-weighted mean of applied fills
/// - terminal states are irrevocable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub client_order_id: OrderId,
    pub symbol: String,
    pub venue_id: Option<String>,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    /// Size-weighted mean of applied fills; zero until the first fill
    pub avg_fill_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set on child orders spawned by an execution algorithm
    pub parent_order_id: Option<OrderId>,
    pub rejected_reason: Option<String>,
}

impl Order {
    /// Create a new limit order
    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            client_order_id: OrderId::new(),
            symbol: symbol.into(),
            venue_id: None,
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            time_in_force: TimeInForce::Day,
            status: OrderStatus::PendingNew,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            created_at: now,
            submitted_at: None,
            updated_at: None,
            parent_order_id: None,
            rejected_reason: None,
        }
    }

    /// Create a new market order
    pub fn market(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        let mut order = Self::limit(symbol, side, quantity, Decimal::ZERO, now);
        order.order_type = OrderType::Market;
        order.price = None;
        order.time_in_force = TimeInForce::Ioc;
        order
    }

    pub fn with_venue(mut self, venue_id: impl Into<String>) -> Self {
        self.venue_id = Some(venue_id.into());
        self
    }

    pub fn with_parent(mut self, parent_order_id: OrderId) -> Self {
        self.parent_order_id = Some(parent_order_id);
        self
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn with_stop_price(mut self, stop_price: Decimal) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    /// Unfilled quantity
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Whether the order has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the order can still receive fills
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::PendingNew
                | OrderStatus::New
                | OrderStatus::PartiallyFilled
                | OrderStatus::PendingCancel
        )
    }

    /// Notional at the limit price, or at `reference` for market orders
    pub fn notional(&self, reference: Decimal) -> Decimal {
        self.quantity * self.price.unwrap_or(reference)
    }

    /// Move the order through the lifecycle state machine.
    ///
    /// Fails with `StateError::IllegalTransition` (leaving the order
    /// untouched) when the state machine does not admit the transition.
    pub fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), StateError> {
        if !self.status.can_transition_to(to) {
            return Err(StateError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Some(now);
        Ok(())
    }

    /// Stamp the order rejected, preserving the reason.
    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(OrderStatus::Rejected, now)?;
        self.rejected_reason = Some(reason.into());
        Ok(())
    }

    /// Apply a fill, updating filled quantity, size-weighted average price
    /// and status. Returns the new status.
    ///
    /// Fills are only admitted in working states (NEW, PARTIALLY_FILLED, or
    /// PENDING_CANCEL for a fill that raced the cancel).
    pub fn apply_fill(
        &mut self,
        quantity: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus, StateError> {
        if quantity <= Decimal::ZERO {
            return Err(StateError::ZeroFillQuantity);
        }
        if price <= Decimal::ZERO {
            return Err(StateError::ZeroFillPrice);
        }
        let remaining = self.remaining_quantity();
        if quantity > remaining {
            return Err(StateError::FillExceedsRemaining {
                fill_qty: quantity,
                remaining,
            });
        }
        let target = if quantity == remaining {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        if !self.status.can_transition_to(target) {
            return Err(StateError::IllegalTransition {
                from: self.status,
                to: target,
            });
        }

        let filled_value = self.avg_fill_price * self.filled_quantity + price * quantity;
        self.filled_quantity += quantity;
        self.avg_fill_price = filled_value / self.filled_quantity;
        self.status = target;
        self.updated_at = Some(now);
        Ok(target)
    }
}
