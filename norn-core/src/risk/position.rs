use crate::core::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Net position in one symbol, maintained through cost-basis arithmetic on
/// each fill. Positive quantity is long, negative is short.
///
/// P&L carries execution fees only; there are no holding costs anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    /// Crystallized on closes, net of the closing fill's fee
    pub realized_pnl: Decimal,
    /// Mark-to-market on the open quantity
    pub unrealized_pnl: Decimal,
    pub last_update: DateTime<Utc>,
}

impl Position {
    pub fn new(symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_update: now,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// Gross notional at the given mark price
    pub fn notional(&self, mark: Decimal) -> Decimal {
        self.quantity.abs() * mark
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Apply a fill and return the realized P&L delta it produced.
    ///
    /// Same-sign fills (or fills into a flat book) extend the cost basis by
    /// weighted average. Opposite-sign fills close up to the held quantity,
    /// crystallizing `(close - entry) * closed_qty - fee` (sign-adjusted
    /// for shorts), then flip any remainder into a fresh position with its
    /// own cost basis.
    pub fn apply_fill(
        &mut self,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
        now: DateTime<Utc>,
    ) -> Decimal {
        let delta = side.sign() * quantity;
        self.last_update = now;

        // Extending (or opening) in the direction of the position
        if self.quantity.is_zero() || (self.quantity > Decimal::ZERO) == (delta > Decimal::ZERO) {
            let new_qty = self.quantity + delta;
            self.avg_entry_price = (self.avg_entry_price * self.quantity.abs()
                + price * quantity)
                / new_qty.abs();
            self.quantity = new_qty;
            return Decimal::ZERO;
        }

        // Closing against the position, possibly flipping through flat
        let closed = quantity.min(self.quantity.abs());
        let direction = if self.quantity > Decimal::ZERO {
            Decimal::ONE
        } else {
            -Decimal::ONE
        };
        let realized = (price - self.avg_entry_price) * closed * direction - fee;
        self.realized_pnl += realized;

        let remainder = quantity - closed;
        if remainder.is_zero() {
            self.quantity += delta;
            if self.quantity.is_zero() {
                self.avg_entry_price = Decimal::ZERO;
                self.unrealized_pnl = Decimal::ZERO;
            }
        } else {
            // Flip: the remainder opens a new position on the other side
            self.quantity = side.sign() * remainder;
            self.avg_entry_price = price;
            self.unrealized_pnl = Decimal::ZERO;
        }
        realized
    }

    /// Recompute unrealized P&L against a mark price
    pub fn mark(&mut self, price: Decimal, now: DateTime<Utc>) {
        self.unrealized_pnl = if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            (price - self.avg_entry_price) * self.quantity
        };
        self.last_update = now;
    }
}
