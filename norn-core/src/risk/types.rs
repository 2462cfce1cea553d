use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Risk limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum absolute signed position per symbol
    pub max_position_size: Decimal,
    /// Maximum total gross exposure across all positions
    pub max_total_exposure: Decimal,

    /// Maximum size per order
    pub max_order_size: Decimal,
    /// Minimum size per order
    pub min_order_size: Decimal,
    /// Maximum notional per order
    pub max_order_value: Decimal,
    /// Minimum notional per order
    pub min_order_value: Decimal,

    /// Maximum daily loss before the breaker trips
    pub max_daily_loss: Decimal,
    /// Maximum daily traded notional
    pub max_daily_volume: Decimal,
    /// Maximum trades per day
    pub max_trades_per_day: u32,

    /// Maximum fraction of total exposure in one symbol
    pub max_concentration: Decimal,

    /// Maximum fractional deviation of a limit price from the reference
    pub max_price_deviation: Decimal,

    /// Order / cancel submissions per wall-clock second
    pub max_orders_per_second: u32,
    pub max_cancels_per_second: u32,

    /// Maximum drawdown fraction from the daily high equity
    pub max_drawdown_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            max_position_size: dec!(1_000_000),
            max_total_exposure: dec!(10_000_000),
            max_order_size: dec!(100_000),
            min_order_size: dec!(100),
            max_order_value: dec!(1_000_000),
            min_order_value: dec!(10),
            max_daily_loss: dec!(50_000),
            max_daily_volume: dec!(50_000_000),
            max_trades_per_day: 10_000,
            max_concentration: dec!(0.3),
            max_price_deviation: dec!(0.05),
            max_orders_per_second: 100,
            max_cancels_per_second: 200,
            max_drawdown_pct: dec!(0.10),
        }
    }
}

/// What happens to the capital baseline on a daily reset.
///
/// The original system advanced the baseline to current capital, which
/// loses cumulative history; both behaviours are offered as an explicit
/// operator choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselinePolicy {
    /// `initial_capital = current_capital`: each day starts flat
    AdvanceToCurrent,
    /// Keep the original baseline: daily P&L accumulates across days
    RetainInitial,
}

impl Default for BaselinePolicy {
    fn default() -> Self {
        BaselinePolicy::AdvanceToCurrent
    }
}

/// Sliding per-second order/cancel counters.
///
/// The epoch is the wall-clock second (`timestamp.as_secs()`); counters
/// reset when the epoch changes, not one second after the last observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateWindow {
    epoch_sec: i64,
    orders: u32,
    cancels: u32,
}

impl RateWindow {
    fn roll(&mut self, now: DateTime<Utc>) {
        let epoch = now.timestamp();
        if epoch != self.epoch_sec {
            self.epoch_sec = epoch;
            self.orders = 0;
            self.cancels = 0;
        }
    }

    /// Count an order submission; false when the per-second limit is hit
    pub fn try_order(&mut self, now: DateTime<Utc>, limit: u32) -> bool {
        self.roll(now);
        if self.orders >= limit {
            return false;
        }
        self.orders += 1;
        true
    }

    /// Count a cancel; false when the per-second limit is hit
    pub fn try_cancel(&mut self, now: DateTime<Utc>, limit: u32) -> bool {
        self.roll(now);
        if self.cancels >= limit {
            return false;
        }
        self.cancels += 1;
        true
    }

    pub fn orders_this_second(&self) -> u32 {
        self.orders
    }

    pub fn cancels_this_second(&self) -> u32 {
        self.cancels
    }
}

/// Point-in-time risk metrics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub timestamp: DateTime<Utc>,
    /// Net signed position per symbol
    pub positions: HashMap<String, Decimal>,
    pub total_exposure: Decimal,
    pub daily_pnl: Decimal,
    pub daily_volume: Decimal,
    pub daily_trades: u32,
    pub daily_high_equity: Decimal,
    pub current_equity: Decimal,
    pub orders_this_second: u32,
    pub cancels_this_second: u32,
    pub is_halted: bool,
}
