use crate::core::{Fill, Order, OrderId, Side};
use crate::risk::position::Position;
use crate::risk::types::{BaselinePolicy, RateWindow, RiskLimits, RiskMetrics};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, info, warn};

/// Alert fires at this fraction of the daily loss limit
fn loss_alert_fraction() -> Decimal {
    Decimal::new(75, 2)
}

/// Pre-trade rejection reason. Every variant carries the triggering limit
/// so the rejection is actionable from the message alone.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RiskRejection {
    #[error("trading halted: {reason}")]
    TradingHalted { reason: String },
    #[error("price {price} deviates {deviation_pct}% from reference {reference} (limit {limit_pct}%)")]
    FatFingerPrice {
        price: Decimal,
        reference: Decimal,
        deviation_pct: Decimal,
        limit_pct: Decimal,
    },
    #[error("order value {notional} exceeds fat-finger threshold {threshold}")]
    FatFingerValue { notional: Decimal, threshold: Decimal },
    #[error("order size {quantity} outside [{min}, {max}]")]
    OrderSizeOutOfRange {
        quantity: Decimal,
        min: Decimal,
        max: Decimal,
    },
    #[error("order value {notional} outside [{min}, {max}]")]
    OrderValueOutOfRange {
        notional: Decimal,
        min: Decimal,
        max: Decimal,
    },
    #[error("projected position {projected} would exceed limit {limit}")]
    PositionLimit { projected: Decimal, limit: Decimal },
    #[error("projected exposure {projected} would exceed limit {limit}")]
    ExposureLimit { projected: Decimal, limit: Decimal },
    #[error("daily loss {loss} exceeds limit {limit}")]
    DailyLossLimit { loss: Decimal, limit: Decimal },
    #[error("daily volume {projected} would exceed limit {limit}")]
    DailyVolumeLimit { projected: Decimal, limit: Decimal },
    #[error("daily trade count {count} at limit {limit}")]
    TradeCountLimit { count: u32, limit: u32 },
    #[error("order rate limit {limit}/s reached")]
    OrderRateLimit { limit: u32 },
    #[error("cancel rate limit {limit}/s reached")]
    CancelRateLimit { limit: u32 },
    #[error("concentration {fraction} would exceed limit {limit}")]
    ConcentrationLimit { fraction: Decimal, limit: Decimal },
    #[error("drawdown {drawdown} exceeds limit {limit}")]
    DrawdownLimit { drawdown: Decimal, limit: Decimal },
    #[error("invalid price {price}")]
    InvalidPrice { price: Decimal },
    #[error("price {price} outside valid band [{lower}, {upper}]")]
    PriceOutOfBand {
        price: Decimal,
        lower: Decimal,
        upper: Decimal,
    },
    #[error("order would self-trade against open order {opposing}")]
    SelfTrade { opposing: OrderId },
}

/// Hard-stop risk manager: the synchronous pre-trade gate plus post-trade
/// position and P&L tracking.
pub struct RiskManager {
    limits: RiskLimits,
    baseline_policy: BaselinePolicy,

    initial_capital: Decimal,
    /// Baseline plus crystallized P&L; excludes unrealized
    current_capital: Decimal,

    positions: HashMap<String, Position>,
    reference_prices: HashMap<String, Decimal>,
    total_exposure: Decimal,

    daily_volume: Decimal,
    daily_trades: u32,
    daily_high_equity: Decimal,

    rate: RateWindow,

    halted: bool,
    halt_reason: Option<String>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, initial_capital: Decimal) -> Self {
        Self {
            limits,
            baseline_policy: BaselinePolicy::default(),
            initial_capital,
            current_capital: initial_capital,
            positions: HashMap::new(),
            reference_prices: HashMap::new(),
            total_exposure: Decimal::ZERO,
            daily_volume: Decimal::ZERO,
            daily_trades: 0,
            daily_high_equity: initial_capital,
            rate: RateWindow::default(),
            halted: false,
            halt_reason: None,
        }
    }

    pub fn with_baseline_policy(mut self, policy: BaselinePolicy) -> Self {
        self.baseline_policy = policy;
        self
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn reference_price(&self, symbol: &str) -> Option<Decimal> {
        self.reference_prices.get(symbol).copied()
    }

    /// Realized-only capital (baseline plus crystallized P&L)
    pub fn current_capital(&self) -> Decimal {
        self.current_capital
    }

    /// Capital plus unrealized P&L across all positions
    pub fn equity(&self) -> Decimal {
        let unrealized: Decimal = self.positions.values().map(|p| p.unrealized_pnl).sum();
        self.current_capital + unrealized
    }

    /// Realized plus unrealized P&L since the daily baseline
    pub fn daily_pnl(&self) -> Decimal {
        self.equity() - self.initial_capital
    }

    /// Comprehensive pre-trade check. All checks run in order; the first
    /// failure is returned and the order must be stamped REJECTED by the
    /// caller. Nothing else changes on rejection (the rate counter, which
    /// meters admission attempts, is the one exception).
    pub fn pre_trade_check(
        &mut self,
        order: &Order,
        open_orders: &[&Order],
        now: DateTime<Utc>,
    ) -> Result<(), RiskRejection> {
        // 1. Circuit breaker
        if self.halted {
            return Err(RiskRejection::TradingHalted {
                reason: self
                    .halt_reason
                    .clone()
                    .unwrap_or_else(|| "circuit breaker tripped".into()),
            });
        }

        let reference = self.reference_prices.get(&order.symbol).copied();
        // Notional prices the order at its limit, falling back to the
        // reference price for market orders
        let pricing = order.price.or(reference).unwrap_or(Decimal::ZERO);
        let notional = order.quantity * pricing;

        // 2. Fat finger: limit price far from reference, or absurd notional
        if let (Some(price), Some(reference)) = (order.price, reference) {
            if !reference.is_zero() {
                let deviation = (price - reference).abs() / reference;
                if deviation > self.limits.max_price_deviation {
                    return Err(RiskRejection::FatFingerPrice {
                        price,
                        reference,
                        deviation_pct: deviation * Decimal::ONE_HUNDRED,
                        limit_pct: self.limits.max_price_deviation * Decimal::ONE_HUNDRED,
                    });
                }
            }
        }
        let fat_finger_threshold = self.limits.max_order_value * Decimal::TEN;
        if notional > fat_finger_threshold {
            return Err(RiskRejection::FatFingerValue {
                notional,
                threshold: fat_finger_threshold,
            });
        }

        // 3. Order size
        if order.quantity < self.limits.min_order_size
            || order.quantity > self.limits.max_order_size
        {
            return Err(RiskRejection::OrderSizeOutOfRange {
                quantity: order.quantity,
                min: self.limits.min_order_size,
                max: self.limits.max_order_size,
            });
        }

        // 4. Order value
        if notional < self.limits.min_order_value || notional > self.limits.max_order_value {
            return Err(RiskRejection::OrderValueOutOfRange {
                notional,
                min: self.limits.min_order_value,
                max: self.limits.max_order_value,
            });
        }

        // 5. Position and exposure
        let current = self
            .positions
            .get(&order.symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let delta = order.side.sign() * order.quantity;
        let projected = current + delta;
        if projected.abs() > self.limits.max_position_size {
            return Err(RiskRejection::PositionLimit {
                projected,
                limit: self.limits.max_position_size,
            });
        }
        let projected_exposure = self.total_exposure + notional;
        if projected_exposure > self.limits.max_total_exposure {
            return Err(RiskRejection::ExposureLimit {
                projected: projected_exposure,
                limit: self.limits.max_total_exposure,
            });
        }

        // 6. Daily loss (also trips the breaker)
        let daily_pnl = self.daily_pnl();
        if daily_pnl < -self.limits.max_daily_loss {
            let loss = -daily_pnl;
            self.trip_breaker(format!(
                "daily loss {} exceeds limit {}",
                loss, self.limits.max_daily_loss
            ));
            return Err(RiskRejection::DailyLossLimit {
                loss,
                limit: self.limits.max_daily_loss,
            });
        }

        // 7. Daily volume and trade count
        let projected_volume = self.daily_volume + notional;
        if projected_volume > self.limits.max_daily_volume {
            return Err(RiskRejection::DailyVolumeLimit {
                projected: projected_volume,
                limit: self.limits.max_daily_volume,
            });
        }
        if self.daily_trades >= self.limits.max_trades_per_day {
            return Err(RiskRejection::TradeCountLimit {
                count: self.daily_trades,
                limit: self.limits.max_trades_per_day,
            });
        }

        // 8. Order rate (wall-clock second epoch)
        if !self.rate.try_order(now, self.limits.max_orders_per_second) {
            return Err(RiskRejection::OrderRateLimit {
                limit: self.limits.max_orders_per_second,
            });
        }

        // 9. Concentration
        if !self.total_exposure.is_zero() {
            let symbol_value = self
                .positions
                .get(&order.symbol)
                .and_then(|p| reference.map(|r| p.notional(r)))
                .unwrap_or(Decimal::ZERO);
            let projected_symbol_value = symbol_value + notional;
            let denominator = self.total_exposure + notional;
            if !denominator.is_zero() {
                let fraction = projected_symbol_value / denominator;
                if fraction > self.limits.max_concentration {
                    return Err(RiskRejection::ConcentrationLimit {
                        fraction,
                        limit: self.limits.max_concentration,
                    });
                }
            }
        }

        // 10. Drawdown from daily high (also trips the breaker)
        if self.daily_high_equity > Decimal::ZERO {
            let drawdown = (self.daily_high_equity - self.equity()) / self.daily_high_equity;
            if drawdown > self.limits.max_drawdown_pct {
                self.trip_breaker(format!(
                    "drawdown {} exceeds limit {}",
                    drawdown, self.limits.max_drawdown_pct
                ));
                return Err(RiskRejection::DrawdownLimit {
                    drawdown,
                    limit: self.limits.max_drawdown_pct,
                });
            }
        }

        // 11. Price validity
        if let Some(price) = order.price {
            if price <= Decimal::ZERO {
                return Err(RiskRejection::InvalidPrice { price });
            }
            if let Some(reference) = reference {
                let half = Decimal::new(5, 1); // 0.5
                let lower = reference * (Decimal::ONE - half);
                let upper = reference * (Decimal::ONE + half);
                if price < lower || price > upper {
                    return Err(RiskRejection::PriceOutOfBand { price, lower, upper });
                }
            }
        }

        // 12. Self-trade
        if let Some(price) = order.price {
            for open in open_orders {
                if open.symbol != order.symbol
                    || open.side == order.side
                    || !open.is_active()
                {
                    continue;
                }
                let Some(open_price) = open.price else { continue };
                let crosses = match order.side {
                    Side::Buy => price >= open_price,
                    Side::Sell => price <= open_price,
                };
                if crosses {
                    return Err(RiskRejection::SelfTrade {
                        opposing: open.order_id,
                    });
                }
            }
        }

        Ok(())
    }

    /// Rate-limit gate for cancel requests
    pub fn pre_cancel_check(&mut self, now: DateTime<Utc>) -> Result<(), RiskRejection> {
        if self.halted {
            // Cancels are always allowed while halted: they reduce risk
            return Ok(());
        }
        if !self.rate.try_cancel(now, self.limits.max_cancels_per_second) {
            return Err(RiskRejection::CancelRateLimit {
                limit: self.limits.max_cancels_per_second,
            });
        }
        Ok(())
    }

    /// Post-trade update: apply a fill to the position book, roll the daily
    /// counters and re-check loss thresholds.
    pub fn on_fill(&mut self, fill: &Fill) {
        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::new(fill.symbol.clone(), fill.timestamp));
        let realized = position.apply_fill(
            fill.side,
            fill.quantity,
            fill.price,
            fill.commission,
            fill.timestamp,
        );
        self.current_capital += realized;
        self.daily_volume += fill.notional();
        self.daily_trades += 1;

        info!(
            symbol = %fill.symbol,
            side = %fill.side,
            qty = %fill.quantity,
            price = %fill.price,
            realized = %realized,
            "fill processed"
        );

        self.recalculate_exposure();
        self.roll_equity_watermark();
        self.check_loss_thresholds();
    }

    /// Update the reference/mark price for a symbol, recomputing unrealized
    /// P&L and the equity watermark.
    pub fn update_mark_price(&mut self, symbol: &str, price: Decimal, now: DateTime<Utc>) {
        self.reference_prices.insert(symbol.to_string(), price);
        if let Some(position) = self.positions.get_mut(symbol) {
            position.mark(price, now);
        }
        self.recalculate_exposure();
        self.roll_equity_watermark();
        self.check_loss_thresholds();
    }

    fn recalculate_exposure(&mut self) {
        self.total_exposure = self
            .positions
            .values()
            .map(|p| {
                let mark = self
                    .reference_prices
                    .get(&p.symbol)
                    .copied()
                    .unwrap_or(p.avg_entry_price);
                p.notional(mark)
            })
            .sum();
    }

    fn roll_equity_watermark(&mut self) {
        let equity = self.equity();
        if equity > self.daily_high_equity {
            self.daily_high_equity = equity;
        }
    }

    fn check_loss_thresholds(&mut self) {
        let daily_pnl = self.daily_pnl();
        if daily_pnl < -self.limits.max_daily_loss {
            self.trip_breaker(format!(
                "daily loss {} exceeds limit {}",
                -daily_pnl, self.limits.max_daily_loss
            ));
            return;
        }
        let alert_at = self.limits.max_daily_loss * loss_alert_fraction();
        if daily_pnl < -alert_at {
            warn!(
                daily_pnl = %daily_pnl,
                limit = %self.limits.max_daily_loss,
                "daily loss approaching limit"
            );
        }
    }

    /// Halt all further admissions. Requires an operator reset to recover.
    pub fn trip_breaker(&mut self, reason: impl Into<String>) {
        if self.halted {
            return;
        }
        let reason = reason.into();
        error!("CIRCUIT BREAKER TRIPPED: {}", reason);
        self.halted = true;
        self.halt_reason = Some(reason);
    }

    /// Operator-initiated breaker reset. There is no automatic recovery.
    pub fn reset_breaker(&mut self) {
        info!("circuit breaker reset by operator");
        self.halted = false;
        self.halt_reason = None;
    }

    /// Daily reset: clears per-day counters, the high-equity watermark, the
    /// breaker and the rate windows. The capital baseline moves per the
    /// configured [`BaselinePolicy`] unless overridden here.
    pub fn reset_daily(&mut self, policy: Option<BaselinePolicy>) {
        let policy = policy.unwrap_or(self.baseline_policy);
        info!(
            final_daily_pnl = %self.daily_pnl(),
            ?policy,
            "daily risk reset"
        );
        if policy == BaselinePolicy::AdvanceToCurrent {
            self.initial_capital = self.current_capital;
        }
        self.daily_volume = Decimal::ZERO;
        self.daily_trades = 0;
        self.daily_high_equity = self.equity();
        self.rate = RateWindow::default();
        self.halted = false;
        self.halt_reason = None;
    }

    /// Point-in-time metrics report
    pub fn metrics(&self, now: DateTime<Utc>) -> RiskMetrics {
        RiskMetrics {
            timestamp: now,
            positions: self
                .positions
                .iter()
                .map(|(s, p)| (s.clone(), p.quantity))
                .collect(),
            total_exposure: self.total_exposure,
            daily_pnl: self.daily_pnl(),
            daily_volume: self.daily_volume,
            daily_trades: self.daily_trades,
            daily_high_equity: self.daily_high_equity,
            current_equity: self.equity(),
            orders_this_second: self.rate.orders_this_second(),
            cancels_this_second: self.rate.cancels_this_second(),
            is_halted: self.halted,
        }
    }
}
