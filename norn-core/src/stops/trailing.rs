use crate::core::{Order, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// How the stop distance is computed from the favourable extremum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingType {
    /// Fixed price distance below/above the extremum
    FixedDistance,
    /// Fractional distance below/above the extremum
    Percentage,
    /// Stop steps from entry in fixed profit increments
    StepTrail,
    /// Percentage distance that tightens as profit grows
    VolatilityAdjusted,
    /// Reserved for an ATR feed; behaves as Percentage until one exists
    AtrBased,
}

/// When the trailing stop arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingMode {
    /// Active from position open
    Immediate,
    /// Active once unrealized profit reaches `activation_profit_pct`
    ProfitThreshold,
    /// Active once price crosses entry by `breakeven_buffer_pct`
    BreakevenPlus,
}

/// Trailing stop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    pub trailing_type: TrailingType,
    pub trailing_mode: TrailingMode,

    /// Fractional distance for Percentage / VolatilityAdjusted
    pub trailing_distance: Decimal,
    /// Absolute price distance for FixedDistance
    pub trailing_distance_pips: Decimal,

    /// Profit fraction that arms ProfitThreshold mode
    pub activation_profit_pct: Decimal,
    /// Buffer past entry that arms BreakevenPlus mode
    pub breakeven_buffer_pct: Decimal,

    /// StepTrail: stop advances `step_size * entry` per `step_interval`
    /// of profit
    pub step_size: Decimal,
    pub step_interval: Decimal,

    /// VolatilityAdjusted never trails wider than this
    pub max_trailing_distance: Decimal,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            trailing_type: TrailingType::Percentage,
            trailing_mode: TrailingMode::Immediate,
            trailing_distance: dec!(0.02),
            trailing_distance_pips: dec!(0.10),
            activation_profit_pct: dec!(0.01),
            breakeven_buffer_pct: dec!(0.005),
            step_size: dec!(0.01),
            step_interval: dec!(0.02),
            max_trailing_distance: dec!(0.05),
        }
    }
}

/// Live trailing stop bound to one position
#[derive(Debug, Clone)]
pub struct TrailingStop {
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,

    pub current_stop_price: Decimal,
    /// Highest price since entry (long positions)
    pub highest_price: Decimal,
    /// Lowest price since entry (short positions)
    pub lowest_price: Decimal,

    pub config: TrailingStopConfig,

    pub is_active: bool,
    pub activation_time: Option<DateTime<Utc>>,
    pub last_adjustment_time: DateTime<Utc>,
    pub adjustment_count: u32,

    pub max_profit_pct: Decimal,
    pub current_profit_pct: Decimal,
    /// Profit fraction locked in by the stop; monotone non-decreasing
    pub protected_profit_pct: Decimal,
}

/// Manages the full set of trailing stops. The owner polls
/// [`TrailingStopManager::update_price`] (or [`poll`]) on each price tick;
/// a returned order is the market close to submit.
///
/// [`poll`]: TrailingStopManager::poll
pub struct TrailingStopManager {
    default_config: TrailingStopConfig,
    stops: HashMap<String, TrailingStop>,

    pub total_adjustments: u64,
    pub total_stops_triggered: u64,
}

impl Default for TrailingStopManager {
    fn default() -> Self {
        Self::new(TrailingStopConfig::default())
    }
}

impl TrailingStopManager {
    pub fn new(default_config: TrailingStopConfig) -> Self {
        Self {
            default_config,
            stops: HashMap::new(),
            total_adjustments: 0,
            total_stops_triggered: 0,
        }
    }

    pub fn stop(&self, position_id: &str) -> Option<&TrailingStop> {
        self.stops.get(position_id)
    }

    pub fn active_count(&self) -> usize {
        self.stops.len()
    }

    /// Start trailing a position. The initial stop sits one configured
    /// distance away from entry on the adverse side.
    pub fn add_position(
        &mut self,
        position_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        config: Option<TrailingStopConfig>,
        now: DateTime<Utc>,
    ) -> &TrailingStop {
        let position_id = position_id.into();
        let config = config.unwrap_or_else(|| self.default_config.clone());

        let (initial_stop, highest, lowest) = match side {
            Side::Buy => (
                entry_price * (Decimal::ONE - config.trailing_distance),
                entry_price,
                Decimal::ZERO,
            ),
            Side::Sell => (
                entry_price * (Decimal::ONE + config.trailing_distance),
                Decimal::ZERO,
                entry_price,
            ),
        };

        let is_active = config.trailing_mode == TrailingMode::Immediate;
        let stop = TrailingStop {
            position_id: position_id.clone(),
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            current_stop_price: initial_stop,
            highest_price: highest,
            lowest_price: lowest,
            config,
            is_active,
            activation_time: is_active.then_some(now),
            last_adjustment_time: now,
            adjustment_count: 0,
            max_profit_pct: Decimal::ZERO,
            current_profit_pct: Decimal::ZERO,
            protected_profit_pct: Decimal::ZERO,
        };
        info!(
            position = %position_id,
            symbol = %stop.symbol,
            side = %side,
            entry = %entry_price,
            stop = %initial_stop,
            "trailing stop added"
        );
        self.stops.entry(position_id).or_insert(stop)
    }

    /// Remove a position from management (position closed by other means)
    pub fn remove_position(&mut self, position_id: &str) -> Option<TrailingStop> {
        let removed = self.stops.remove(position_id);
        if removed.is_some() {
            info!(position = %position_id, "trailing stop removed");
        }
        removed
    }

    /// Feed a price observation for one position. Updates the extremum,
    /// checks activation, tightens the stop if warranted, and returns the
    /// market close order when the stop triggers (destroying the record).
    pub fn update_price(
        &mut self,
        position_id: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Order> {
        let stop = self.stops.get_mut(position_id)?;

        // Profit bookkeeping
        let profit_pct = match stop.side {
            Side::Buy => (price - stop.entry_price) / stop.entry_price,
            Side::Sell => (stop.entry_price - price) / stop.entry_price,
        };
        stop.current_profit_pct = profit_pct;
        stop.max_profit_pct = stop.max_profit_pct.max(profit_pct);

        // Extremum update, side-appropriate
        match stop.side {
            Side::Buy => {
                if price > stop.highest_price {
                    stop.highest_price = price;
                }
            }
            Side::Sell => {
                if stop.lowest_price.is_zero() || price < stop.lowest_price {
                    stop.lowest_price = price;
                }
            }
        }

        // Activation
        if !stop.is_active && Self::should_activate(stop, price) {
            stop.is_active = true;
            stop.activation_time = Some(now);
            info!(
                position = %position_id,
                profit_pct = %profit_pct,
                "trailing stop activated"
            );
        }

        // Tighten-only adjustment
        if stop.is_active {
            let candidate = Self::candidate_stop(stop);
            let improved = match stop.side {
                Side::Buy => candidate > stop.current_stop_price,
                Side::Sell => candidate < stop.current_stop_price,
            };
            if improved {
                stop.current_stop_price = candidate;
                stop.last_adjustment_time = now;
                stop.adjustment_count += 1;
                self.total_adjustments += 1;

                let protected = match stop.side {
                    Side::Buy => (candidate - stop.entry_price) / stop.entry_price,
                    Side::Sell => (stop.entry_price - candidate) / stop.entry_price,
                };
                stop.protected_profit_pct = stop.protected_profit_pct.max(protected);
            }
        }

        // Trigger check
        let triggered = stop.is_active
            && match stop.side {
                Side::Buy => price <= stop.current_stop_price,
                Side::Sell => price >= stop.current_stop_price,
            };
        if !triggered {
            return None;
        }

        let stop = self.stops.remove(position_id)?;
        self.total_stops_triggered += 1;
        warn!(
            position = %position_id,
            price = %price,
            stop_price = %stop.current_stop_price,
            protected = %stop.protected_profit_pct,
            "trailing stop triggered"
        );
        Some(Order::market(
            stop.symbol.clone(),
            stop.side.opposite(),
            stop.quantity,
            now,
        ))
    }

    /// Run one repricing cycle over every tracked position. Returns the
    /// close orders for any stops that triggered.
    pub fn poll(&mut self, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) -> Vec<Order> {
        let ids: Vec<String> = self.stops.keys().cloned().collect();
        let mut closes = Vec::new();
        for id in ids {
            let Some(symbol) = self.stops.get(&id).map(|s| s.symbol.clone()) else {
                continue;
            };
            let Some(price) = prices.get(&symbol) else {
                continue;
            };
            if let Some(order) = self.update_price(&id, *price, now) {
                closes.push(order);
            }
        }
        closes
    }

    fn should_activate(stop: &TrailingStop, price: Decimal) -> bool {
        match stop.config.trailing_mode {
            TrailingMode::Immediate => true,
            TrailingMode::ProfitThreshold => {
                stop.current_profit_pct >= stop.config.activation_profit_pct
            }
            TrailingMode::BreakevenPlus => match stop.side {
                Side::Buy => {
                    price >= stop.entry_price * (Decimal::ONE + stop.config.breakeven_buffer_pct)
                }
                Side::Sell => {
                    price <= stop.entry_price * (Decimal::ONE - stop.config.breakeven_buffer_pct)
                }
            },
        }
    }

    /// Candidate stop from the configured trailing type. Monotonicity is
    /// enforced by the caller.
    fn candidate_stop(stop: &TrailingStop) -> Decimal {
        let config = &stop.config;
        match config.trailing_type {
            TrailingType::FixedDistance => match stop.side {
                Side::Buy => stop.highest_price - config.trailing_distance_pips,
                Side::Sell => stop.lowest_price + config.trailing_distance_pips,
            },
            TrailingType::StepTrail => {
                let profit_pct = match stop.side {
                    Side::Buy => (stop.highest_price - stop.entry_price) / stop.entry_price,
                    Side::Sell => (stop.entry_price - stop.lowest_price) / stop.entry_price,
                };
                let steps = (profit_pct / config.step_interval).floor();
                let offset = steps * config.step_size * stop.entry_price;
                match stop.side {
                    Side::Buy => stop.entry_price + offset,
                    Side::Sell => stop.entry_price - offset,
                }
            }
            TrailingType::VolatilityAdjusted => {
                use rust_decimal_macros::dec;
                // Tighten as profit grows
                let profit = stop.current_profit_pct.abs();
                let mut distance = if profit > dec!(0.05) {
                    config.trailing_distance * dec!(0.70)
                } else if profit > dec!(0.02) {
                    config.trailing_distance * dec!(0.85)
                } else {
                    config.trailing_distance
                };
                distance = distance.min(config.max_trailing_distance);
                match stop.side {
                    Side::Buy => stop.highest_price * (Decimal::ONE - distance),
                    Side::Sell => stop.lowest_price * (Decimal::ONE + distance),
                }
            }
            // No ATR feed yet: AtrBased degrades to Percentage
            TrailingType::Percentage | TrailingType::AtrBased => match stop.side {
                Side::Buy => stop.highest_price * (Decimal::ONE - config.trailing_distance),
                Side::Sell => stop.lowest_price * (Decimal::ONE + config.trailing_distance),
            },
        }
    }
}
