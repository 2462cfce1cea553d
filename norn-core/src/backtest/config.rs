use crate::core::{Instrument, Venue};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How an order's participation moves the market price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactModel {
    /// `impact = coef * participation * price`
    Linear,
    /// `impact = coef * sqrt(participation) * price`
    Sqrt,
    /// `impact = coef * participation * 0.5 * price`
    Permanent,
}

/// How execution price deviates from the decision price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlippageModel {
    /// Flat `price * bps / 10000`
    Fixed,
    /// Fixed scaled by `(1 + volatility)` when volatility is known
    Proportional,
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: Decimal,
    pub instruments: Vec<Instrument>,
    pub venues: Vec<Venue>,

    pub enable_market_impact: bool,
    pub market_impact_model: ImpactModel,
    pub impact_coefficient: f64,

    pub enable_slippage: bool,
    pub slippage_model: SlippageModel,
    pub slippage_bps: f64,

    pub enable_latency: bool,
    /// Order submission latency (ms)
    pub order_latency_ms: i64,
    /// Market data latency (ms)
    pub market_data_latency_ms: i64,

    pub enable_fees: bool,

    pub enable_partial_fills: bool,
    pub partial_fill_probability: f64,
    pub max_order_book_levels: usize,

    /// Derive L2 book updates from trade prints (an aggressive buy shrinks
    /// the ask top, an aggressive sell the bid top). A crude approximation;
    /// turn it off to move the book only on explicit book/quote ticks.
    pub derive_book_from_trades: bool,

    /// Seed for the slippage noise generator
    pub seed: u64,
}

impl BacktestConfig {
    pub fn new(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        initial_capital: Decimal,
    ) -> Self {
        Self {
            start_date,
            end_date,
            initial_capital,
            instruments: Vec::new(),
            venues: vec![Venue::new("BACKTEST", "Backtest Venue")],
            enable_market_impact: true,
            market_impact_model: ImpactModel::Sqrt,
            impact_coefficient: 0.1,
            enable_slippage: true,
            slippage_model: SlippageModel::Proportional,
            slippage_bps: 1.0,
            enable_latency: true,
            order_latency_ms: 5,
            market_data_latency_ms: 1,
            enable_fees: true,
            enable_partial_fills: true,
            partial_fill_probability: 0.15,
            max_order_book_levels: 20,
            derive_book_from_trades: true,
            seed: 0,
        }
    }

    /// A frictionless configuration: no impact, slippage, fees, latency or
    /// partial fills. The baseline for semantics tests.
    pub fn frictionless(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        initial_capital: Decimal,
    ) -> Self {
        let mut config = Self::new(start_date, end_date, initial_capital);
        config.enable_market_impact = false;
        config.enable_slippage = false;
        config.enable_latency = false;
        config.enable_fees = false;
        config.enable_partial_fills = false;
        config
    }

    pub fn default_venue(&self) -> &Venue {
        &self.venues[0]
    }
}
