//! Order Flow Imbalance strategy
//!
//! Trades temporary supply/demand imbalances read from the order book:
//!
//! 1. Order Flow Imbalance (OFI): net change in resting bid/ask size
//!    across consecutive snapshots, weighted by level depth
//! 2. Bid-ask depth imbalance: resting size ratio at the top of book
//! 3. Flow toxicity: VPIN-style signed-volume imbalance, separating
//!    informed from uninformed flow
//!
//! Uninformed extremes are faded (mean reversion); informed extremes are
//! followed (momentum). Entries are passive limits at the touch; exits are
//! market orders on a hold-time, take-profit or stop-loss trigger.

use chrono::{DateTime, Duration, Utc};
use norn_core::core::{Order, OrderBookSnapshot, Side, Trade};
use norn_core::strategy::{Strategy, StrategyContext};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Order Flow Imbalance strategy parameters
#[derive(Debug, Clone)]
pub struct OrderFlowConfig {
    pub symbol: String,
    /// Trades retained for the toxicity estimate
    pub lookback_window: usize,
    /// OFI z-score that constitutes an extreme
    pub ofi_threshold: f64,
    /// OFI observations needed before signals fire
    pub min_ofi_history: usize,
    pub position_size: Decimal,
    /// Time-based exit
    pub hold_time: Duration,
    /// Fractional take-profit / stop-loss levels
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Toxicity below this is treated as uninformed flow
    pub toxicity_cutoff: f64,
    /// Book levels compared for the OFI calculation
    pub depth_levels: usize,
}

impl OrderFlowConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        use rust_decimal_macros::dec;
        Self {
            symbol: symbol.into(),
            lookback_window: 100,
            ofi_threshold: 2.0,
            min_ofi_history: 20,
            position_size: dec!(1),
            hold_time: Duration::seconds(60),
            take_profit_pct: 0.001,
            stop_loss_pct: 0.002,
            toxicity_cutoff: 0.5,
            depth_levels: 10,
        }
    }
}

/// Microstructure strategy trading order-flow imbalance extremes
pub struct OrderFlowImbalanceStrategy {
    config: OrderFlowConfig,
    previous_book: Option<OrderBookSnapshot>,
    ofi_history: VecDeque<f64>,
    recent_trades: VecDeque<(Side, Decimal)>,

    entry_time: Option<DateTime<Utc>>,
    entry_price: Option<Decimal>,
    /// Signed working/held quantity the strategy believes it has
    net_position: Decimal,

    pub signals_generated: u64,
}

impl OrderFlowImbalanceStrategy {
    pub fn new(config: OrderFlowConfig) -> Self {
        info!(
            symbol = %config.symbol,
            threshold = config.ofi_threshold,
            "order flow imbalance strategy initialized"
        );
        Self {
            previous_book: None,
            ofi_history: VecDeque::with_capacity(config.min_ofi_history * 2),
            recent_trades: VecDeque::with_capacity(config.lookback_window),
            entry_time: None,
            entry_price: None,
            net_position: Decimal::ZERO,
            signals_generated: 0,
            config,
        }
    }

    /// Net change in resting size across consecutive snapshots, weighted
    /// by inverse level depth. Positive = building bid-side pressure.
    fn order_flow_imbalance(&self, current: &OrderBookSnapshot) -> Option<f64> {
        let previous = self.previous_book.as_ref()?;
        let mut ofi = 0.0;
        let levels = self.config.depth_levels;

        for (i, (curr, prev)) in current
            .bids
            .iter()
            .zip(previous.bids.iter())
            .take(levels)
            .enumerate()
        {
            if curr.price == prev.price {
                let change = (curr.size - prev.size).to_f64().unwrap_or(0.0);
                ofi += change / (i + 1) as f64;
            }
        }
        for (i, (curr, prev)) in current
            .asks
            .iter()
            .zip(previous.asks.iter())
            .take(levels)
            .enumerate()
        {
            if curr.price == prev.price {
                let change = (curr.size - prev.size).to_f64().unwrap_or(0.0);
                ofi -= change / (i + 1) as f64;
            }
        }
        Some(ofi)
    }

    /// Depth ratio bid/ask over the configured levels; > 1 is buy pressure
    fn bid_ask_imbalance(&self, book: &OrderBookSnapshot) -> f64 {
        let levels = self.config.depth_levels;
        let bid_depth: Decimal = book.bids.iter().take(levels).map(|l| l.size).sum();
        let ask_depth: Decimal = book.asks.iter().take(levels).map(|l| l.size).sum();
        if ask_depth.is_zero() {
            return 0.0;
        }
        (bid_depth / ask_depth).to_f64().unwrap_or(0.0)
    }

    /// VPIN-style toxicity: |buy - sell| / total over the trade window
    fn flow_toxicity(&self) -> f64 {
        let mut buy = Decimal::ZERO;
        let mut sell = Decimal::ZERO;
        for (side, size) in &self.recent_trades {
            match side {
                Side::Buy => buy += *size,
                Side::Sell => sell += *size,
            }
        }
        let total = buy + sell;
        if total.is_zero() {
            return 0.0;
        }
        ((buy - sell).abs() / total).to_f64().unwrap_or(0.0)
    }

    fn ofi_zscore(&self) -> Option<f64> {
        if self.ofi_history.len() < self.config.min_ofi_history {
            return None;
        }
        let n = self.ofi_history.len() as f64;
        let mean = self.ofi_history.iter().sum::<f64>() / n;
        let variance = self
            .ofi_history
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = variance.sqrt();
        if std == 0.0 {
            return None;
        }
        Some((self.ofi_history.back()? - mean) / std)
    }

    fn enter(&mut self, side: Side, book: &OrderBookSnapshot, ctx: &mut StrategyContext<'_>) {
        // Passive at the touch for maker fees
        let price = match side {
            Side::Buy => book.best_bid().map(|l| l.price),
            Side::Sell => book.best_ask().map(|l| l.price),
        };
        let Some(price) = price else { return };
        self.signals_generated += 1;
        info!(
            symbol = %self.config.symbol,
            side = %side,
            price = %price,
            "order flow entry signal"
        );
        ctx.submit_order(Order::limit(
            self.config.symbol.clone(),
            side,
            self.config.position_size,
            price,
            ctx.now,
        ));
        self.net_position = side.sign() * self.config.position_size;
        self.entry_time = Some(ctx.now);
        self.entry_price = Some(price);
    }

    fn exit(&mut self, reason: &str, ctx: &mut StrategyContext<'_>) {
        if self.net_position.is_zero() {
            return;
        }
        let side = if self.net_position > Decimal::ZERO {
            Side::Sell
        } else {
            Side::Buy
        };
        info!(symbol = %self.config.symbol, reason, "order flow exit");
        ctx.submit_order(Order::market(
            self.config.symbol.clone(),
            side,
            self.net_position.abs(),
            ctx.now,
        ));
        self.net_position = Decimal::ZERO;
        self.entry_time = None;
        self.entry_price = None;
    }
}

impl Strategy for OrderFlowImbalanceStrategy {
    fn name(&self) -> &'static str {
        "order-flow-imbalance"
    }

    fn on_trade(&mut self, trade: &Trade, ctx: &mut StrategyContext<'_>) {
        if trade.symbol != self.config.symbol {
            return;
        }
        if self.recent_trades.len() == self.config.lookback_window {
            self.recent_trades.pop_front();
        }
        self.recent_trades.push_back((trade.side, trade.size));

        // Exit management against the tape
        if self.net_position.is_zero() {
            return;
        }
        if let Some(entry_time) = self.entry_time {
            if ctx.now - entry_time >= self.config.hold_time {
                self.exit("hold time elapsed", ctx);
                return;
            }
        }
        if let Some(entry_price) = self.entry_price {
            let mut pnl_pct = ((trade.price - entry_price) / entry_price)
                .to_f64()
                .unwrap_or(0.0);
            if self.net_position < Decimal::ZERO {
                pnl_pct = -pnl_pct;
            }
            if pnl_pct > self.config.take_profit_pct {
                self.exit("take profit", ctx);
            } else if pnl_pct < -self.config.stop_loss_pct {
                self.exit("stop loss", ctx);
            }
        }
    }

    fn on_orderbook_update(&mut self, snapshot: &OrderBookSnapshot, ctx: &mut StrategyContext<'_>) {
        if snapshot.symbol != self.config.symbol {
            return;
        }
        if let Some(ofi) = self.order_flow_imbalance(snapshot) {
            if self.ofi_history.len() == self.config.lookback_window {
                self.ofi_history.pop_front();
            }
            self.ofi_history.push_back(ofi);
        }
        let previous = self.previous_book.replace(snapshot.clone());

        if previous.is_none() || !self.net_position.is_zero() {
            return;
        }
        let Some(zscore) = self.ofi_zscore() else {
            return;
        };
        if zscore.abs() < self.config.ofi_threshold {
            return;
        }

        let imbalance = self.bid_ask_imbalance(snapshot);
        let toxicity = self.flow_toxicity();
        debug!(zscore, imbalance, toxicity, "order flow extreme");

        if toxicity < self.config.toxicity_cutoff {
            // Uninformed flow: fade the extreme
            let side = if zscore > 0.0 { Side::Sell } else { Side::Buy };
            self.enter(side, snapshot, ctx);
        } else {
            // Informed flow: follow it, with the depth confirming
            if zscore > 0.0 && imbalance > 1.2 {
                self.enter(Side::Buy, snapshot, ctx);
            } else if zscore < 0.0 && imbalance < 0.8 {
                self.enter(Side::Sell, snapshot, ctx);
            }
        }
    }
}
