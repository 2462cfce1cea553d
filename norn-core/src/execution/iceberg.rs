use crate::core::{Order, OrderId, OrderType, Side};
use crate::execution::algo::{child_order, AlgoAction, AlgoContext, ExecutionAlgorithm};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Iceberg algorithm parameters
#[derive(Debug, Clone)]
pub struct IcebergParams {
    /// Visible quantity per slice
    pub display_quantity: Decimal,
    /// Start a new display slice as soon as the previous one fills
    pub refresh_on_fill: bool,
    /// Multiplicative jitter on the display size, to frustrate
    /// size-detection heuristics (0.05 = +/-5%)
    pub variance: f64,
    pub min_display: Option<Decimal>,
    pub max_display: Option<Decimal>,
    /// Cancel-and-refresh timeout per slice
    pub slice_timeout: Duration,
    /// Seed for the display jitter; fixed seed, fixed sequence
    pub seed: u64,
}

impl IcebergParams {
    pub fn new(display_quantity: Decimal) -> Self {
        Self {
            display_quantity,
            refresh_on_fill: true,
            variance: 0.05,
            min_display: None,
            max_display: None,
            slice_timeout: Duration::seconds(60),
            seed: 0,
        }
    }
}

/// Iceberg execution: only a small display slice is ever working. When the
/// slice fills (or times out and is cancelled), the next one goes out with
/// a jittered size.
pub struct IcebergAlgorithm {
    parent_id: OrderId,
    params: IcebergParams,
    rng: ChaCha8Rng,
    /// Working display slice: (child id, placed at)
    active_child: Option<(OrderId, DateTime<Utc>)>,
    /// Cancel issued for the working slice, awaiting the ack
    cancel_pending: bool,
    stopped: bool,
}

impl IcebergAlgorithm {
    pub fn new(parent: &Order, params: IcebergParams) -> Self {
        info!(
            parent = %parent.order_id,
            display = %params.display_quantity,
            variance = params.variance,
            "iceberg execution started"
        );
        Self {
            parent_id: parent.order_id,
            rng: ChaCha8Rng::seed_from_u64(params.seed),
            params,
            active_child: None,
            cancel_pending: false,
            stopped: false,
        }
    }

    /// Next display size: base display with multiplicative jitter, clamped
    /// to the configured bounds and the remaining quantity.
    fn display_quantity(&mut self, remaining: Decimal) -> Decimal {
        let mut display = self.params.display_quantity.min(remaining);
        if self.params.variance > 0.0 {
            let jitter: f64 = self
                .rng
                .gen_range(1.0 - self.params.variance..=1.0 + self.params.variance);
            display *= Decimal::try_from(jitter).unwrap_or(Decimal::ONE);
        }
        if let Some(min) = self.params.min_display {
            display = display.max(min);
        }
        if let Some(max) = self.params.max_display {
            display = display.min(max);
        }
        display.min(remaining)
    }
}

impl ExecutionAlgorithm for IcebergAlgorithm {
    fn parent_id(&self) -> OrderId {
        self.parent_id
    }

    fn name(&self) -> &'static str {
        "ICEBERG"
    }

    fn on_tick(&mut self, ctx: &AlgoContext<'_>) -> Vec<AlgoAction> {
        if self.stopped {
            return Vec::new();
        }
        let remaining = ctx.parent.remaining_quantity();
        if remaining <= Decimal::ZERO {
            return Vec::new();
        }

        // A slice is working: refresh it if it has sat past the timeout
        if let Some((child_id, placed_at)) = self.active_child {
            if !self.cancel_pending && ctx.now - placed_at >= self.params.slice_timeout {
                info!(parent = %self.parent_id, child = %child_id, "iceberg slice timed out, refreshing");
                self.cancel_pending = true;
                return vec![AlgoAction::Cancel(child_id)];
            }
            return Vec::new();
        }

        // No working slice: place the next display at the near touch
        let Some(quote) = ctx.quote else {
            debug!(parent = %self.parent_id, "no market data for iceberg slice");
            return Vec::new();
        };
        let price = match ctx.parent.side {
            Side::Buy => quote.bid_price,
            Side::Sell => quote.ask_price,
        };
        let quantity = self.display_quantity(remaining);
        if quantity <= Decimal::ZERO {
            return Vec::new();
        }
        let child = child_order(ctx.parent, quantity, Some(price), OrderType::Limit, ctx.now);
        debug!(
            parent = %self.parent_id,
            qty = %quantity,
            price = %price,
            "iceberg display slice"
        );
        self.active_child = Some((child.order_id, ctx.now));
        vec![AlgoAction::Place(child)]
    }

    fn on_child_update(&mut self, child: &Order) {
        let Some((child_id, _)) = self.active_child else {
            return;
        };
        if child.order_id != child_id {
            return;
        }
        if child.is_terminal() {
            // Slice done (filled, cancelled or rejected): the next tick
            // places a fresh display
            self.active_child = None;
            self.cancel_pending = false;
            if child.status == crate::core::OrderStatus::Filled && !self.params.refresh_on_fill {
                // Single-display mode: one slice and done
                self.stopped = true;
            }
        }
    }

    fn is_complete(&self, parent: &Order) -> bool {
        self.stopped || parent.remaining_quantity() <= Decimal::ZERO
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderStatus, Quote};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn quote() -> Quote {
        Quote {
            symbol: "AAPL".into(),
            venue_id: "SIM".into(),
            bid_price: dec!(50.00),
            bid_size: dec!(1000),
            ask_price: dec!(50.02),
            ask_size: dec!(1000),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_progression_fills_parent_in_ten_slices() {
        // Parent 1000, display 100, variance 0, immediate fills: exactly
        // 10 children, parent filled at 50.00
        let t0 = Utc::now();
        let mut parent = Order::limit("AAPL", Side::Buy, dec!(1000), dec!(50.00), t0);
        parent.transition(OrderStatus::New, t0).unwrap();

        let mut params = IcebergParams::new(dec!(100));
        params.variance = 0.0;
        let mut algo = IcebergAlgorithm::new(&parent, params);

        let q = quote();
        let venue_quotes = HashMap::new();
        let mut children = 0;
        let mut now = t0;
        while parent.remaining_quantity() > Decimal::ZERO {
            now += Duration::seconds(1);
            let actions = algo.on_tick(&AlgoContext {
                now,
                parent: &parent,
                quote: Some(&q),
                venue_quotes: &venue_quotes,
            });
            assert_eq!(actions.len(), 1, "expected one placement per slice");
            let AlgoAction::Place(mut child) = actions.into_iter().next().unwrap() else {
                panic!("expected placement");
            };
            assert_eq!(child.quantity, dec!(100));
            assert_eq!(child.price, Some(dec!(50.00)));
            children += 1;

            // Venue fills the display immediately
            child.transition(OrderStatus::New, now).unwrap();
            child.apply_fill(dec!(100), dec!(50.00), now).unwrap();
            parent.apply_fill(dec!(100), dec!(50.00), now).unwrap();
            algo.on_child_update(&child);
        }

        assert_eq!(children, 10);
        assert_eq!(parent.filled_quantity, dec!(1000));
        assert_eq!(parent.avg_fill_price, dec!(50.00));
        assert_eq!(parent.status, OrderStatus::Filled);
        assert!(algo.is_complete(&parent));
    }

    #[test]
    fn test_timeout_cancels_and_refreshes() {
        let t0 = Utc::now();
        let mut parent = Order::limit("AAPL", Side::Buy, dec!(1000), dec!(50.00), t0);
        parent.transition(OrderStatus::New, t0).unwrap();
        let mut params = IcebergParams::new(dec!(100));
        params.variance = 0.0;
        let mut algo = IcebergAlgorithm::new(&parent, params);

        let q = quote();
        let venue_quotes = HashMap::new();
        let actions = algo.on_tick(&AlgoContext {
            now: t0,
            parent: &parent,
            quote: Some(&q),
            venue_quotes: &venue_quotes,
        });
        let AlgoAction::Place(mut child) = actions.into_iter().next().unwrap() else {
            panic!("expected placement");
        };
        child.transition(OrderStatus::New, t0).unwrap();

        // Within the timeout: nothing happens
        let actions = algo.on_tick(&AlgoContext {
            now: t0 + Duration::seconds(30),
            parent: &parent,
            quote: Some(&q),
            venue_quotes: &venue_quotes,
        });
        assert!(actions.is_empty());

        // Past the 60s timeout: cancel goes out, once
        let late = t0 + Duration::seconds(61);
        let actions = algo.on_tick(&AlgoContext {
            now: late,
            parent: &parent,
            quote: Some(&q),
            venue_quotes: &venue_quotes,
        });
        assert!(matches!(actions[0], AlgoAction::Cancel(id) if id == child.order_id));
        let actions = algo.on_tick(&AlgoContext {
            now: late,
            parent: &parent,
            quote: Some(&q),
            venue_quotes: &venue_quotes,
        });
        assert!(actions.is_empty(), "cancel must not be re-issued");

        // Cancel ack: next tick places a fresh slice
        child.transition(OrderStatus::PendingCancel, late).unwrap();
        child.transition(OrderStatus::Canceled, late).unwrap();
        algo.on_child_update(&child);
        let actions = algo.on_tick(&AlgoContext {
            now: late + Duration::seconds(1),
            parent: &parent,
            quote: Some(&q),
            venue_quotes: &venue_quotes,
        });
        assert!(matches!(actions[0], AlgoAction::Place(_)));
    }

    #[test]
    fn test_variance_jitters_display_deterministically() {
        let t0 = Utc::now();
        let parent = Order::limit("AAPL", Side::Buy, dec!(10_000), dec!(50.00), t0);
        let build = || {
            let mut params = IcebergParams::new(dec!(100));
            params.variance = 0.05;
            params.seed = 7;
            IcebergAlgorithm::new(&parent, params)
        };
        let mut a = build();
        let mut b = build();
        let qty_a = a.display_quantity(dec!(10_000));
        let qty_b = b.display_quantity(dec!(10_000));
        assert_eq!(qty_a, qty_b, "same seed, same jitter");
        assert!(qty_a >= dec!(95) && qty_a <= dec!(105));
    }

    #[test]
    fn test_display_clamped_to_remaining_and_bounds() {
        let t0 = Utc::now();
        let parent = Order::limit("AAPL", Side::Buy, dec!(10_000), dec!(50.00), t0);
        let mut params = IcebergParams::new(dec!(100));
        params.variance = 0.0;
        params.min_display = Some(dec!(80));
        params.max_display = Some(dec!(90));
        let mut algo = IcebergAlgorithm::new(&parent, params);
        assert_eq!(algo.display_quantity(dec!(10_000)), dec!(90));
        // Remaining caps everything
        assert_eq!(algo.display_quantity(dec!(40)), dec!(40));
    }
}
