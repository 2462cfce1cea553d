use crate::core::{
    Fill, Order, OrderId, OrderStatus, Quote, StateError, ValidationError, VenueError,
};
use crate::execution::algo::{AlgoAction, AlgoContext, AlgoParams, ExecutionAlgorithm};
use crate::execution::iceberg::IcebergAlgorithm;
use crate::execution::sor::SmartOrderRouter;
use crate::execution::venue::VenueAdapter;
use crate::execution::vwap::VwapAlgorithm;
use crate::risk::{RiskManager, RiskRejection};
use crate::utils::retry::{with_retry, BackoffConfig};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Order submission failure
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Risk(#[from] RiskRejection),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Venue(#[from] VenueError),
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
    #[error("no venue adapter registered for {0}")]
    UnknownVenue(String),
}

/// Central orchestrator for parent/child order workflows.
///
/// Owns every order it has ever seen until terminal, the fill log, and the
/// table of running algorithms. Orders reference each other by id only.
pub struct ExecutionEngine {
    venues: HashMap<String, Box<dyn VenueAdapter>>,
    default_venue: String,
    risk: RiskManager,
    orders: HashMap<OrderId, Order>,
    fills: Vec<Fill>,
    algos: HashMap<OrderId, Box<dyn ExecutionAlgorithm>>,
    /// parent id -> child ids, in placement order
    children: HashMap<OrderId, Vec<OrderId>>,
    retry: BackoffConfig,
    /// Sleep between venue retries; the backtester injects a no-op
    sleep_fn: Box<dyn FnMut(Duration)>,
}

impl ExecutionEngine {
    pub fn new(risk: RiskManager, default_venue: impl Into<String>) -> Self {
        Self {
            venues: HashMap::new(),
            default_venue: default_venue.into(),
            risk,
            orders: HashMap::new(),
            fills: Vec::new(),
            algos: HashMap::new(),
            children: HashMap::new(),
            retry: BackoffConfig::default(),
            sleep_fn: Box::new(std::thread::sleep),
        }
    }

    /// Replace the inter-retry sleep (no-op for simulation)
    pub fn with_sleep_fn(mut self, sleep_fn: impl FnMut(Duration) + 'static) -> Self {
        self.sleep_fn = Box::new(sleep_fn);
        self
    }

    pub fn register_venue(&mut self, adapter: Box<dyn VenueAdapter>) {
        info!(venue = adapter.venue_id(), "venue adapter registered");
        self.venues.insert(adapter.venue_id().to_string(), adapter);
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    pub fn venue(&self, venue_id: &str) -> Option<&dyn VenueAdapter> {
        self.venues.get(venue_id).map(|v| v.as_ref())
    }

    pub fn venue_mut(&mut self, venue_id: &str) -> Option<&mut Box<dyn VenueAdapter>> {
        self.venues.get_mut(venue_id)
    }

    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn fills_for(&self, order_id: &OrderId) -> Vec<&Fill> {
        self.fills.iter().filter(|f| f.order_id == *order_id).collect()
    }

    pub fn children_of(&self, parent_id: &OrderId) -> Vec<&Order> {
        self.children
            .get(parent_id)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn open_orders(&self) -> Vec<&Order> {
        self.orders.values().filter(|o| o.is_active()).collect()
    }

    pub fn active_algo_count(&self) -> usize {
        self.algos.len()
    }

    /// Submit an order for execution, returning its id.
    ///
    /// With `algo_params` the order becomes a parent managed by the chosen
    /// algorithm; otherwise it is risk-checked and sent straight to its
    /// venue. Rejection stamps the order REJECTED with the reason preserved
    /// and changes nothing else.
    pub fn submit_order(
        &mut self,
        mut order: Order,
        algo_params: Option<AlgoParams>,
        now: DateTime<Utc>,
    ) -> Result<OrderId, ExecError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(order.quantity).into());
        }
        if let Some(price) = order.price {
            if price <= Decimal::ZERO {
                return Err(ValidationError::NonPositivePrice(price).into());
            }
        }
        let order_id = order.order_id;
        info!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.quantity,
            algo = algo_params.is_some(),
            "order submitted"
        );

        match algo_params {
            None => {
                let routed = self.route_to_venue(&mut order, now);
                // Rejected orders are retained too: terminal, reason stamped
                self.orders.insert(order_id, order);
                routed?;
            }
            Some(params) => {
                // Parent orders are engine-held; only their children go to
                // a venue, each through the risk gate.
                order.transition(OrderStatus::New, now)?;
                let algo: Box<dyn ExecutionAlgorithm> = match params {
                    AlgoParams::Vwap(p) => Box::new(VwapAlgorithm::new(&order, p)),
                    AlgoParams::Iceberg(p) => Box::new(IcebergAlgorithm::new(&order, p)),
                    AlgoParams::Sor(p) => Box::new(SmartOrderRouter::new(&order, p)),
                };
                self.orders.insert(order_id, order);
                self.children.entry(order_id).or_default();
                self.algos.insert(order_id, algo);
            }
        }
        Ok(order_id)
    }

    /// Risk-check an order and submit it to its venue with bounded retry.
    /// On success the order is NEW; on rejection it is stamped REJECTED.
    fn route_to_venue(&mut self, order: &mut Order, now: DateTime<Utc>) -> Result<(), ExecError> {
        let open_orders: Vec<&Order> = self.orders.values().filter(|o| o.is_active()).collect();
        if let Err(rejection) = self.risk.pre_trade_check(order, &open_orders, now) {
            warn!(order_id = %order.order_id, reason = %rejection, "risk gate rejected order");
            order.reject(rejection.to_string(), now)?;
            return Err(rejection.into());
        }

        let venue_id = order
            .venue_id
            .clone()
            .unwrap_or_else(|| self.default_venue.clone());
        let adapter = self
            .venues
            .get_mut(&venue_id)
            .ok_or_else(|| ExecError::UnknownVenue(venue_id.clone()))?;

        order.submitted_at = Some(now);
        let submit = with_retry(&self.retry, &mut self.sleep_fn, || {
            adapter.submit_order(order, now)
        });
        match submit {
            Ok(()) => {
                order.transition(OrderStatus::New, now)?;
                Ok(())
            }
            Err(err) => {
                warn!(order_id = %order.order_id, venue = %venue_id, "venue rejected order: {}", err);
                order.reject(err.to_string(), now)?;
                Err(err.into())
            }
        }
    }

    /// Cancel an order. A parent cancel stops its algorithm and cascades to
    /// every outstanding child; a child cancel leaves the parent active.
    pub fn cancel_order(&mut self, order_id: &OrderId, now: DateTime<Utc>) -> Result<(), ExecError> {
        if !self.orders.contains_key(order_id) {
            return Err(ExecError::UnknownOrder(*order_id));
        }
        self.risk.pre_cancel_check(now)?;

        // Parent with a running algorithm: stop it, cancel the children
        if let Some(algo) = self.algos.get_mut(order_id) {
            algo.stop();
            let child_ids: Vec<OrderId> = self
                .children
                .get(order_id)
                .map(|ids| ids.clone())
                .unwrap_or_default();
            for child_id in child_ids {
                if self.orders.get(&child_id).is_some_and(|o| o.is_active()) {
                    if let Err(e) = self.cancel_single(&child_id, now) {
                        warn!(child = %child_id, "child cancel failed: {}", e);
                    }
                }
            }
            if let Some(parent) = self.orders.get_mut(order_id) {
                if !parent.is_terminal() {
                    parent.transition(OrderStatus::Canceled, now)?;
                }
            }
            self.algos.remove(order_id);
            info!(parent = %order_id, "parent order cancelled, children cascaded");
            return Ok(());
        }

        self.cancel_single(order_id, now)
    }

    /// Venue round-trip for a single order's cancel
    fn cancel_single(&mut self, order_id: &OrderId, now: DateTime<Utc>) -> Result<(), ExecError> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or(ExecError::UnknownOrder(*order_id))?;
        if order.is_terminal() {
            return Err(StateError::IllegalTransition {
                from: order.status,
                to: OrderStatus::PendingCancel,
            }
            .into());
        }
        let prior = order.status;
        order.transition(OrderStatus::PendingCancel, now)?;
        let venue_id = order
            .venue_id
            .clone()
            .unwrap_or_else(|| self.default_venue.clone());
        let adapter = self
            .venues
            .get_mut(&venue_id)
            .ok_or_else(|| ExecError::UnknownVenue(venue_id.clone()))?;
        let ack = adapter.cancel_order(order_id, now);
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or(ExecError::UnknownOrder(*order_id))?;
        match ack {
            Ok(()) => {
                order.transition(OrderStatus::Canceled, now)?;
                self.notify_algo_of_child(order_id);
                Ok(())
            }
            Err(err) => {
                // Cancel reject: fall back to the prior working state
                debug!(order_id = %order_id, "cancel rejected by venue: {}", err);
                order.transition(prior, now)?;
                Err(err.into())
            }
        }
    }

    /// Push a market quote into a venue adapter (simulators re-check their
    /// resting orders against it). Feeds and the backtester drive this.
    pub fn update_market(&mut self, venue_id: &str, quote: Quote, now: DateTime<Utc>) {
        if let Some(adapter) = self.venues.get_mut(venue_id) {
            adapter.update_quote(quote.clone(), now);
        }
        self.risk
            .update_mark_price(&quote.symbol, quote.mid_price(), now);
    }

    /// Advance the engine one tick: drain venue fills (in fill-time order),
    /// let resting simulated orders match, then step every running
    /// algorithm and act on what it emits.
    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        // Collect fills from every venue and apply them oldest-first
        let mut fills: Vec<Fill> = Vec::new();
        for adapter in self.venues.values_mut() {
            fills.extend(adapter.poll_fills());
        }
        fills.sort_by_key(|f| f.timestamp);
        for fill in fills {
            if let Err(e) = self.apply_fill(fill) {
                warn!("fill application failed: {}", e);
            }
        }

        // Step the algorithms
        let parent_ids: Vec<OrderId> = self.algos.keys().copied().collect();
        for parent_id in parent_ids {
            let Some(parent) = self.orders.get(&parent_id).cloned() else {
                continue;
            };
            let venue_quotes: HashMap<String, Quote> = self
                .venues
                .iter()
                .filter_map(|(id, v)| v.quote(&parent.symbol).map(|q| (id.clone(), q)))
                .collect();
            let default_quote = venue_quotes
                .get(&parent.venue_id.clone().unwrap_or_else(|| self.default_venue.clone()))
                .or_else(|| venue_quotes.values().next())
                .cloned();

            let actions = {
                let algo = self.algos.get_mut(&parent_id).unwrap();
                let ctx = AlgoContext {
                    now,
                    parent: &parent,
                    quote: default_quote.as_ref(),
                    venue_quotes: &venue_quotes,
                };
                algo.on_tick(&ctx)
            };

            for action in actions {
                match action {
                    AlgoAction::Place(mut child) => {
                        let child_id = child.order_id;
                        let latency = child
                            .venue_id
                            .as_deref()
                            .or(Some(self.default_venue.as_str()))
                            .and_then(|v| self.venues.get(v))
                            .map(|v| v.latency_ms())
                            .unwrap_or(0.0);
                        match self.route_to_venue(&mut child, now) {
                            Ok(()) => {
                                self.children.entry(parent_id).or_default().push(child_id);
                                if let Some(algo) = self.algos.get_mut(&parent_id) {
                                    algo.on_child_submitted(&child, latency);
                                    algo.on_child_update(&child);
                                }
                                self.orders.insert(child_id, child);
                            }
                            Err(e) => {
                                warn!(parent = %parent_id, "child order rejected: {}", e);
                                if !child.is_terminal() {
                                    let _ = child.reject(e.to_string(), now);
                                }
                                self.children.entry(parent_id).or_default().push(child_id);
                                if let Some(algo) = self.algos.get_mut(&parent_id) {
                                    algo.on_child_update(&child);
                                }
                                self.orders.insert(child_id, child);
                            }
                        }
                    }
                    AlgoAction::Cancel(child_id) => {
                        if let Err(e) = self.cancel_single(&child_id, now) {
                            warn!(parent = %parent_id, child = %child_id, "algo cancel failed: {}", e);
                        }
                    }
                }
            }
        }

        // Retire finished algorithms
        let done: Vec<OrderId> = self
            .algos
            .iter()
            .filter(|(id, algo)| {
                self.orders
                    .get(id)
                    .map(|parent| algo.is_complete(parent))
                    .unwrap_or(true)
            })
            .map(|(id, _)| *id)
            .collect();
        for parent_id in done {
            debug!(parent = %parent_id, "algorithm complete");
            self.algos.remove(&parent_id);
        }
    }

    /// Apply one fill: update the child order, the risk gate, and credit
    /// the parent's weighted average.
    pub fn apply_fill(&mut self, fill: Fill) -> Result<(), ExecError> {
        let order = self
            .orders
            .get_mut(&fill.order_id)
            .ok_or(ExecError::UnknownOrder(fill.order_id))?;
        order.apply_fill(fill.quantity, fill.price, fill.timestamp)?;
        let parent_id = order.parent_order_id;
        let order_snapshot = order.clone();

        self.risk.on_fill(&fill);

        if let Some(parent_id) = parent_id {
            if let Some(parent) = self.orders.get_mut(&parent_id) {
                parent.apply_fill(fill.quantity, fill.price, fill.timestamp)?;
                debug!(
                    parent = %parent_id,
                    filled = %parent.filled_quantity,
                    total = %parent.quantity,
                    avg = %parent.avg_fill_price,
                    "parent credited"
                );
            }
            if let Some(algo) = self.algos.get_mut(&parent_id) {
                algo.on_child_update(&order_snapshot);
            }
        }
        self.fills.push(fill);
        Ok(())
    }

    fn notify_algo_of_child(&mut self, child_id: &OrderId) {
        let Some(child) = self.orders.get(child_id).cloned() else {
            return;
        };
        let Some(parent_id) = child.parent_order_id else {
            return;
        };
        if let Some(algo) = self.algos.get_mut(&parent_id) {
            algo.on_child_update(&child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderType, Side, Venue};
    use crate::execution::iceberg::IcebergParams;
    use crate::execution::venue::SimulatedVenue;
    use crate::risk::RiskLimits;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn quote(symbol: &str, bid: Decimal, ask: Decimal) -> Quote {
        Quote {
            symbol: symbol.into(),
            venue_id: "SIM".into(),
            bid_price: bid,
            bid_size: dec!(10_000),
            ask_price: ask,
            ask_size: dec!(10_000),
            timestamp: Utc::now(),
        }
    }

    fn engine() -> ExecutionEngine {
        let limits = RiskLimits {
            max_concentration: dec!(1.0),
            max_order_size: dec!(1_000_000),
            max_order_value: dec!(100_000_000),
            max_daily_volume: dec!(1_000_000_000),
            max_total_exposure: dec!(1_000_000_000),
            max_position_size: dec!(10_000_000),
            min_order_size: dec!(0.01),
            min_order_value: dec!(0.01),
            ..RiskLimits::default()
        };
        let mut risk = RiskManager::new(limits, dec!(10_000_000));
        risk.update_mark_price("AAPL", dec!(50.00), Utc::now());
        let mut engine = ExecutionEngine::new(risk, "SIM").with_sleep_fn(|_| {});
        let mut venue = SimulatedVenue::new(Venue::new("SIM", "Simulator"));
        venue.set_quote(quote("AAPL", dec!(50.00), dec!(50.02)));
        engine.register_venue(Box::new(venue));
        engine
    }

    #[test]
    fn test_direct_order_flow() {
        let mut engine = engine();
        let now = Utc::now();
        let order = Order::market("AAPL", Side::Buy, dec!(100), now);
        let id = engine.submit_order(order, None, now).unwrap();

        engine.on_tick(now);
        let order = engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, dec!(50.02));
        assert_eq!(engine.fills().len(), 1);
        // Risk gate observed the fill
        assert_eq!(engine.risk().position("AAPL").unwrap().quantity, dec!(100));
    }

    #[test]
    fn test_risk_rejection_stamps_order() {
        let mut engine = engine();
        let now = Utc::now();
        // 100x the reference price: fat-finger deviation
        let order = Order::limit("AAPL", Side::Buy, dec!(100), dec!(5000), now);
        let id = order.order_id;
        let err = engine.submit_order(order, None, now).unwrap_err();
        assert!(matches!(err, ExecError::Risk(_)));
        // Order retained, stamped REJECTED, reason preserved
        let order = engine.order(&id).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.rejected_reason.as_deref().unwrap().contains("deviates"));
    }

    #[test]
    fn test_validation_rejects_nonpositive() {
        let mut engine = engine();
        let now = Utc::now();
        let order = Order::limit("AAPL", Side::Buy, dec!(0), dec!(50), now);
        assert!(matches!(
            engine.submit_order(order, None, now),
            Err(ExecError::Validation(_))
        ));
    }

    #[test]
    fn test_iceberg_parent_aggregation() {
        let mut engine = engine();
        let t0 = Utc::now();
        let parent = Order::limit("AAPL", Side::Buy, dec!(1000), dec!(50.02), t0)
            .with_order_type(OrderType::Iceberg);
        let mut params = IcebergParams::new(dec!(100));
        params.variance = 0.0;
        let parent_id = engine
            .submit_order(parent, Some(AlgoParams::Iceberg(params)), t0)
            .unwrap();

        // Display slices go out at the bid (50.00); the simulated venue
        // rests them, then fills them as the market ticks down through
        // the limit. Each round: reset the quote, let the algorithm place
        // its slice, then cross the market through the resting bid.
        // The fill from the cross is drained at the top of the next round,
        // after the quote has been restored, so every slice prices at the
        // same 50.00 bid.
        let mut now = t0;
        for _ in 0..20 {
            now += ChronoDuration::seconds(1);
            engine.update_market("SIM", quote("AAPL", dec!(50.00), dec!(50.02)), now);
            engine.on_tick(now);
            if engine
                .order(&parent_id)
                .map(|o| o.status == OrderStatus::Filled)
                .unwrap_or(false)
            {
                break;
            }
            engine.update_market("SIM", quote("AAPL", dec!(49.98), dec!(50.00)), now);
        }

        let parent = engine.order(&parent_id).unwrap();
        assert_eq!(parent.status, OrderStatus::Filled);
        assert_eq!(parent.filled_quantity, dec!(1000));
        assert_eq!(parent.avg_fill_price, dec!(50.00));
        assert_eq!(engine.children_of(&parent_id).len(), 10);
        assert_eq!(engine.active_algo_count(), 0);
    }

    #[test]
    fn test_parent_cancel_cascades() {
        let mut engine = engine();
        let t0 = Utc::now();
        let parent = Order::limit("AAPL", Side::Buy, dec!(1000), dec!(49.00), t0)
            .with_order_type(OrderType::Iceberg);
        let mut params = IcebergParams::new(dec!(100));
        params.variance = 0.0;
        let parent_id = engine
            .submit_order(parent, Some(AlgoParams::Iceberg(params)), t0)
            .unwrap();

        // One display slice rests at the bid
        engine.on_tick(t0 + ChronoDuration::seconds(1));
        let children = engine.children_of(&parent_id);
        assert_eq!(children.len(), 1);
        let child_id = children[0].order_id;
        assert!(engine.order(&child_id).unwrap().is_active());

        engine.cancel_order(&parent_id, t0 + ChronoDuration::seconds(2)).unwrap();
        assert_eq!(engine.order(&parent_id).unwrap().status, OrderStatus::Canceled);
        assert_eq!(engine.order(&child_id).unwrap().status, OrderStatus::Canceled);
        assert_eq!(engine.active_algo_count(), 0);
    }

    #[test]
    fn test_child_cancel_leaves_parent_active() {
        let mut engine = engine();
        let t0 = Utc::now();
        let parent = Order::limit("AAPL", Side::Buy, dec!(1000), dec!(49.00), t0)
            .with_order_type(OrderType::Iceberg);
        let mut params = IcebergParams::new(dec!(100));
        params.variance = 0.0;
        let parent_id = engine
            .submit_order(parent, Some(AlgoParams::Iceberg(params)), t0)
            .unwrap();
        engine.on_tick(t0 + ChronoDuration::seconds(1));
        let child_id = engine.children_of(&parent_id)[0].order_id;

        engine.cancel_order(&child_id, t0 + ChronoDuration::seconds(2)).unwrap();
        assert_eq!(engine.order(&child_id).unwrap().status, OrderStatus::Canceled);
        // Parent stays working and the algorithm keeps running
        assert_eq!(engine.order(&parent_id).unwrap().status, OrderStatus::New);
        assert_eq!(engine.active_algo_count(), 1);
    }

    #[test]
    fn test_cancel_terminal_order_fails() {
        let mut engine = engine();
        let now = Utc::now();
        let order = Order::market("AAPL", Side::Buy, dec!(100), now);
        let id = engine.submit_order(order, None, now).unwrap();
        engine.on_tick(now);
        assert_eq!(engine.order(&id).unwrap().status, OrderStatus::Filled);

        let err = engine.cancel_order(&id, now).unwrap_err();
        assert!(matches!(err, ExecError::State(_)));
    }

    #[test]
    fn test_unknown_venue() {
        let mut engine = engine();
        let now = Utc::now();
        let order = Order::market("AAPL", Side::Buy, dec!(100), now).with_venue("NOPE");
        assert!(matches!(
            engine.submit_order(order, None, now),
            Err(ExecError::UnknownVenue(_))
        ));
    }
}
