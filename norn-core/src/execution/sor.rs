use crate::core::{Order, OrderId, OrderType, Quote, Side, Venue};
use crate::execution::algo::{child_order, AlgoAction, AlgoContext, ExecutionAlgorithm};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Weighted-score components
const WEIGHT_PRICE: f64 = 0.40;
const WEIGHT_FILL_RATE: f64 = 0.25;
const WEIGHT_LATENCY: f64 = 0.20;
const WEIGHT_FEE: f64 = 0.15;

/// EWMA factor for the per-venue fill rate
const FILL_RATE_ALPHA: f64 = 0.2;

/// Venue allocation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStrategy {
    /// Entire quantity to the venue with the best fee-adjusted price
    BestPrice,
    /// Split in proportion to displayed size at the touch
    ProRata,
    /// Split in proportion to a weighted venue quality score
    Weighted,
}

/// Smart Order Router parameters
#[derive(Debug, Clone)]
pub struct SorParams {
    pub venues: Vec<Venue>,
    /// Score venues by their maker fee instead of taker
    pub prefer_maker_fee: bool,
    pub include_dark_pools: bool,
    /// Latency above this halves a venue's latency score
    pub max_venue_latency_ms: f64,
    pub route_strategy: RouteStrategy,
}

impl SorParams {
    pub fn new(venues: Vec<Venue>) -> Self {
        Self {
            venues,
            prefer_maker_fee: true,
            include_dark_pools: true,
            max_venue_latency_ms: 50.0,
            route_strategy: RouteStrategy::BestPrice,
        }
    }
}

/// Per-venue execution statistics
#[derive(Debug, Clone)]
pub struct VenueStats {
    pub total_orders: u64,
    pub total_fills: u64,
    /// Exponentially-weighted realized fill ratio, initialized optimistic
    pub fill_rate: f64,
    /// Rolling average submission latency
    pub avg_latency_ms: f64,
}

impl Default for VenueStats {
    fn default() -> Self {
        Self {
            total_orders: 0,
            total_fills: 0,
            fill_rate: 1.0,
            avg_latency_ms: 0.0,
        }
    }
}

impl VenueStats {
    fn record_submission(&mut self, latency_ms: f64) {
        self.total_orders += 1;
        let n = self.total_orders as f64;
        self.avg_latency_ms = (self.avg_latency_ms * (n - 1.0) + latency_ms) / n;
    }

    fn record_outcome(&mut self, fill_ratio: f64) {
        if fill_ratio > 0.0 {
            self.total_fills += 1;
        }
        self.fill_rate = (1.0 - FILL_RATE_ALPHA) * self.fill_rate + FILL_RATE_ALPHA * fill_ratio;
    }
}

/// Smart Order Router: reads a quote from every candidate venue, allocates
/// the parent quantity per the configured strategy, and submits the child
/// orders concurrently.
pub struct SmartOrderRouter {
    parent_id: OrderId,
    params: SorParams,
    stats: HashMap<String, VenueStats>,
    /// Child order id -> venue id, for attributing outcomes
    child_venues: HashMap<OrderId, String>,
    routed: bool,
    stopped: bool,
}

impl SmartOrderRouter {
    pub fn new(parent: &Order, params: SorParams) -> Self {
        let stats = params
            .venues
            .iter()
            .map(|v| (v.venue_id.clone(), VenueStats::default()))
            .collect();
        info!(
            parent = %parent.order_id,
            venues = params.venues.len(),
            strategy = ?params.route_strategy,
            "smart order routing started"
        );
        Self {
            parent_id: parent.order_id,
            params,
            stats,
            child_venues: HashMap::new(),
            routed: false,
            stopped: false,
        }
    }

    pub fn stats(&self, venue_id: &str) -> Option<&VenueStats> {
        self.stats.get(venue_id)
    }

    /// Candidate venues with a live quote, honoring the dark-pool flag
    fn candidates<'a>(
        &'a self,
        venue_quotes: &'a HashMap<String, Quote>,
    ) -> Vec<(&'a Venue, &'a Quote)> {
        self.params
            .venues
            .iter()
            .filter(|v| self.params.include_dark_pools || !v.is_dark_pool)
            .filter_map(|v| venue_quotes.get(&v.venue_id).map(|q| (v, q)))
            .collect()
    }

    fn fee_rate(&self, venue: &Venue) -> Decimal {
        if self.params.prefer_maker_fee {
            venue.maker_fee
        } else {
            venue.taker_fee
        }
    }

    /// Effective per-unit cost on a venue after fees: lower is better for
    /// buys, higher is better for sells.
    fn effective_price(&self, side: Side, venue: &Venue, quote: &Quote) -> Decimal {
        let fee = self.fee_rate(venue);
        match side {
            Side::Buy => quote.ask_price * (Decimal::ONE + fee),
            Side::Sell => quote.bid_price * (Decimal::ONE - fee),
        }
    }

    /// Quality score in [0, 1]: 0.40 price + 0.25 fill rate + 0.20 latency
    /// + 0.15 fee. Price is normalized best-over-venue (buy) or
    /// venue-over-best (sell) so the best venue scores 1.0.
    fn venue_score(
        &self,
        side: Side,
        venue: &Venue,
        quote: &Quote,
        best_price: Decimal,
    ) -> f64 {
        let effective = self.effective_price(side, venue, quote);
        let price_score = match side {
            Side::Buy => (best_price / effective).to_f64().unwrap_or(0.0),
            Side::Sell => {
                if best_price.is_zero() {
                    0.0
                } else {
                    (effective / best_price).to_f64().unwrap_or(0.0)
                }
            }
        };
        let stats = self.stats.get(&venue.venue_id).cloned().unwrap_or_default();
        let latency_score = if stats.avg_latency_ms <= self.params.max_venue_latency_ms {
            1.0
        } else {
            0.5
        };
        let fee_score = 1.0 - self.fee_rate(venue).to_f64().unwrap_or(0.0);

        WEIGHT_PRICE * price_score
            + WEIGHT_FILL_RATE * stats.fill_rate
            + WEIGHT_LATENCY * latency_score
            + WEIGHT_FEE * fee_score
    }

    /// Allocation per venue id for the parent's full quantity
    fn allocate(
        &self,
        parent: &Order,
        venue_quotes: &HashMap<String, Quote>,
    ) -> Vec<(String, Decimal)> {
        let candidates = self.candidates(venue_quotes);
        if candidates.is_empty() {
            return Vec::new();
        }
        let side = parent.side;
        let quantity = parent.remaining_quantity();

        match self.params.route_strategy {
            RouteStrategy::BestPrice => {
                let best = candidates.iter().min_by(|(va, qa), (vb, qb)| {
                    let pa = self.effective_price(side, va, qa);
                    let pb = self.effective_price(side, vb, qb);
                    match side {
                        Side::Buy => pa.cmp(&pb),
                        Side::Sell => pb.cmp(&pa),
                    }
                });
                best.map(|(v, _)| vec![(v.venue_id.clone(), quantity)])
                    .unwrap_or_default()
            }
            RouteStrategy::ProRata => {
                let sizes: Vec<(String, Decimal)> = candidates
                    .iter()
                    .map(|(v, q)| {
                        let displayed = match side {
                            Side::Buy => q.ask_size,
                            Side::Sell => q.bid_size,
                        };
                        (v.venue_id.clone(), displayed)
                    })
                    .collect();
                let total: Decimal = sizes.iter().map(|(_, s)| *s).sum();
                if total.is_zero() {
                    return Vec::new();
                }
                sizes
                    .into_iter()
                    .filter(|(_, s)| !s.is_zero())
                    .map(|(venue_id, s)| (venue_id, quantity * s / total))
                    .collect()
            }
            RouteStrategy::Weighted => {
                let best_price = candidates
                    .iter()
                    .map(|(v, q)| self.effective_price(side, v, q))
                    .reduce(|a, b| match side {
                        Side::Buy => a.min(b),
                        Side::Sell => a.max(b),
                    })
                    .unwrap_or(Decimal::ONE);
                let scores: Vec<(String, f64)> = candidates
                    .iter()
                    .map(|(v, q)| {
                        (
                            v.venue_id.clone(),
                            self.venue_score(side, v, q, best_price),
                        )
                    })
                    .collect();
                let total: f64 = scores.iter().map(|(_, s)| s).sum();
                if total <= 0.0 {
                    return Vec::new();
                }
                scores
                    .into_iter()
                    .map(|(venue_id, score)| {
                        let fraction = Decimal::try_from(score / total).unwrap_or_default();
                        (venue_id, quantity * fraction)
                    })
                    .filter(|(_, q)| !q.is_zero())
                    .collect()
            }
        }
    }
}

impl ExecutionAlgorithm for SmartOrderRouter {
    fn parent_id(&self) -> OrderId {
        self.parent_id
    }

    fn name(&self) -> &'static str {
        "SOR"
    }

    fn on_tick(&mut self, ctx: &AlgoContext<'_>) -> Vec<AlgoAction> {
        if self.stopped || self.routed {
            return Vec::new();
        }
        let allocation = self.allocate(ctx.parent, ctx.venue_quotes);
        if allocation.is_empty() {
            debug!(parent = %self.parent_id, "no routable venues yet");
            return Vec::new();
        }
        self.routed = true;

        let mut actions = Vec::new();
        for (venue_id, quantity) in allocation {
            let Some(quote) = ctx.venue_quotes.get(&venue_id) else {
                continue;
            };
            // Take the far touch on each venue
            let price = match ctx.parent.side {
                Side::Buy => quote.ask_price,
                Side::Sell => quote.bid_price,
            };
            let mut child =
                child_order(ctx.parent, quantity, Some(price), OrderType::Limit, ctx.now);
            child.venue_id = Some(venue_id.clone());
            info!(
                parent = %self.parent_id,
                venue = %venue_id,
                qty = %quantity,
                price = %price,
                "routing child order"
            );
            self.child_venues.insert(child.order_id, venue_id);
            actions.push(AlgoAction::Place(child));
        }
        actions
    }

    fn on_child_submitted(&mut self, child: &Order, latency_ms: f64) {
        if let Some(venue_id) = self.child_venues.get(&child.order_id) {
            if let Some(stats) = self.stats.get_mut(venue_id) {
                stats.record_submission(latency_ms);
            }
        }
    }

    fn on_child_update(&mut self, child: &Order) {
        if !child.is_terminal() {
            return;
        }
        let Some(venue_id) = self.child_venues.remove(&child.order_id) else {
            return;
        };
        let ratio = if child.quantity.is_zero() {
            0.0
        } else {
            (child.filled_quantity / child.quantity).to_f64().unwrap_or(0.0)
        };
        if let Some(stats) = self.stats.get_mut(&venue_id) {
            stats.record_outcome(ratio);
            if ratio < 1.0 {
                warn!(
                    venue = %venue_id,
                    fill_ratio = ratio,
                    ewma_fill_rate = stats.fill_rate,
                    "venue under-filled routed child"
                );
            }
        }
    }

    fn is_complete(&self, parent: &Order) -> bool {
        self.stopped
            || parent.remaining_quantity() <= Decimal::ZERO
            || (self.routed && self.child_venues.is_empty())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
