use crate::core::{Order, OrderId, OrderType, Side};
use crate::execution::algo::{child_order, AlgoAction, AlgoContext, ExecutionAlgorithm};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Intervals in the default intraday volume profile
const PROFILE_INTERVALS: usize = 100;

/// Above this urgency the unfilled remainder goes out as a market order at
/// the end of the window
const MARKET_SWEEP_URGENCY: f64 = 0.7;

/// VWAP algorithm parameters
#[derive(Debug, Clone)]
pub struct VwapParams {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Target fraction of market volume
    pub participation_rate: f64,
    /// Per-slice floor as a fraction of remaining
    pub min_fill_ratio: f64,
    /// Per-slice cap as a fraction of remaining
    pub max_fill_ratio: f64,
    /// 0 = passive at the near touch, 1 = cross the spread
    pub urgency: f64,
    /// Worst acceptable price, enforced on every slice
    pub price_limit: Option<Decimal>,
}

impl VwapParams {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
            participation_rate: 0.10,
            min_fill_ratio: 0.05,
            max_fill_ratio: 0.30,
            urgency: 0.5,
            price_limit: None,
        }
    }
}

/// VWAP execution: partitions the window into slices sized by an intraday
/// volume profile, submitting one limit child per slice.
///
/// Slice boundaries are absolute times. A slice whose window has fully
/// passed before the algorithm gets a tick is dropped, not queued.
pub struct VwapAlgorithm {
    parent_id: OrderId,
    params: VwapParams,
    /// Normalized expected volume fractions across the window
    profile: Vec<f64>,
    num_slices: usize,
    slice_duration: Duration,
    next_slice: usize,
    sent_final_sweep: bool,
    stopped: bool,
}

impl VwapAlgorithm {
    pub fn new(parent: &Order, params: VwapParams) -> Self {
        let duration_s = (params.end_time - params.start_time)
            .num_seconds()
            .max(1);
        // At least 10 slices, about one per minute
        let num_slices = usize::max(10, (duration_s as usize).div_ceil(60));
        let slice_duration = Duration::milliseconds(duration_s * 1000 / num_slices as i64);
        info!(
            parent = %parent.order_id,
            slices = num_slices,
            slice_ms = slice_duration.num_milliseconds(),
            "VWAP execution scheduled"
        );
        Self {
            parent_id: parent.order_id,
            params,
            profile: Self::default_profile(),
            num_slices,
            slice_duration,
            next_slice: 0,
            sent_final_sweep: false,
            stopped: false,
        }
    }

    /// Override the volume profile (normalization is the caller's problem;
    /// a flat all-ones profile makes every slice hit the max-ratio clamp).
    pub fn with_profile(mut self, profile: Vec<f64>) -> Self {
        self.profile = profile;
        self
    }

    /// U-shaped intraday curve: heavier at the open and the close.
    /// `w(x) = 1 + 0.5 * (x^2 + (1-x)^2)`, normalized to sum to one.
    fn default_profile() -> Vec<f64> {
        let mut profile: Vec<f64> = (0..PROFILE_INTERVALS)
            .map(|i| {
                let x = i as f64 / PROFILE_INTERVALS as f64;
                1.0 + 0.5 * (x.powi(2) + (1.0 - x).powi(2))
            })
            .collect();
        let total: f64 = profile.iter().sum();
        for w in &mut profile {
            *w /= total;
        }
        profile
    }

    fn slice_start(&self, idx: usize) -> DateTime<Utc> {
        self.params.start_time + self.slice_duration * idx as i32
    }

    fn profile_weight(&self, slice_idx: usize) -> f64 {
        if self.profile.is_empty() {
            return 0.0;
        }
        let profile_idx =
            (slice_idx * self.profile.len()) / self.num_slices.max(1);
        self.profile[profile_idx.min(self.profile.len() - 1)]
    }

    /// Target quantity for one slice: remaining scaled by the profile
    /// weight and urgency, clamped to the per-slice ratio band.
    fn slice_quantity(&self, slice_idx: usize, remaining: Decimal) -> Decimal {
        let weight = self.profile_weight(slice_idx) * (1.0 + self.params.urgency);
        let target = remaining * Decimal::try_from(weight).unwrap_or_default();
        let floor = remaining * Decimal::try_from(self.params.min_fill_ratio).unwrap_or_default();
        let cap = remaining * Decimal::try_from(self.params.max_fill_ratio).unwrap_or_default();
        target.clamp(floor, cap).min(remaining)
    }

    /// Limit price for a slice: the near touch skewed toward crossing by
    /// urgency, capped at the configured worst-case price.
    fn slice_price(&self, ctx: &AlgoContext<'_>) -> Option<Decimal> {
        let quote = ctx.quote?;
        let spread = quote.spread();
        let skew = spread * Decimal::try_from(self.params.urgency).unwrap_or_default();
        let mut price = match ctx.parent.side {
            Side::Buy => quote.bid_price + skew,
            Side::Sell => quote.ask_price - skew,
        };
        if let Some(limit) = self.params.price_limit {
            price = match ctx.parent.side {
                Side::Buy => price.min(limit),
                Side::Sell => price.max(limit),
            };
        }
        Some(price)
    }
}

impl ExecutionAlgorithm for VwapAlgorithm {
    fn parent_id(&self) -> OrderId {
        self.parent_id
    }

    fn name(&self) -> &'static str {
        "VWAP"
    }

    fn on_tick(&mut self, ctx: &AlgoContext<'_>) -> Vec<AlgoAction> {
        if self.stopped {
            return Vec::new();
        }
        let remaining = ctx.parent.remaining_quantity();
        if remaining <= Decimal::ZERO {
            return Vec::new();
        }

        let mut actions = Vec::new();
        while self.next_slice < self.num_slices {
            let idx = self.next_slice;
            let start = self.slice_start(idx);
            if ctx.now < start {
                // Not due yet; wait for the clock
                break;
            }
            let end = self.slice_start(idx + 1);
            if ctx.now >= end {
                // The whole window passed while we were backed up; drop it
                warn!(parent = %self.parent_id, slice = idx, "VWAP slice missed, dropping");
                self.next_slice += 1;
                continue;
            }

            self.next_slice += 1;
            let remaining = ctx.parent.remaining_quantity();
            if remaining <= Decimal::ZERO {
                break;
            }
            let quantity = self.slice_quantity(idx, remaining);
            if quantity <= Decimal::ZERO {
                continue;
            }
            let Some(price) = self.slice_price(ctx) else {
                debug!(parent = %self.parent_id, slice = idx, "no market data for VWAP slice");
                break;
            };
            info!(
                parent = %self.parent_id,
                slice = idx,
                qty = %quantity,
                price = %price,
                "VWAP slice"
            );
            actions.push(AlgoAction::Place(child_order(
                ctx.parent,
                quantity,
                Some(price),
                OrderType::Limit,
                ctx.now,
            )));
            break;
        }

        // Window over: sweep the remainder at market if urgency demands it
        if self.next_slice >= self.num_slices
            && ctx.now >= self.params.end_time
            && !self.sent_final_sweep
        {
            self.sent_final_sweep = true;
            let remaining = ctx.parent.remaining_quantity();
            if remaining > Decimal::ZERO && self.params.urgency > MARKET_SWEEP_URGENCY {
                info!(parent = %self.parent_id, qty = %remaining, "VWAP window closed, sweeping remainder at market");
                actions.push(AlgoAction::Place(child_order(
                    ctx.parent,
                    remaining,
                    None,
                    OrderType::Market,
                    ctx.now,
                )));
            } else if remaining > Decimal::ZERO {
                warn!(parent = %self.parent_id, qty = %remaining, "VWAP incomplete at window close");
            }
        }
        actions
    }

    fn is_complete(&self, parent: &Order) -> bool {
        self.stopped
            || parent.remaining_quantity() <= Decimal::ZERO
            || (self.next_slice >= self.num_slices && self.sent_final_sweep)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
