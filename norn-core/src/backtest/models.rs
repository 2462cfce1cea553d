use crate::backtest::config::{ImpactModel, SlippageModel};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use statrs::distribution::Normal;

/// Slippage noise: normal around 1.0 with this spread, floored below
const NOISE_STD_DEV: f64 = 0.2;
const NOISE_FLOOR: f64 = 0.1;

/// Absolute price impact of an order given its participation in daily
/// volume. Always non-negative; the caller applies the sign (buys push the
/// price up, sells down).
pub fn market_impact(
    order_size: Decimal,
    daily_volume: Decimal,
    price: Decimal,
    model: ImpactModel,
    coefficient: f64,
) -> Decimal {
    use rust_decimal::prelude::ToPrimitive;
    if daily_volume <= Decimal::ZERO || order_size <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let participation =
        order_size.to_f64().unwrap_or(0.0) / daily_volume.to_f64().unwrap_or(f64::MAX);
    let impact_fraction = match model {
        ImpactModel::Linear => coefficient * participation,
        ImpactModel::Sqrt => coefficient * participation.sqrt(),
        ImpactModel::Permanent => coefficient * participation * 0.5,
    };
    price * Decimal::try_from(impact_fraction).unwrap_or(Decimal::ZERO)
}

/// Absolute adverse slippage for an execution at `price`.
///
/// The configured bps amount is scaled by a seeded, bounded normal factor
/// (mean 1.0, sigma 0.2, floor 0.1); under `Proportional` the base is
/// additionally scaled by `(1 + volatility)` when volatility is known.
pub fn slippage(
    price: Decimal,
    model: SlippageModel,
    slippage_bps: f64,
    volatility: Option<f64>,
    rng: &mut ChaCha8Rng,
) -> Decimal {
    let base_fraction = match model {
        SlippageModel::Fixed => slippage_bps / 10_000.0,
        SlippageModel::Proportional => match volatility {
            Some(vol) => slippage_bps / 10_000.0 * (1.0 + vol),
            None => slippage_bps / 10_000.0,
        },
    };
    let noise = Normal::new(1.0, NOISE_STD_DEV)
        .map(|dist| rng.sample(dist))
        .unwrap_or(1.0)
        .max(NOISE_FLOOR);
    price * Decimal::try_from(base_fraction * noise).unwrap_or(Decimal::ZERO)
}
