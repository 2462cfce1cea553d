use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading periods per year for annualizing Sharpe and Sortino
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Backtest result record: performance, trading and execution metrics plus
/// the equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    // Performance
    pub total_pnl: Decimal,
    pub total_return_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,

    // Trading
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub profit_factor: f64,

    // Execution
    pub total_volume: Decimal,
    pub total_fees: Decimal,
    pub avg_slippage_bps: f64,
    pub avg_impact_bps: f64,

    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
}

impl BacktestResult {
    /// Compute the full metrics set from the raw run artifacts.
    ///
    /// `trade_pnls` holds one realized P&L per closed (round-trip) trade.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        initial_capital: Decimal,
        equity_curve: Vec<(DateTime<Utc>, Decimal)>,
        trade_pnls: &[Decimal],
        total_volume: Decimal,
        total_fees: Decimal,
        total_slippage: Decimal,
        total_impact: Decimal,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|(_, e)| *e)
            .unwrap_or(initial_capital);
        let total_pnl = final_equity - initial_capital;
        let total_return_pct = if initial_capital.is_zero() {
            0.0
        } else {
            (total_pnl / initial_capital * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        };

        // Per-observation returns on the equity curve
        let mut returns: Vec<f64> = Vec::with_capacity(equity_curve.len().saturating_sub(1));
        for window in equity_curve.windows(2) {
            let prev = window[0].1;
            let curr = window[1].1;
            if prev > Decimal::ZERO {
                returns.push(((curr - prev) / prev).to_f64().unwrap_or(0.0));
            }
        }
        let sharpe_ratio = annualized_ratio(&returns, &returns);
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let sortino_ratio = annualized_ratio(&returns, &downside);

        // Max drawdown: largest peak-to-trough equity decline
        let mut peak = initial_capital;
        let mut max_drawdown = Decimal::ZERO;
        for (_, equity) in &equity_curve {
            if *equity > peak {
                peak = *equity;
            }
            let drawdown = peak - *equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
        let max_drawdown_pct = if peak.is_zero() {
            0.0
        } else {
            (max_drawdown / peak * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        };

        // Trade statistics
        let total_trades = trade_pnls.len();
        let wins: Vec<Decimal> = trade_pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = trade_pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();
        let win_rate = if total_trades == 0 {
            0.0
        } else {
            wins.len() as f64 / total_trades as f64
        };
        let avg_win = mean(&wins);
        let avg_loss = mean(&losses);
        let gross_profit: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();
        let profit_factor = if gross_loss.is_zero() {
            0.0
        } else {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        };

        let avg_slippage_bps = bps_of(total_slippage, total_volume);
        let avg_impact_bps = bps_of(total_impact, total_volume);

        Self {
            start_time,
            end_time,
            total_pnl,
            total_return_pct,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_pct,
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            total_volume,
            total_fees,
            avg_slippage_bps,
            avg_impact_bps,
            equity_curve,
        }
    }

    /// Render the completion metrics table
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str("==================== BACKTEST RESULTS ====================\n");
        out.push_str(&format!(
            "  Period              {} .. {}\n",
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.end_time.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("  Total P&L           {:>16}\n", self.total_pnl.round_dp(2)));
        out.push_str(&format!("  Total return        {:>15.2}%\n", self.total_return_pct));
        out.push_str(&format!("  Sharpe ratio        {:>16.3}\n", self.sharpe_ratio));
        out.push_str(&format!("  Sortino ratio       {:>16.3}\n", self.sortino_ratio));
        out.push_str(&format!(
            "  Max drawdown        {:>16} ({:.2}%)\n",
            self.max_drawdown.round_dp(2),
            self.max_drawdown_pct
        ));
        out.push_str(&format!("  Trades              {:>16}\n", self.total_trades));
        out.push_str(&format!(
            "  Win rate            {:>15.1}%  ({} wins / {} losses)\n",
            self.win_rate * 100.0,
            self.winning_trades,
            self.losing_trades
        ));
        out.push_str(&format!("  Avg win             {:>16}\n", self.avg_win.round_dp(2)));
        out.push_str(&format!("  Avg loss            {:>16}\n", self.avg_loss.round_dp(2)));
        out.push_str(&format!("  Profit factor       {:>16.3}\n", self.profit_factor));
        out.push_str(&format!("  Total volume        {:>16}\n", self.total_volume.round_dp(2)));
        out.push_str(&format!("  Total fees          {:>16}\n", self.total_fees.round_dp(2)));
        out.push_str(&format!("  Avg slippage        {:>13.3} bps\n", self.avg_slippage_bps));
        out.push_str(&format!("  Avg impact          {:>13.3} bps\n", self.avg_impact_bps));
        out.push_str("==========================================================\n");
        out
    }
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        Decimal::ZERO
    } else {
        values.iter().sum::<Decimal>() / Decimal::from(values.len())
    }
}

/// `mean(numerator_returns) / std(denominator_returns) * sqrt(252)`
fn annualized_ratio(returns: &[f64], deviation_basis: &[f64]) -> f64 {
    if returns.is_empty() || deviation_basis.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let dev_mean = deviation_basis.iter().sum::<f64>() / deviation_basis.len() as f64;
    let variance = deviation_basis
        .iter()
        .map(|r| (r - dev_mean).powi(2))
        .sum::<f64>()
        / deviation_basis.len() as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        0.0
    } else {
        mean / std * TRADING_DAYS_PER_YEAR.sqrt()
    }
}

fn bps_of(amount: Decimal, notional: Decimal) -> f64 {
    if notional.is_zero() {
        0.0
    } else {
        (amount / notional * Decimal::from(10_000))
            .to_f64()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn curve(values: &[i64]) -> Vec<(DateTime<Utc>, Decimal)> {
        let t0 = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (t0 + chrono::Duration::seconds(i as i64), Decimal::from(*v)))
            .collect()
    }

    #[test]
    fn test_basic_pnl_and_return() {
        let eq = curve(&[1_000_000, 1_000_500, 1_001_000]);
        let result = BacktestResult::compute(
            Utc::now(),
            Utc::now(),
            dec!(1_000_000),
            eq,
            &[dec!(1000)],
            dec!(300_000),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        );
        assert_eq!(result.total_pnl, dec!(1000));
        assert!((result.total_return_pct - 0.1).abs() < 1e-9);
        assert_eq!(result.total_trades, 1);
        assert!((result.win_rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_drawdown_peak_to_trough() {
        // Peak 120, trough 90: drawdown 30 (25%)
        let eq = curve(&[100, 120, 90, 110]);
        let result = BacktestResult::compute(
            Utc::now(),
            Utc::now(),
            dec!(100),
            eq,
            &[],
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        );
        assert_eq!(result.max_drawdown, dec!(30));
        assert!((result.max_drawdown_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_trade_statistics() {
        let pnls = [dec!(100), dec!(-50), dec!(200), dec!(-25), dec!(75)];
        let result = BacktestResult::compute(
            Utc::now(),
            Utc::now(),
            dec!(1000),
            curve(&[1000, 1300]),
            &pnls,
            dec!(10_000),
            dec!(12),
            Decimal::ZERO,
            Decimal::ZERO,
        );
        assert_eq!(result.total_trades, 5);
        assert_eq!(result.winning_trades, 3);
        assert_eq!(result.losing_trades, 2);
        assert!((result.win_rate - 0.6).abs() < 1e-12);
        assert_eq!(result.avg_win, dec!(125));
        assert_eq!(result.avg_loss, dec!(-37.5));
        // 375 gross profit / 75 gross loss
        assert!((result.profit_factor - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_execution_bps() {
        let result = BacktestResult::compute(
            Utc::now(),
            Utc::now(),
            dec!(1000),
            curve(&[1000, 1001]),
            &[],
            dec!(1_000_000),
            dec!(200),
            dec!(100),
            dec!(50),
        );
        assert!((result.avg_slippage_bps - 1.0).abs() < 1e-9);
        assert!((result.avg_impact_bps - 0.5).abs() < 1e-9);
        assert_eq!(result.total_fees, dec!(200));
    }

    #[test]
    fn test_sharpe_flat_curve_is_zero() {
        let result = BacktestResult::compute(
            Utc::now(),
            Utc::now(),
            dec!(1000),
            curve(&[1000, 1000, 1000]),
            &[],
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        );
        assert_eq!(result.sharpe_ratio, 0.0);
        assert_eq!(result.sortino_ratio, 0.0);
    }

    #[test]
    fn test_sortino_uses_downside_only() {
        // Mixed returns: Sortino > Sharpe when downside deviation is
        // smaller than total deviation
        let eq = curve(&[1000, 1100, 1080, 1200, 1190, 1300]);
        let result = BacktestResult::compute(
            Utc::now(),
            Utc::now(),
            dec!(1000),
            eq,
            &[],
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        );
        assert!(result.sortino_ratio > result.sharpe_ratio);
        assert!(result.sharpe_ratio > 0.0);
    }

    #[test]
    fn test_render_table() {
        let result = BacktestResult::compute(
            Utc::now(),
            Utc::now(),
            dec!(1_000_000),
            curve(&[1_000_000, 1_001_000]),
            &[dec!(1000)],
            dec!(300_000),
            dec!(60),
            Decimal::ZERO,
            Decimal::ZERO,
        );
        let table = result.render_table();
        assert!(table.contains("BACKTEST RESULTS"));
        assert!(table.contains("Win rate"));
        assert!(table.contains("100.0%"));
    }
}
