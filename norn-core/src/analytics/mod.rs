//! Market microstructure analytics
//!
//! Derives liquidity, flow and volatility metrics from the tape and the
//! book, and classifies the current market regime.

pub mod microstructure;

pub use microstructure::{MicrostructureAnalyzer, MicrostructureMetrics, Regime};
