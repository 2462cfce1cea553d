//! Risk Management
//!
//! Two surfaces sharing one state:
//!
//! - **Pre-trade**: a synchronous gate every order passes before it reaches
//!   a venue. Twelve ordered checks; the first failure is returned as a
//!   typed [`RiskRejection`] carrying the triggering limit.
//! - **Post-trade**: position and P&L tracking on every fill and mark-price
//!   update, with a 75% daily-loss alert and a 100% emergency stop.
//!
//! The circuit breaker, once tripped, fails all further admissions until an
//! operator resets it. The risk gate operates independently of strategy
//! logic: limits are enforced regardless of what strategies do.

pub mod manager;
pub mod position;
pub mod types;

pub use manager::{RiskManager, RiskRejection};
pub use position::Position;
pub use types::{BaselinePolicy, RateWindow, RiskLimits, RiskMetrics};
