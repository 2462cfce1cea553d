//! Execution Engine
//!
//! Central orchestrator for parent/child order workflows. A parent order
//! arrives with optional algorithm parameters; the engine instantiates the
//! algorithm, which emits child orders that flow through the risk gate to a
//! venue adapter. Fills credit back up to the parent as a size-weighted
//! average.
//!
//! ## Algorithms
//! - [`VwapAlgorithm`]: volume-profile slicing across a time window
//! - [`IcebergAlgorithm`]: hidden size with refreshed display slices
//! - [`SmartOrderRouter`]: multi-venue allocation by price, liquidity or
//!   weighted venue quality
//!
//! Algorithms are clock-driven state machines advanced by
//! [`ExecutionEngine::on_tick`]: they never block the tick loop, and a
//! cancelled algorithm finishes within one tick turn of observing the flag.
//!
//! The same engine contract serves the backtester (whose venue adapter is
//! the fill simulator) and live trading.

pub mod algo;
pub mod engine;
pub mod fix;
pub mod iceberg;
pub mod sor;
pub mod venue;
pub mod vwap;

pub use algo::{AlgoAction, AlgoContext, AlgoParams, ExecutionAlgorithm};
pub use engine::{ExecError, ExecutionEngine};
pub use iceberg::{IcebergAlgorithm, IcebergParams};
pub use sor::{RouteStrategy, SmartOrderRouter, SorParams, VenueStats};
pub use venue::{SimulatedVenue, VenueAdapter};
pub use vwap::{VwapAlgorithm, VwapParams};
