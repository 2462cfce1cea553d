//! Trailing Stop Manager
//!
//! Per-position stop computation under five trailing policies, with a
//! periodic repricing cycle. Stops only ever tighten: a long position's
//! stop never moves down, a short's never up. When price crosses the stop,
//! the manager emits a full-quantity market close order and destroys the
//! record.

pub mod trailing;

pub use trailing::{
    TrailingMode, TrailingStop, TrailingStopConfig, TrailingStopManager, TrailingType,
};
