//! Strategy: rolling bar state and the EMA-cross entry signal.
//!
//! The aggregator turns stream candles into bars with EMAs attached; the
//! evaluator turns a fresh cross into a `Signal` for the order lifecycle.

pub mod bars;
pub mod ema_cross;

pub use bars::{bar_from_candles, BarAggregator, EmaRolling};
pub use ema_cross::{EmaCrossStrategy, Signal, SignalAction};
