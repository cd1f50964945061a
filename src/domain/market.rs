use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One candle as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, epoch milliseconds
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Whether the exchange has closed this bar
    pub confirm: bool,
}

/// A candle enriched with the strategy's moving averages.
///
/// EMA fields stay `None` until the aggregator has seen enough closes to
/// seed both averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub ema_fast: Option<Decimal>,
    pub ema_slow: Option<Decimal>,
}

impl Bar {
    pub fn from_candle(candle: &Candle) -> Self {
        Self {
            ts: candle.ts,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            ema_fast: None,
            ema_slow: None,
        }
    }

    /// Both EMAs available, ready for signal evaluation.
    pub fn is_warm(&self) -> bool {
        self.ema_fast.is_some() && self.ema_slow.is_some()
    }
}
