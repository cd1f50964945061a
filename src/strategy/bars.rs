//! Rolling bar state and EMA folding.
//!
//! The aggregator is fed by the market stream (confirmed and forming rows
//! alike) and keeps a bounded window of bars with both moving averages
//! attached. A pure fold over a REST candle batch covers the case where the
//! stream is down.

use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::domain::{Bar, Candle};

/// Bars retained for inspection; EMA state itself needs none of them.
const MAX_BARS: usize = 200;

/// Rolling exponential moving average, seeded with the first close it sees.
#[derive(Debug, Clone)]
pub struct EmaRolling {
    k: Decimal,
    value: Option<Decimal>,
}

impl EmaRolling {
    pub fn new(period: usize) -> Self {
        Self {
            k: Decimal::from(2) / Decimal::from(period + 1),
            value: None,
        }
    }

    /// Fold one close into the average and return the new value.
    pub fn update(&mut self, close: Decimal) -> Decimal {
        let next = self.next_value(close);
        self.value = Some(next);
        next
    }

    /// What the average would become after `close`, without folding it in.
    pub fn preview(&self, close: Decimal) -> Decimal {
        self.next_value(close)
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    fn next_value(&self, close: Decimal) -> Decimal {
        match self.value {
            None => close,
            Some(prev) => prev + self.k * (close - prev),
        }
    }
}

/// Consumes stream candles and exposes the newest bar with EMAs attached.
///
/// Only confirmed closes advance the EMA state: the forming bar repeats on
/// every stream push, and folding each repeat would compound the same close
/// into the average. Forming bars get a previewed EMA instead.
pub struct BarAggregator {
    ema_fast: EmaRolling,
    ema_slow: EmaRolling,
    bars: VecDeque<Bar>,
}

impl BarAggregator {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            ema_fast: EmaRolling::new(fast_period),
            ema_slow: EmaRolling::new(slow_period),
            bars: VecDeque::with_capacity(MAX_BARS),
        }
    }

    /// Fold one candle into the rolling state. Repeated pushes for the same
    /// bar timestamp replace the stored bar rather than appending.
    pub fn on_candle(&mut self, candle: &Candle) {
        let (ema_fast, ema_slow) = if candle.confirm {
            (
                self.ema_fast.update(candle.close),
                self.ema_slow.update(candle.close),
            )
        } else {
            (
                self.ema_fast.preview(candle.close),
                self.ema_slow.preview(candle.close),
            )
        };

        let mut bar = Bar::from_candle(candle);
        bar.ema_fast = Some(ema_fast);
        bar.ema_slow = Some(ema_slow);

        match self.bars.back_mut() {
            Some(last) if last.ts == bar.ts => *last = bar,
            _ => {
                if self.bars.len() == MAX_BARS {
                    self.bars.pop_front();
                }
                self.bars.push_back(bar);
            }
        }
    }

    /// Newest bar seen so far, forming or confirmed.
    pub fn latest_bar(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Fold a REST candle batch into a fresh EMA state and return the newest bar.
///
/// The exchange returns candles newest first; the fold runs oldest first so
/// the averages build up in market order.
pub fn bar_from_candles(candles: &[Candle], fast_period: usize, slow_period: usize) -> Option<Bar> {
    let mut agg = BarAggregator::new(fast_period, slow_period);
    for candle in candles.iter().rev() {
        agg.on_candle(candle);
    }
    agg.latest_bar().cloned()
}
