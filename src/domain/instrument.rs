use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Precision metadata for one instrument.
///
/// Fetched once from the exchange and cached for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub inst_id: String,
    /// Contract value: quote notional represented by one contract
    pub ct_val: Decimal,
    /// Size increment
    pub lot_sz: Decimal,
    /// Minimum order size
    pub min_sz: Decimal,
    /// Price increment
    pub tick_sz: Decimal,
}

impl InstrumentSpec {
    /// Floor a price to this instrument's tick size.
    pub fn floor_price(&self, px: Decimal) -> Decimal {
        floor_to_step(px, self.tick_sz)
    }

    /// Floor a size to the lot increment; `None` when the floored size
    /// falls below the exchange minimum.
    pub fn floor_size(&self, sz: Decimal) -> Option<Decimal> {
        let floored = floor_to_step(sz, self.lot_sz);
        if floored <= Decimal::ZERO || floored < self.min_sz {
            None
        } else {
            Some(floored)
        }
    }

    /// Contracts purchasable for a risk budget of `equity * risk_pct`
    /// at `last_px`, floored to the lot increment.
    pub fn size_for_risk(
        &self,
        equity: Decimal,
        risk_pct: Decimal,
        last_px: Decimal,
    ) -> Option<Decimal> {
        if last_px <= Decimal::ZERO || self.ct_val <= Decimal::ZERO {
            return None;
        }
        let notional = equity * risk_pct;
        self.floor_size(notional / (last_px * self.ct_val))
    }
}

/// Greatest multiple of `step` that is `<= x`.
///
/// A non-positive step leaves `x` unchanged. Flooring (never rounding or
/// ceiling) keeps submitted values inside both the exchange's accepted
/// precision and the requested risk budget.
pub fn floor_to_step(x: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return x;
    }
    (x / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc_swap() -> InstrumentSpec {
        InstrumentSpec {
            inst_id: "BTC-USDT-SWAP".to_string(),
            ct_val: dec!(0.01),
            lot_sz: dec!(0.1),
            min_sz: dec!(0.1),
            tick_sz: dec!(0.1),
        }
    }

    #[test]
    fn test_floor_to_step_basic() {
        assert_eq!(floor_to_step(dec!(10.26), dec!(0.1)), dec!(10.2));
        assert_eq!(floor_to_step(dec!(10.0), dec!(0.1)), dec!(10.0));
        assert_eq!(floor_to_step(dec!(0.09), dec!(0.1)), dec!(0));
        assert_eq!(floor_to_step(dec!(7), dec!(2)), dec!(6));
    }

    #[test]
    fn test_floor_to_step_non_positive_step() {
        assert_eq!(floor_to_step(dec!(10.26), Decimal::ZERO), dec!(10.26));
        assert_eq!(floor_to_step(dec!(10.26), dec!(-1)), dec!(10.26));
    }

    #[test]
    fn test_floor_size_rejects_below_minimum() {
        let spec = btc_swap();
        assert_eq!(spec.floor_size(dec!(0.35)), Some(dec!(0.3)));
        // Floors to 0.0 which is under min_sz
        assert_eq!(spec.floor_size(dec!(0.05)), None);
        assert_eq!(spec.floor_size(Decimal::ZERO), None);
    }

    #[test]
    fn test_floor_price() {
        let spec = btc_swap();
        assert_eq!(spec.floor_price(dec!(65000.17)), dec!(65000.1));
    }

    #[test]
    fn test_size_for_risk() {
        let spec = btc_swap();
        // notional = 10_000 * 0.05 = 500; contracts = 500 / (50_000 * 0.01) = 1.0
        assert_eq!(
            spec.size_for_risk(dec!(10000), dec!(0.05), dec!(50000)),
            Some(dec!(1.0))
        );
        // Tiny equity floors below min_sz
        assert_eq!(spec.size_for_risk(dec!(10), dec!(0.05), dec!(50000)), None);
        // Degenerate price
        assert_eq!(
            spec.size_for_risk(dec!(10000), dec!(0.05), Decimal::ZERO),
            None
        );
    }
}
