use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Order side (buy or sell), lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position side in hedge mode.
///
/// Rows reporting `net` (one-way mode) parse to `None` and are not
/// attributed to either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosSide {
    Long,
    Short,
}

impl PosSide {
    /// Position side an opening order of `side` establishes.
    pub fn from_order_side(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PosSide::Long,
            OrderSide::Sell => PosSide::Short,
        }
    }

    /// Order side that closes a position on this side.
    pub fn close_side(&self) -> OrderSide {
        match self {
            PosSide::Long => OrderSide::Sell,
            PosSide::Short => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PosSide::Long => "long",
            PosSide::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Some(PosSide::Long),
            "short" => Some(PosSide::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for PosSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exchange-reported order state.
///
/// Transitions are observed through explicit queries only, never inferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Live,
    PartiallyFilled,
    Filled,
    Canceled,
    #[default]
    Unknown,
}

impl OrderState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => OrderState::Live,
            "partially_filled" => OrderState::PartiallyFilled,
            "filled" => OrderState::Filled,
            "canceled" | "mmp_canceled" => OrderState::Canceled,
            _ => OrderState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Live => "live",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::Filled => "filled",
            OrderState::Canceled => "canceled",
            OrderState::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled)
    }
}

/// An admitted signal on its way to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub idem_key: String,
    pub cl_ord_id: String,
    pub inst_id: String,
    pub side: OrderSide,
    pub pos_side: PosSide,
    pub size: Decimal,
    pub entry_px: Decimal,
    /// Submission time, epoch milliseconds
    pub created_ms: i64,
}

/// A take-profit/stop-loss leg for a filled parent order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpslIntent {
    pub inst_id: String,
    pub parent_cl_ord_id: String,
    pub close_side: OrderSide,
    pub pos_side: PosSide,
    pub size: Decimal,
    pub tp_trigger: Decimal,
    pub sl_trigger: Decimal,
}

/// Order details reported by the exchange, with fields the API may omit
/// left optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderDetail {
    pub ord_id: String,
    pub cl_ord_id: String,
    pub state: OrderState,
    pub sz: Option<Decimal>,
    pub acc_fill_sz: Option<Decimal>,
    pub avg_px: Option<Decimal>,
    pub last_px: Option<Decimal>,
    pub px: Option<Decimal>,
    pub side: Option<OrderSide>,
    pub pos_side: Option<PosSide>,
}

impl OrderDetail {
    /// Best available fill price: `avgPx`, else the last traded price,
    /// else the order price. The exchange reports zero for fields it has
    /// no value for yet, so non-positive candidates are skipped.
    pub fn fill_price(&self) -> Option<Decimal> {
        [self.avg_px, self.last_px, self.px]
            .into_iter()
            .flatten()
            .find(|px| *px > Decimal::ZERO)
    }
}

/// Derive the exchange-facing client order id for an idempotency key.
///
/// Stable hash prefix makes retries of the same key recognizable; the
/// five-digit time suffix disambiguates distinct submissions that reuse a
/// key after cleanup. Alphanumeric and 26 chars, inside the exchange's
/// 32-char limit.
pub fn derive_cl_ord_id(idem_key: &str, epoch_ms: i64) -> String {
    let digest = Sha256::digest(idem_key.as_bytes());
    let tail = hex::encode(digest)[..20].to_string();
    format!("Q{}{:05}", tail, epoch_ms.rem_euclid(100_000))
}

/// Take-profit and stop-loss trigger prices for an entry.
pub fn tpsl_prices(
    entry_px: Decimal,
    pos_side: PosSide,
    tp_pct: Decimal,
    sl_pct: Decimal,
) -> (Decimal, Decimal) {
    match pos_side {
        PosSide::Long => (
            entry_px * (Decimal::ONE + tp_pct),
            entry_px * (Decimal::ONE - sl_pct),
        ),
        PosSide::Short => (
            entry_px * (Decimal::ONE - tp_pct),
            entry_px * (Decimal::ONE + sl_pct),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_state_parse() {
        assert_eq!(OrderState::parse("live"), OrderState::Live);
        assert_eq!(OrderState::parse("FILLED"), OrderState::Filled);
        assert_eq!(OrderState::parse("mmp_canceled"), OrderState::Canceled);
        assert_eq!(OrderState::parse("???"), OrderState::Unknown);
        assert!(OrderState::Filled.is_terminal());
        assert!(!OrderState::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_pos_side_mapping() {
        assert_eq!(PosSide::from_order_side(OrderSide::Buy), PosSide::Long);
        assert_eq!(PosSide::from_order_side(OrderSide::Sell), PosSide::Short);
        assert_eq!(PosSide::Long.close_side(), OrderSide::Sell);
        assert_eq!(PosSide::Short.close_side(), OrderSide::Buy);
        assert_eq!(PosSide::parse("net"), None);
        assert_eq!(PosSide::parse("LONG"), Some(PosSide::Long));
    }

    #[test]
    fn test_derive_cl_ord_id_shape() {
        let id = derive_cl_ord_id("SIG_OPEN_LONG_1700000000", 1_700_000_012_345);
        assert_eq!(id.len(), 26);
        assert!(id.starts_with('Q'));
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        // Suffix is epoch_ms % 100000, zero padded
        assert!(id.ends_with("12345"));
    }

    #[test]
    fn test_derive_cl_ord_id_stable_prefix() {
        let a = derive_cl_ord_id("same-key", 1_700_000_000_001);
        let b = derive_cl_ord_id("same-key", 1_700_000_099_999);
        assert_eq!(a[..21], b[..21]);

        let c = derive_cl_ord_id("other-key", 1_700_000_000_001);
        assert_ne!(a[..21], c[..21]);
    }

    #[test]
    fn test_fill_price_fallback_chain() {
        let mut detail = OrderDetail {
            last_px: Some(dec!(101)),
            px: Some(dec!(100)),
            ..OrderDetail::default()
        };
        assert_eq!(detail.fill_price(), Some(dec!(101)));

        detail.avg_px = Some(dec!(100.5));
        assert_eq!(detail.fill_price(), Some(dec!(100.5)));

        detail.avg_px = None;
        detail.last_px = None;
        assert_eq!(detail.fill_price(), Some(dec!(100)));

        // A reported-but-zero average falls through to the next candidate.
        detail.avg_px = Some(dec!(0));
        detail.last_px = Some(dec!(101));
        assert_eq!(detail.fill_price(), Some(dec!(101)));
    }

    #[test]
    fn test_tpsl_prices_long() {
        let (tp, sl) = tpsl_prices(dec!(100), PosSide::Long, dec!(0.01), dec!(0.005));
        assert_eq!(tp, dec!(101.00));
        assert_eq!(sl, dec!(99.500));
    }

    #[test]
    fn test_tpsl_prices_short() {
        let (tp, sl) = tpsl_prices(dec!(100), PosSide::Short, dec!(0.01), dec!(0.005));
        assert_eq!(tp, dec!(99.00));
        assert_eq!(sl, dec!(100.500));
    }
}
