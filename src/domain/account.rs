use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PosSide;

/// Position mode configured on the account.
///
/// Hedge-mode accounts (`long_short_mode`) require `posSide` on order
/// placement; net-mode accounts reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PosMode {
    LongShort,
    Net,
    #[default]
    Unknown,
}

impl PosMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "long_short_mode" => PosMode::LongShort,
            "net_mode" => PosMode::Net,
            _ => PosMode::Unknown,
        }
    }

    pub fn is_hedge(&self) -> bool {
        matches!(self, PosMode::LongShort)
    }
}

/// Account-level balance figures in USD terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Total account equity (USD)
    pub equity_usd: Decimal,
    /// Available USDT balance usable as margin
    pub avail_usdt: Decimal,
}

/// One position row from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub inst_id: String,
    /// `None` for net-mode rows, which are not attributed to a side
    pub pos_side: Option<PosSide>,
    /// Contracts held
    pub pos: Decimal,
    pub avg_px: Option<Decimal>,
    /// Unrealized PnL
    pub upl: Option<Decimal>,
    /// Unrealized PnL as a fraction of margin
    pub upl_ratio: Option<Decimal>,
}

/// Point-in-time equity and position sizes consumed by order gating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioView {
    pub equity: Decimal,
    pub avail: Decimal,
    pub pos_long: Decimal,
    pub pos_short: Decimal,
}

impl PortfolioView {
    pub fn has_long(&self) -> bool {
        self.pos_long > Decimal::ZERO
    }

    pub fn has_short(&self) -> bool {
        self.pos_short > Decimal::ZERO
    }
}

/// Sum hedge-mode position sizes per side. Net-mode rows are skipped.
pub fn sum_positions(positions: &[Position]) -> (Decimal, Decimal) {
    let mut long_sz = Decimal::ZERO;
    let mut short_sz = Decimal::ZERO;
    for p in positions {
        match p.pos_side {
            Some(PosSide::Long) => long_sz += p.pos,
            Some(PosSide::Short) => short_sz += p.pos,
            None => {}
        }
    }
    (long_sz, short_sz)
}
