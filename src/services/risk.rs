//! Daily-loss circuit breaker.
//!
//! Equity drawdown is measured against a baseline taken at the first tick
//! of each exchange day. Crossing the limit sets a sticky halt flag: new
//! admissions stay blocked until the next daily reset even if equity
//! recovers, because a bounce off the limit is exactly when an automated
//! strategy should not be re-armed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::config::RiskConfig;
use crate::error::Result;
use crate::persistence::Ledger;

const KEY_BASE_DATE: &str = "daily_base_date";
const KEY_BASE_EQUITY: &str = "daily_base_equity";
const KEY_HALTED: &str = "halted";

/// Offset of the exchange's book-keeping day from UTC.
const DAY_OFFSET_MS: i64 = 8 * 3600 * 1000;

/// Calendar date in the exchange's UTC+8 book-keeping zone.
fn day_key(now_ms: i64) -> String {
    DateTime::from_timestamp_millis(now_ms + DAY_OFFSET_MS)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

pub struct RiskManager {
    ledger: Arc<dyn Ledger>,
    cfg: RiskConfig,
}

impl RiskManager {
    pub fn new(ledger: Arc<dyn Ledger>, cfg: RiskConfig) -> Self {
        Self { ledger, cfg }
    }

    /// Current day's baseline equity, rolling the day over and seeding a
    /// missing or degenerate baseline from `equity`.
    pub async fn daily_baseline(&self, equity: Decimal) -> Result<Decimal> {
        self.daily_baseline_at(equity, Utc::now().timestamp_millis())
            .await
    }

    /// Whether new admissions are blocked for the rest of the day.
    pub async fn is_halted(&self, equity: Decimal) -> Result<bool> {
        self.is_halted_at(equity, Utc::now().timestamp_millis())
            .await
    }

    async fn ensure_daily_reset_at(&self, equity: Decimal, now_ms: i64) -> Result<()> {
        let today = day_key(now_ms);
        let last = self.ledger.kv_get(KEY_BASE_DATE).await?;
        if last.as_deref() != Some(today.as_str()) {
            self.ledger.kv_set(KEY_BASE_DATE, &today).await?;
            self.ledger
                .kv_set(KEY_BASE_EQUITY, &equity.to_string())
                .await?;
            self.ledger.kv_delete(KEY_HALTED).await?;
            warn!(day = %today, baseline = %equity, "daily baseline reset");
        }
        Ok(())
    }

    async fn daily_baseline_at(&self, equity: Decimal, now_ms: i64) -> Result<Decimal> {
        self.ensure_daily_reset_at(equity, now_ms).await?;
        match self.ledger.kv_get_decimal(KEY_BASE_EQUITY).await? {
            Some(base) if base > Decimal::ZERO => Ok(base),
            _ => {
                self.ledger
                    .kv_set(KEY_BASE_EQUITY, &equity.to_string())
                    .await?;
                Ok(equity)
            }
        }
    }

    async fn is_halted_at(&self, equity: Decimal, now_ms: i64) -> Result<bool> {
        if !self.cfg.enabled {
            return Ok(false);
        }
        self.ensure_daily_reset_at(equity, now_ms).await?;

        if self.ledger.kv_get(KEY_HALTED).await?.as_deref() == Some("1") {
            return Ok(true);
        }

        let base = self
            .ledger
            .kv_get_decimal(KEY_BASE_EQUITY)
            .await?
            .unwrap_or(equity);
        if base <= Decimal::ZERO {
            return Ok(false);
        }
        let drawdown = (base - equity) / base;
        if drawdown >= self.cfg.daily_loss_limit_pct {
            self.ledger.kv_set(KEY_HALTED, "1").await?;
            error!(
                %drawdown,
                limit = %self.cfg.daily_loss_limit_pct,
                baseline = %base,
                %equity,
                "daily loss limit hit, trading halted until the next reset"
            );
            return Ok(true);
        }
        Ok(false)
    }
}
