//! Account snapshot used by the order gates.
//!
//! The account stream drain writes its pushes into the `ws:*` ledger keys;
//! a refresh takes the whole snapshot from there while those keys are
//! fresh, and falls back to REST otherwise. One refresh never mixes the
//! two sources: a half-stream half-REST view could pair a new balance
//! with a stale position and wave an order through the conflict gate.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::adapters::ExchangeApi;
use crate::config::{StreamConfig, TradeConfig};
use crate::domain::{sum_positions, PortfolioView};
use crate::error::Result;
use crate::persistence::Ledger;

/// Epoch ms of the last account-stream event, whatever its channel.
pub const KEY_WS_UPTIME: &str = "ws:uptime";
pub const KEY_WS_EQUITY: &str = "ws:equity_usd";
pub const KEY_WS_AVAIL: &str = "ws:avail_usdt";
pub const KEY_WS_POS_LONG: &str = "ws:pos_long";
pub const KEY_WS_POS_SHORT: &str = "ws:pos_short";
pub const KEY_WS_UPL_LONG: &str = "ws:upl_long";
pub const KEY_WS_UPL_SHORT: &str = "ws:upl_short";
pub const KEY_WS_UPL_RATIO_LONG: &str = "ws:upl_ratio_long";
pub const KEY_WS_UPL_RATIO_SHORT: &str = "ws:upl_ratio_short";

/// Refreshes a [`PortfolioView`] from the freshest available source.
pub struct PortfolioService {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<dyn Ledger>,
    inst_id: String,
    fresh_window_sec: u64,
}

impl PortfolioService {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        ledger: Arc<dyn Ledger>,
        trade: &TradeConfig,
        stream: &StreamConfig,
    ) -> Self {
        Self {
            exchange,
            ledger,
            inst_id: trade.inst_id.clone(),
            fresh_window_sec: stream.ws_fresh_window_sec,
        }
    }

    /// Refresh `view` in place. Balance and position failures degrade
    /// independently: a failed balance pull keeps the previous numbers, a
    /// failed position pull zeroes the sizes so a dead snapshot cannot
    /// hold the conflict gate open forever.
    pub async fn refresh(&self, view: &mut PortfolioView) -> Result<()> {
        self.refresh_at(view, chrono::Utc::now().timestamp_millis())
            .await
    }

    async fn refresh_at(&self, view: &mut PortfolioView, now_ms: i64) -> Result<()> {
        if self.ws_fresh(now_ms).await? {
            if let Some(snapshot) = self.snapshot_from_stream().await? {
                *view = snapshot;
                debug!(equity = %view.equity, avail = %view.avail, "portfolio from stream snapshot");
                return Ok(());
            }
        }

        match self.exchange.account_balance().await {
            Ok(balance) => {
                view.equity = balance.equity_usd;
                view.avail = balance.avail_usdt;
            }
            Err(e) => {
                warn!(error = %e, "balance refresh failed, keeping previous values");
            }
        }

        match self.exchange.positions(&self.inst_id).await {
            Ok(positions) => {
                let (long_sz, short_sz) = sum_positions(&positions);
                view.pos_long = long_sz;
                view.pos_short = short_sz;
            }
            Err(e) => {
                warn!(error = %e, "position refresh failed, zeroing sizes");
                view.pos_long = Decimal::ZERO;
                view.pos_short = Decimal::ZERO;
            }
        }
        Ok(())
    }

    async fn ws_fresh(&self, now_ms: i64) -> Result<bool> {
        let Some(uptime_ms) = self.ledger.kv_get_i64(KEY_WS_UPTIME).await? else {
            return Ok(false);
        };
        Ok(now_ms - uptime_ms <= self.fresh_window_sec as i64 * 1000)
    }

    /// The stream snapshot is usable only when every field is present;
    /// a partial one (balance pushed, positions not yet) falls through to
    /// REST as a whole.
    async fn snapshot_from_stream(&self) -> Result<Option<PortfolioView>> {
        let equity = self.ledger.kv_get_decimal(KEY_WS_EQUITY).await?;
        let avail = self.ledger.kv_get_decimal(KEY_WS_AVAIL).await?;
        let pos_long = self.ledger.kv_get_decimal(KEY_WS_POS_LONG).await?;
        let pos_short = self.ledger.kv_get_decimal(KEY_WS_POS_SHORT).await?;

        match (equity, avail, pos_long, pos_short) {
            (Some(equity), Some(avail), Some(pos_long), Some(pos_short)) => {
                Ok(Some(PortfolioView {
                    equity,
                    avail,
                    pos_long,
                    pos_short,
                }))
            }
            _ => Ok(None),
        }
    }
}
