//! Exchange-facing trait consumed by the trading services.

use async_trait::async_trait;

use crate::domain::{
    AccountBalance, Candle, InstrumentSpec, OrderDetail, OrderIntent, Position, TpslIntent,
};
use crate::error::Result;

/// REST surface the order lifecycle and portfolio services depend on.
///
/// Implemented by [`OkxRestClient`](super::OkxRestClient); mocked in service
/// tests so gating and reconciliation paths can be driven without a network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Contract/lot/tick parameters for an instrument, cached after first use.
    async fn instrument_spec(&self, inst_id: &str) -> Result<InstrumentSpec>;

    /// Account equity and available USDT margin.
    async fn account_balance(&self) -> Result<AccountBalance>;

    /// Open positions for one instrument.
    async fn positions(&self, inst_id: &str) -> Result<Vec<Position>>;

    /// Recent candles, newest first, as the exchange returns them.
    async fn candles(&self, inst_id: &str, bar: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Submit a market order; returns the exchange order id when reported.
    async fn place_market_order(&self, intent: &OrderIntent) -> Result<Option<String>>;

    /// Look an order up by client order id, falling back to the history
    /// endpoints once it has left the live-order window.
    async fn get_order_anywhere(&self, inst_id: &str, cl_ord_id: &str) -> Result<OrderDetail>;

    /// Cancel by client order id.
    async fn cancel_order(&self, inst_id: &str, cl_ord_id: &str) -> Result<()>;

    /// Attach a take-profit/stop-loss conditional order.
    async fn place_tpsl(&self, intent: &TpslIntent) -> Result<()>;
}
