//! Idempotent order lifecycle: admission, submission, timeout
//! reconciliation, and one-shot TP/SL attachment.
//!
//! Every signal carries an idempotency key; the ledger holds one `done`
//! flag and one set of pending markers per key, plus a single
//! `pending_current_idem` slot. That slot enforces the one-order-in-flight
//! rule: while any order is pending, no new signal is admitted.
//!
//! The pending marker is written BEFORE the exchange call. If the process
//! dies mid-submit, restart housekeeping finds the marker, runs the
//! exhaustive order lookup, and either finalizes the order or closes the
//! key out. Nothing is ever submitted twice for the same key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::adapters::ExchangeApi;
use crate::config::TradeConfig;
use crate::domain::{
    derive_cl_ord_id, tpsl_prices, InstrumentSpec, OrderDetail, OrderIntent, OrderState,
    PortfolioView, PosSide, TpslIntent,
};
use crate::error::Result;
use crate::persistence::{Ledger, OrderRecord};
use crate::strategy::{Signal, SignalAction};

/// Idempotency key of the one order allowed in flight.
const KEY_PENDING_CURRENT: &str = "pending_current_idem";
/// Epoch ms of the last gate rejection or failed submission.
const KEY_LAST_REJECT_TS: &str = "last_reject_ts";
/// Epoch ms of the last accepted submission.
const KEY_LAST_TRADE_TS: &str = "last_trade_ts";

fn pending_cl_key(idem: &str) -> String {
    format!("pending:{}:clOrdId", idem)
}

fn pending_ts_key(idem: &str) -> String {
    format!("pending:{}:ts", idem)
}

fn done_key(idem: &str) -> String {
    format!("done:{}", idem)
}

fn tpsl_key(idem: &str) -> String {
    format!("tp_sl_set:{}", idem)
}

/// Drives each signal through `new → pending → terminal → done`.
pub struct OrderLifecycle {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<dyn Ledger>,
    trade: TradeConfig,
}

impl OrderLifecycle {
    pub fn new(exchange: Arc<dyn ExchangeApi>, ledger: Arc<dyn Ledger>, trade: TradeConfig) -> Self {
        Self {
            exchange,
            ledger,
            trade,
        }
    }

    /// Admit, size, gate, and submit one signal. Gate rejections return
    /// `Ok(())`: a refused signal is normal operation, not an error.
    pub async fn on_signal(
        &self,
        signal: &Signal,
        entry_px: Decimal,
        portfolio: &PortfolioView,
    ) -> Result<()> {
        self.on_signal_at(signal, entry_px, portfolio, Utc::now().timestamp_millis())
            .await
    }

    async fn on_signal_at(
        &self,
        signal: &Signal,
        entry_px: Decimal,
        portfolio: &PortfolioView,
        now_ms: i64,
    ) -> Result<()> {
        let idem = signal.idem_key.as_str();

        if self.is_done(idem).await? {
            debug!(idem, "signal already done, ignoring");
            return Ok(());
        }
        // One order in flight system-wide, whichever key owns it.
        if let Some(current) = self.ledger.kv_get(KEY_PENDING_CURRENT).await? {
            debug!(idem, pending = %current, "an order is already pending, ignoring signal");
            return Ok(());
        }
        if self.ledger.kv_get(&pending_cl_key(idem)).await?.is_some() {
            debug!(idem, "signal already pending, ignoring");
            return Ok(());
        }
        if self
            .in_cooldown(KEY_LAST_REJECT_TS, self.trade.reject_cooldown_sec, now_ms)
            .await?
        {
            debug!(idem, "inside reject cooldown, ignoring signal");
            return Ok(());
        }
        if self
            .in_cooldown(KEY_LAST_TRADE_TS, self.trade.cooldown_sec, now_ms)
            .await?
        {
            debug!(idem, "inside trade cooldown, ignoring signal");
            return Ok(());
        }
        if entry_px <= Decimal::ZERO {
            warn!(idem, %entry_px, "entry price not positive, ignoring signal");
            return Ok(());
        }

        let side = signal.action.order_side();
        let pos_side = PosSide::from_order_side(side);

        if self.trade.max_positions <= 1 {
            match signal.action {
                SignalAction::OpenLong if portfolio.has_short() => {
                    warn!(pos_short = %portfolio.pos_short, "long blocked: short position open");
                    return Ok(());
                }
                SignalAction::OpenShort if portfolio.has_long() => {
                    warn!(pos_long = %portfolio.pos_long, "short blocked: long position open");
                    return Ok(());
                }
                _ => {}
            }
        }

        let spec = match self.exchange.instrument_spec(&self.trade.inst_id).await {
            Ok(spec) => spec,
            Err(e) => {
                warn!(inst_id = %self.trade.inst_id, error = %e, "instrument spec unavailable, ignoring signal");
                return Ok(());
            }
        };
        let Some(size) = spec.size_for_risk(portfolio.equity, self.trade.risk_pct, entry_px) else {
            warn!(idem, equity = %portfolio.equity, "risk-sized order below minimum size, ignoring signal");
            return Ok(());
        };

        if !margin_ok(&self.trade, &spec, entry_px, size, portfolio.avail) {
            self.record_reject(idem, now_ms).await?;
            return Ok(());
        }

        let (tp, sl) = tpsl_prices(entry_px, pos_side, self.trade.tp_pct, self.trade.sl_pct);
        let cl_ord_id = derive_cl_ord_id(idem, now_ms);
        let intent = OrderIntent {
            idem_key: idem.to_string(),
            cl_ord_id: cl_ord_id.clone(),
            inst_id: self.trade.inst_id.clone(),
            side,
            pos_side,
            size,
            entry_px,
            created_ms: now_ms,
        };

        info!(
            action = signal.action.as_str(),
            inst_id = %intent.inst_id,
            %entry_px,
            %size,
            %tp,
            %sl,
            cl_ord_id = %intent.cl_ord_id,
            reason = %signal.reason,
            "submitting market order"
        );

        // Marker first: a crash mid-call must leave a reconcilable trace.
        self.ledger.kv_set(KEY_PENDING_CURRENT, idem).await?;
        self.ledger.kv_set(&pending_cl_key(idem), &cl_ord_id).await?;
        self.ledger
            .kv_set(&pending_ts_key(idem), &now_ms.to_string())
            .await?;

        let ord_id = match self.exchange.place_market_order(&intent).await {
            Ok(ord_id) => ord_id,
            Err(e) => {
                error!(cl_ord_id = %intent.cl_ord_id, error = %e, "order submission failed");
                self.cleanup_pending(idem).await;
                self.record_reject(idem, now_ms).await?;
                return Ok(());
            }
        };

        let record = OrderRecord {
            ts: DateTime::from_timestamp_millis(now_ms).unwrap_or_else(Utc::now),
            idem_key: idem.to_string(),
            cl_ord_id: cl_ord_id.clone(),
            ord_id,
            inst_id: intent.inst_id.clone(),
            side: side.as_str().to_string(),
            pos_side: pos_side.as_str().to_string(),
            sz: size,
            px: Some(entry_px),
            state: "submitted".to_string(),
            note: Some(signal.reason.clone()),
        };
        if let Err(e) = self.ledger.record_order(&record).await {
            warn!(cl_ord_id = %cl_ord_id, error = %e, "order journal write failed");
        }

        self.ledger
            .kv_set(KEY_LAST_TRADE_TS, &now_ms.to_string())
            .await?;
        Ok(())
    }

    /// Resolve the pending order, if any, once its timeout has elapsed.
    /// Runs every control-loop tick, before new-signal evaluation.
    pub async fn housekeep(&self) -> Result<()> {
        self.housekeep_at(Utc::now().timestamp_millis()).await
    }

    async fn housekeep_at(&self, now_ms: i64) -> Result<()> {
        let Some(idem) = self.ledger.kv_get(KEY_PENDING_CURRENT).await? else {
            return Ok(());
        };

        if self.is_done(&idem).await? {
            self.cleanup_pending(&idem).await;
            return Ok(());
        }
        let Some(cl_ord_id) = self.ledger.kv_get(&pending_cl_key(&idem)).await? else {
            self.cleanup_pending(&idem).await;
            return Ok(());
        };

        let submitted_ms = self
            .ledger
            .kv_get_i64(&pending_ts_key(&idem))
            .await?
            .unwrap_or(0);
        if submitted_ms <= 0 {
            return Ok(());
        }
        let elapsed_ms = now_ms - submitted_ms;
        if elapsed_ms < self.trade.order_timeout_sec as i64 * 1000 {
            return Ok(());
        }

        warn!(
            idem = %idem,
            cl_ord_id = %cl_ord_id,
            elapsed_sec = elapsed_ms / 1000,
            "pending order timed out, reconciling"
        );

        let detail = match self
            .exchange
            .get_order_anywhere(&self.trade.inst_id, &cl_ord_id)
            .await
        {
            Ok(detail) => detail,
            Err(e) => {
                // Unconfirmable order: close the key out rather than loop.
                error!(cl_ord_id = %cl_ord_id, error = %e, "timed-out order not found anywhere");
                self.mark_done(&idem).await?;
                self.cleanup_pending(&idem).await;
                return Ok(());
            }
        };

        let acc_fill = detail.acc_fill_sz.unwrap_or(Decimal::ZERO);
        warn!(cl_ord_id = %cl_ord_id, state = ?detail.state, %acc_fill, "order state at timeout");

        match detail.state {
            OrderState::Filled => {
                self.attach_tpsl(&idem, &cl_ord_id, &detail, None).await;
                self.mark_done(&idem).await?;
                self.cleanup_pending(&idem).await;
            }
            OrderState::Canceled => {
                self.mark_done(&idem).await?;
                self.cleanup_pending(&idem).await;
            }
            OrderState::PartiallyFilled => {
                // Keep the fill, drop the remainder.
                if let Err(e) = self
                    .exchange
                    .cancel_order(&self.trade.inst_id, &cl_ord_id)
                    .await
                {
                    warn!(cl_ord_id = %cl_ord_id, error = %e, "remainder cancel failed");
                }
                self.attach_tpsl(&idem, &cl_ord_id, &detail, Some(acc_fill))
                    .await;
                self.mark_done(&idem).await?;
                self.cleanup_pending(&idem).await;
                warn!(cl_ord_id = %cl_ord_id, %acc_fill, "partial fill closed out");
            }
            OrderState::Live | OrderState::Unknown => {
                if self.trade.cancel_on_timeout {
                    match self
                        .exchange
                        .cancel_order(&self.trade.inst_id, &cl_ord_id)
                        .await
                    {
                        Ok(()) => warn!(cl_ord_id = %cl_ord_id, "order canceled on timeout"),
                        Err(e) => error!(cl_ord_id = %cl_ord_id, error = %e, "cancel on timeout failed"),
                    }
                }
                // Still pending; the next pass re-queries and finalizes.
            }
        }
        Ok(())
    }

    /// Attach the TP/SL pair for a filled or partially filled parent.
    /// Failures are logged, never fatal: the parent is closed out anyway
    /// and the operator sees the unprotected position in the log.
    async fn attach_tpsl(
        &self,
        idem: &str,
        cl_ord_id: &str,
        detail: &OrderDetail,
        force_sz: Option<Decimal>,
    ) {
        if let Err(e) = self.try_attach_tpsl(idem, cl_ord_id, detail, force_sz).await {
            error!(cl_ord_id = %cl_ord_id, error = %e, "tp/sl attach failed");
        }
    }

    async fn try_attach_tpsl(
        &self,
        idem: &str,
        cl_ord_id: &str,
        detail: &OrderDetail,
        force_sz: Option<Decimal>,
    ) -> Result<()> {
        if self.ledger.kv_get(&tpsl_key(idem)).await?.as_deref() == Some("1") {
            return Ok(());
        }

        let Some(fill_px) = detail.fill_price() else {
            warn!(cl_ord_id = %cl_ord_id, "no usable fill price, tp/sl skipped");
            return Ok(());
        };
        let size = force_sz.or(detail.acc_fill_sz).unwrap_or(Decimal::ZERO);
        if size <= Decimal::ZERO {
            warn!(cl_ord_id = %cl_ord_id, "no filled size, tp/sl skipped");
            return Ok(());
        }

        let pos_side = detail
            .pos_side
            .or_else(|| detail.side.map(PosSide::from_order_side))
            .unwrap_or(PosSide::Long);
        let (tp_trigger, sl_trigger) =
            tpsl_prices(fill_px, pos_side, self.trade.tp_pct, self.trade.sl_pct);

        let intent = TpslIntent {
            inst_id: self.trade.inst_id.clone(),
            parent_cl_ord_id: cl_ord_id.to_string(),
            close_side: pos_side.close_side(),
            pos_side,
            size,
            tp_trigger,
            sl_trigger,
        };
        self.exchange.place_tpsl(&intent).await?;

        // Flag only after the exchange accepted the conditional order.
        self.ledger.kv_set(&tpsl_key(idem), "1").await?;
        info!(
            cl_ord_id = %cl_ord_id,
            %fill_px,
            %size,
            pos_side = pos_side.as_str(),
            %tp_trigger,
            %sl_trigger,
            "tp/sl attached after fill"
        );
        Ok(())
    }

    async fn is_done(&self, idem: &str) -> Result<bool> {
        Ok(self.ledger.kv_get(&done_key(idem)).await?.as_deref() == Some("1"))
    }

    async fn mark_done(&self, idem: &str) -> Result<()> {
        self.ledger.kv_set(&done_key(idem), "1").await
    }

    async fn record_reject(&self, idem: &str, now_ms: i64) -> Result<()> {
        self.ledger
            .kv_set(KEY_LAST_REJECT_TS, &now_ms.to_string())
            .await?;
        self.mark_done(idem).await
    }

    async fn in_cooldown(&self, key: &str, window_sec: u64, now_ms: i64) -> Result<bool> {
        if window_sec == 0 {
            return Ok(false);
        }
        let Some(last_ms) = self.ledger.kv_get_i64(key).await? else {
            return Ok(false);
        };
        Ok(now_ms - last_ms < window_sec as i64 * 1000)
    }

    async fn cleanup_pending(&self, idem: &str) {
        for key in [
            KEY_PENDING_CURRENT.to_string(),
            pending_cl_key(idem),
            pending_ts_key(idem),
        ] {
            if let Err(e) = self.ledger.kv_delete(&key).await {
                warn!(key = %key, error = %e, "pending marker delete failed");
            }
        }
    }
}

/// Pre-trade margin gate. Blocks submissions the exchange would reject
/// with an insufficient-margin business code anyway. The boundary is
/// non-strict: required margin exactly equal to the buffered balance
/// passes.
fn margin_ok(
    trade: &TradeConfig,
    spec: &InstrumentSpec,
    entry_px: Decimal,
    size: Decimal,
    avail: Decimal,
) -> bool {
    if avail <= Decimal::ZERO {
        warn!(%avail, "order blocked: no available balance");
        return false;
    }

    if spec.ct_val <= Decimal::ZERO {
        // No contract value known: minimum-balance check only.
        if avail < trade.min_avail_usdt {
            warn!(%avail, min_avail = %trade.min_avail_usdt, "order blocked: available balance below minimum");
            return false;
        }
        return true;
    }

    let lever = if trade.leverage == 0 {
        Decimal::ONE
    } else {
        Decimal::from(trade.leverage)
    };
    let notional = entry_px * spec.ct_val * size;
    let required = notional / lever;
    if required > avail * trade.margin_buffer_ratio {
        warn!(
            %avail,
            %notional,
            %required,
            leverage = trade.leverage,
            buffer = %trade.margin_buffer_ratio,
            "order blocked: insufficient margin"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockExchangeApi;
    use crate::error::GambitError;
    use crate::persistence::SqliteStore;
    use rust_decimal_macros::dec;

    const INST: &str = "BTC-USDT-SWAP";
    const NOW_MS: i64 = 1_700_000_000_000;

    fn trade_config() -> TradeConfig {
        TradeConfig {
            inst_id: INST.to_string(),
            leverage: 10,
            risk_pct: dec!(0.05),
            tp_pct: dec!(0.01),
            sl_pct: dec!(0.005),
            max_positions: 1,
            order_timeout_sec: 60,
            cooldown_sec: 0,
            reject_cooldown_sec: 15,
            cancel_on_timeout: true,
            margin_buffer_ratio: dec!(0.95),
            min_avail_usdt: dec!(5),
            ..TradeConfig::default()
        }
    }

    fn spec() -> InstrumentSpec {
        InstrumentSpec {
            inst_id: INST.to_string(),
            ct_val: dec!(0.01),
            lot_sz: dec!(0.1),
            min_sz: dec!(0.1),
            tick_sz: dec!(0.1),
        }
    }

    fn portfolio() -> PortfolioView {
        PortfolioView {
            equity: dec!(10000),
            avail: dec!(8000),
            pos_long: Decimal::ZERO,
            pos_short: Decimal::ZERO,
        }
    }

    fn long_signal(idem: &str) -> Signal {
        Signal {
            action: SignalAction::OpenLong,
            reason: "EMA golden cross".to_string(),
            idem_key: idem.to_string(),
        }
    }

    fn filled_detail(cl_ord_id: &str) -> OrderDetail {
        OrderDetail {
            ord_id: "123".to_string(),
            cl_ord_id: cl_ord_id.to_string(),
            state: OrderState::Filled,
            sz: Some(dec!(1)),
            acc_fill_sz: Some(dec!(1)),
            avg_px: Some(dec!(50000)),
            side: Some(crate::domain::OrderSide::Buy),
            pos_side: Some(PosSide::Long),
            ..OrderDetail::default()
        }
    }

    async fn lifecycle(mock: MockExchangeApi) -> (OrderLifecycle, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        (
            OrderLifecycle::new(Arc::new(mock), store.clone(), trade_config()),
            store,
        )
    }

    async fn lifecycle_with(
        mock: MockExchangeApi,
        trade: TradeConfig,
    ) -> (OrderLifecycle, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        (
            OrderLifecycle::new(Arc::new(mock), store.clone(), trade),
            store,
        )
    }

    async fn seed_pending(store: &SqliteStore, idem: &str, cl: &str, submitted_ms: i64) {
        store.kv_set(KEY_PENDING_CURRENT, idem).await.unwrap();
        store.kv_set(&pending_cl_key(idem), cl).await.unwrap();
        store
            .kv_set(&pending_ts_key(idem), &submitted_ms.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_submit_records_markers_and_journal() {
        let mut mock = MockExchangeApi::new();
        mock.expect_instrument_spec().returning(|_| Ok(spec()));
        mock.expect_place_market_order()
            .times(1)
            .returning(|_| Ok(Some("900001".to_string())));

        let (lc, store) = lifecycle(mock).await;
        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &portfolio(), NOW_MS)
            .await
            .unwrap();

        assert_eq!(
            store.kv_get(KEY_PENDING_CURRENT).await.unwrap().as_deref(),
            Some("SIG_A")
        );
        assert!(store.kv_get(&pending_cl_key("SIG_A")).await.unwrap().is_some());
        assert_eq!(
            store.kv_get_i64(&pending_ts_key("SIG_A")).await.unwrap(),
            Some(NOW_MS)
        );
        assert_eq!(store.kv_get_i64(KEY_LAST_TRADE_TS).await.unwrap(), Some(NOW_MS));

        let rows = store.recent_orders(5).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].idem_key, "SIG_A");
        assert_eq!(rows[0].ord_id.as_deref(), Some("900001"));
        assert_eq!(rows[0].state, "submitted");
    }

    #[tokio::test]
    async fn test_second_signal_blocked_while_first_pending() {
        let mut mock = MockExchangeApi::new();
        mock.expect_instrument_spec().returning(|_| Ok(spec()));
        // Exactly one submission across both signals.
        mock.expect_place_market_order()
            .times(1)
            .returning(|_| Ok(None));

        let (lc, store) = lifecycle(mock).await;
        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &portfolio(), NOW_MS)
            .await
            .unwrap();
        lc.on_signal_at(&long_signal("SIG_B"), dec!(50000), &portfolio(), NOW_MS + 1)
            .await
            .unwrap();

        assert_eq!(
            store.kv_get(KEY_PENDING_CURRENT).await.unwrap().as_deref(),
            Some("SIG_A")
        );
        assert!(store.kv_get(&pending_cl_key("SIG_B")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resubmitting_same_key_is_a_noop() {
        let mut mock = MockExchangeApi::new();
        mock.expect_instrument_spec().returning(|_| Ok(spec()));
        mock.expect_place_market_order()
            .times(1)
            .returning(|_| Ok(None));

        let (lc, _store) = lifecycle(mock).await;
        let sig = long_signal("SIG_A");
        lc.on_signal_at(&sig, dec!(50000), &portfolio(), NOW_MS)
            .await
            .unwrap();
        lc.on_signal_at(&sig, dec!(50000), &portfolio(), NOW_MS + 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_done_signal_ignored() {
        // No expectations: any exchange call panics the test.
        let (lc, store) = lifecycle(MockExchangeApi::new()).await;
        store.kv_set(&done_key("SIG_A"), "1").await.unwrap();

        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &portfolio(), NOW_MS)
            .await
            .unwrap();
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reject_cooldown_blocks_admission() {
        let (lc, store) = lifecycle(MockExchangeApi::new()).await;
        let recent = NOW_MS - 5_000; // inside the 15s window
        store
            .kv_set(KEY_LAST_REJECT_TS, &recent.to_string())
            .await
            .unwrap();

        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &portfolio(), NOW_MS)
            .await
            .unwrap();
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trade_cooldown_blocks_admission() {
        let mut trade = trade_config();
        trade.cooldown_sec = 30;
        let (lc, store) = lifecycle_with(MockExchangeApi::new(), trade).await;
        let recent = NOW_MS - 10_000;
        store
            .kv_set(KEY_LAST_TRADE_TS, &recent.to_string())
            .await
            .unwrap();

        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &portfolio(), NOW_MS)
            .await
            .unwrap();
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_long_blocked_while_short_open() {
        let (lc, store) = lifecycle(MockExchangeApi::new()).await;
        let mut pf = portfolio();
        pf.pos_short = dec!(2);

        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &pf, NOW_MS)
            .await
            .unwrap();
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
        // The conflict is not a rejection: no cooldown, no done flag.
        assert!(store.kv_get(KEY_LAST_REJECT_TS).await.unwrap().is_none());
        assert!(store.kv_get(&done_key("SIG_A")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_margin_gate_failure_marks_done_and_cools_down() {
        let mut mock = MockExchangeApi::new();
        mock.expect_instrument_spec().returning(|_| Ok(spec()));
        // No place_market_order expectation: submission would panic.

        let (lc, store) = lifecycle(mock).await;
        let mut pf = portfolio();
        pf.avail = dec!(1); // nowhere near the required margin

        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &pf, NOW_MS)
            .await
            .unwrap();

        assert_eq!(store.kv_get(&done_key("SIG_A")).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.kv_get_i64(KEY_LAST_REJECT_TS).await.unwrap(), Some(NOW_MS));
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submission_failure_cleans_markers_and_marks_done() {
        let mut mock = MockExchangeApi::new();
        mock.expect_instrument_spec().returning(|_| Ok(spec()));
        mock.expect_place_market_order().times(1).returning(|_| {
            Err(GambitError::Exchange {
                code: "51008".to_string(),
                message: "insufficient margin".to_string(),
            })
        });

        let (lc, store) = lifecycle(mock).await;
        lc.on_signal_at(&long_signal("SIG_A"), dec!(50000), &portfolio(), NOW_MS)
            .await
            .unwrap();

        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
        assert!(store.kv_get(&pending_cl_key("SIG_A")).await.unwrap().is_none());
        assert_eq!(store.kv_get(&done_key("SIG_A")).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.kv_get_i64(KEY_LAST_REJECT_TS).await.unwrap(), Some(NOW_MS));
        // Failed submissions never start the trade cooldown.
        assert!(store.kv_get(KEY_LAST_TRADE_TS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_housekeep_noop_without_marker() {
        let (lc, _store) = lifecycle(MockExchangeApi::new()).await;
        lc.housekeep_at(NOW_MS).await.unwrap();
    }

    #[tokio::test]
    async fn test_housekeep_noop_before_timeout() {
        let (lc, store) = lifecycle(MockExchangeApi::new()).await;
        seed_pending(&store, "SIG_A", "Qabc", NOW_MS - 30_000).await;

        lc.housekeep_at(NOW_MS).await.unwrap();
        assert_eq!(
            store.kv_get(KEY_PENDING_CURRENT).await.unwrap().as_deref(),
            Some("SIG_A")
        );
    }

    #[tokio::test]
    async fn test_housekeep_filled_attaches_tpsl_once() {
        let mut mock = MockExchangeApi::new();
        mock.expect_get_order_anywhere()
            .times(1)
            .returning(|_, cl| Ok(filled_detail(cl)));
        mock.expect_place_tpsl()
            .times(1)
            .withf(|intent| {
                intent.close_side == crate::domain::OrderSide::Sell
                    && intent.pos_side == PosSide::Long
                    && intent.size == dec!(1)
                    && intent.tp_trigger == dec!(50500.00)
                    && intent.sl_trigger == dec!(49750.000)
            })
            .returning(|_| Ok(()));

        let (lc, store) = lifecycle(mock).await;
        seed_pending(&store, "SIG_A", "Qabc", NOW_MS - 61_000).await;

        lc.housekeep_at(NOW_MS).await.unwrap();

        assert_eq!(store.kv_get(&done_key("SIG_A")).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.kv_get(&tpsl_key("SIG_A")).await.unwrap().as_deref(), Some("1"));
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());

        // Marker is gone, so the next pass cannot re-query or re-attach.
        lc.housekeep_at(NOW_MS + 1_000).await.unwrap();
    }

    #[tokio::test]
    async fn test_housekeep_partial_fill_cancels_and_sizes_tpsl_to_fill() {
        let mut mock = MockExchangeApi::new();
        mock.expect_get_order_anywhere().times(1).returning(|_, cl| {
            let mut detail = filled_detail(cl);
            detail.state = OrderState::PartiallyFilled;
            detail.sz = Some(dec!(1.0));
            detail.acc_fill_sz = Some(dec!(0.5));
            Ok(detail)
        });
        mock.expect_cancel_order().times(1).returning(|_, _| Ok(()));
        mock.expect_place_tpsl()
            .times(1)
            .withf(|intent| intent.size == dec!(0.5))
            .returning(|_| Ok(()));

        let (lc, store) = lifecycle(mock).await;
        seed_pending(&store, "SIG_A", "Qabc", NOW_MS - 61_000).await;

        lc.housekeep_at(NOW_MS).await.unwrap();
        assert_eq!(store.kv_get(&done_key("SIG_A")).await.unwrap().as_deref(), Some("1"));
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_housekeep_lookup_failure_closes_key() {
        let mut mock = MockExchangeApi::new();
        mock.expect_get_order_anywhere().times(1).returning(|_, cl| {
            Err(GambitError::OrderNotFound {
                cl_ord_id: cl.to_string(),
            })
        });

        let (lc, store) = lifecycle(mock).await;
        seed_pending(&store, "SIG_A", "Qabc", NOW_MS - 61_000).await;

        lc.housekeep_at(NOW_MS).await.unwrap();
        assert_eq!(store.kv_get(&done_key("SIG_A")).await.unwrap().as_deref(), Some("1"));
        assert!(store.kv_get(KEY_PENDING_CURRENT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_housekeep_live_cancels_but_stays_pending() {
        let mut mock = MockExchangeApi::new();
        mock.expect_get_order_anywhere().times(1).returning(|_, cl| {
            let mut detail = filled_detail(cl);
            detail.state = OrderState::Live;
            detail.acc_fill_sz = Some(Decimal::ZERO);
            Ok(detail)
        });
        mock.expect_cancel_order().times(1).returning(|_, _| Ok(()));

        let (lc, store) = lifecycle(mock).await;
        seed_pending(&store, "SIG_A", "Qabc", NOW_MS - 61_000).await;

        lc.housekeep_at(NOW_MS).await.unwrap();

        // The cancel does not force a transition; the next pass re-queries.
        assert_eq!(
            store.kv_get(KEY_PENDING_CURRENT).await.unwrap().as_deref(),
            Some("SIG_A")
        );
        assert!(store.kv_get(&done_key("SIG_A")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_housekeep_cancel_on_timeout_disabled_keeps_order() {
        let mut trade = trade_config();
        trade.cancel_on_timeout = false;
        let mut mock = MockExchangeApi::new();
        mock.expect_get_order_anywhere().times(1).returning(|_, cl| {
            let mut detail = filled_detail(cl);
            detail.state = OrderState::Live;
            Ok(detail)
        });
        // No cancel expectation: a cancel call would panic.

        let (lc, store) = lifecycle_with(mock, trade).await;
        seed_pending(&store, "SIG_A", "Qabc", NOW_MS - 61_000).await;
        lc.housekeep_at(NOW_MS).await.unwrap();
        assert_eq!(
            store.kv_get(KEY_PENDING_CURRENT).await.unwrap().as_deref(),
            Some("SIG_A")
        );
    }

    #[tokio::test]
    async fn test_tpsl_flag_guards_reattachment() {
        let (lc, store) = lifecycle(MockExchangeApi::new()).await;
        store.kv_set(&tpsl_key("SIG_A"), "1").await.unwrap();

        // No place_tpsl expectation: a second attach would panic.
        lc.try_attach_tpsl("SIG_A", "Qabc", &filled_detail("Qabc"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tpsl_degenerate_fill_leaves_flag_unset() {
        let (lc, store) = lifecycle(MockExchangeApi::new()).await;
        let mut detail = filled_detail("Qabc");
        detail.avg_px = None;
        detail.last_px = None;
        detail.px = None;

        lc.try_attach_tpsl("SIG_A", "Qabc", &detail, None).await.unwrap();
        assert!(store.kv_get(&tpsl_key("SIG_A")).await.unwrap().is_none());

        let mut detail = filled_detail("Qabc");
        detail.acc_fill_sz = Some(Decimal::ZERO);
        lc.try_attach_tpsl("SIG_A", "Qabc", &detail, None).await.unwrap();
        assert!(store.kv_get(&tpsl_key("SIG_A")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tpsl_pos_side_inferred_from_submitted_side() {
        let mut mock = MockExchangeApi::new();
        mock.expect_place_tpsl()
            .times(1)
            .withf(|intent| {
                intent.pos_side == PosSide::Short
                    && intent.close_side == crate::domain::OrderSide::Buy
            })
            .returning(|_| Ok(()));

        let (lc, store) = lifecycle(mock).await;
        let mut detail = filled_detail("Qabc");
        detail.pos_side = None;
        detail.side = Some(crate::domain::OrderSide::Sell);

        lc.try_attach_tpsl("SIG_A", "Qabc", &detail, None).await.unwrap();
        assert_eq!(store.kv_get(&tpsl_key("SIG_A")).await.unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_margin_gate_boundary_is_non_strict() {
        let trade = trade_config();
        let spec = spec();
        // required = 50000 * 0.01 * 19 / 10 = 950 = 1000 * 0.95 exactly.
        assert!(margin_ok(&trade, &spec, dec!(50000), dec!(19), dec!(1000)));
        assert!(!margin_ok(&trade, &spec, dec!(50000), dec!(19), dec!(999.99)));
    }

    #[test]
    fn test_margin_gate_requires_positive_balance() {
        let trade = trade_config();
        assert!(!margin_ok(&trade, &spec(), dec!(50000), dec!(1), Decimal::ZERO));
        assert!(!margin_ok(&trade, &spec(), dec!(50000), dec!(1), dec!(-10)));
    }

    #[test]
    fn test_margin_gate_without_contract_value_uses_minimum() {
        let trade = trade_config();
        let mut spec = spec();
        spec.ct_val = Decimal::ZERO;
        assert!(!margin_ok(&trade, &spec, dec!(50000), dec!(1), dec!(4)));
        assert!(margin_ok(&trade, &spec, dec!(50000), dec!(1), dec!(5)));
    }

    #[test]
    fn test_margin_gate_treats_zero_leverage_as_one() {
        let mut trade = trade_config();
        trade.leverage = 0;
        // required = full notional of 500; 600 * 0.95 = 570 covers it.
        assert!(margin_ok(&trade, &spec(), dec!(50000), dec!(1), dec!(600)));
        assert!(!margin_ok(&trade, &spec(), dec!(50000), dec!(1), dec!(500)));
    }
}
