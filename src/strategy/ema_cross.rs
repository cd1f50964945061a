//! EMA-cross entry signals.
//!
//! A golden cross (fast EMA moving above slow) asks for a long entry, a dead
//! cross for a short. The previously observed relation is kept in the
//! ledger, not in memory: a restart must not mistake the standing relation
//! for a fresh cross, and must not replay a cross it already acted on.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::domain::{Bar, OrderSide};
use crate::error::Result;
use crate::persistence::Ledger;

/// Last observed fast-vs-slow relation, `GT` or `LT`.
const KEY_LAST_REL: &str = "ema:last_rel";
/// Bar timestamp of the last emitted signal, for same-bar dedup.
const KEY_LAST_SIGNAL_BAR_TS: &str = "ema:last_signal_bar_ts";

const REL_GT: &str = "GT";
const REL_LT: &str = "LT";

// ============================================================================
// Signal
// ============================================================================

/// What a signal asks the order lifecycle to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    OpenLong,
    OpenShort,
}

impl SignalAction {
    pub fn order_side(&self) -> OrderSide {
        match self {
            SignalAction::OpenLong => OrderSide::Buy,
            SignalAction::OpenShort => OrderSide::Sell,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::OpenLong => "OPEN_LONG",
            SignalAction::OpenShort => "OPEN_SHORT",
        }
    }
}

/// An entry request produced by the strategy.
///
/// `idem_key` names the cross itself (bar timestamp plus both averages), so
/// re-evaluating the same bar cannot produce a second order.
#[derive(Debug, Clone)]
pub struct Signal {
    pub action: SignalAction,
    pub reason: String,
    pub idem_key: String,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Detects fast/slow EMA crosses over successive bars.
pub struct EmaCrossStrategy {
    ledger: Arc<dyn Ledger>,
}

impl EmaCrossStrategy {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Evaluate the newest bar. The first observation only records the
    /// relation; afterwards a strict sign flip on a new bar timestamp emits
    /// a signal. A flip-back within the same bar is suppressed.
    pub async fn on_bar(&self, bar: &Bar) -> Result<Option<Signal>> {
        let (Some(fast), Some(slow)) = (bar.ema_fast, bar.ema_slow) else {
            return Ok(None);
        };

        let diff = fast - slow;
        if diff.is_zero() {
            // No strict sign, nothing to record or compare.
            return Ok(None);
        }
        let rel = if diff > Decimal::ZERO { REL_GT } else { REL_LT };

        let Some(prev) = self.ledger.kv_get(KEY_LAST_REL).await? else {
            self.ledger.kv_set(KEY_LAST_REL, rel).await?;
            debug!(rel, "ema relation seeded");
            return Ok(None);
        };
        if prev == rel {
            return Ok(None);
        }
        self.ledger.kv_set(KEY_LAST_REL, rel).await?;

        if self.ledger.kv_get_i64(KEY_LAST_SIGNAL_BAR_TS).await? == Some(bar.ts) {
            debug!(bar_ts = bar.ts, "cross flipped again within the same bar, suppressed");
            return Ok(None);
        }

        let (action, reason) = if rel == REL_GT {
            (SignalAction::OpenLong, "EMA golden cross")
        } else {
            (SignalAction::OpenShort, "EMA dead cross")
        };
        self.ledger
            .kv_set(KEY_LAST_SIGNAL_BAR_TS, &bar.ts.to_string())
            .await?;
        info!(
            action = action.as_str(),
            %fast,
            %slow,
            bar_ts = bar.ts,
            "EMA cross detected"
        );

        Ok(Some(Signal {
            action,
            reason: reason.to_string(),
            idem_key: signal_idem_key(action, bar.ts, fast, slow),
        }))
    }
}

fn signal_idem_key(action: SignalAction, bar_ts: i64, fast: Decimal, slow: Decimal) -> String {
    let tag = match action {
        SignalAction::OpenLong => "LONG",
        SignalAction::OpenShort => "SHORT",
    };
    format!("SIG_{}_{}_{:.4}_{:.4}", tag, bar_ts, fast, slow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;
    use rust_decimal_macros::dec;

    fn bar(ts: i64, fast: Decimal, slow: Decimal) -> Bar {
        Bar {
            ts,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            ema_fast: Some(fast),
            ema_slow: Some(slow),
        }
    }

    async fn strategy() -> (EmaCrossStrategy, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        (EmaCrossStrategy::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_first_observation_records_only() {
        let (strat, _store) = strategy().await;
        let sig = strat.on_bar(&bar(60_000, dec!(101), dec!(100))).await.unwrap();
        assert!(sig.is_none());

        // Same relation on the next bar: still nothing.
        let sig = strat.on_bar(&bar(120_000, dec!(102), dec!(100))).await.unwrap();
        assert!(sig.is_none());
    }

    #[tokio::test]
    async fn test_golden_cross_emits_long() {
        let (strat, _store) = strategy().await;
        strat.on_bar(&bar(60_000, dec!(99), dec!(100))).await.unwrap();

        let sig = strat
            .on_bar(&bar(120_000, dec!(100.5), dec!(100)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sig.action, SignalAction::OpenLong);
        assert_eq!(sig.reason, "EMA golden cross");
        assert_eq!(sig.idem_key, "SIG_LONG_120000_100.5000_100.0000");
        assert_eq!(sig.action.order_side(), OrderSide::Buy);
    }

    #[tokio::test]
    async fn test_dead_cross_emits_short() {
        let (strat, _store) = strategy().await;
        strat.on_bar(&bar(60_000, dec!(101), dec!(100))).await.unwrap();

        let sig = strat
            .on_bar(&bar(120_000, dec!(99.5), dec!(100)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sig.action, SignalAction::OpenShort);
        assert_eq!(sig.idem_key, "SIG_SHORT_120000_99.5000_100.0000");
        assert_eq!(sig.action.order_side(), OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_same_bar_flip_back_suppressed() {
        let (strat, _store) = strategy().await;
        strat.on_bar(&bar(60_000, dec!(99), dec!(100))).await.unwrap();

        // Forming bar crosses up, then dips back below within the same bar.
        let up = strat.on_bar(&bar(120_000, dec!(100.5), dec!(100))).await.unwrap();
        assert!(up.is_some());
        let back = strat.on_bar(&bar(120_000, dec!(99.5), dec!(100))).await.unwrap();
        assert!(back.is_none());

        // A fresh cross on the next bar fires again.
        let next = strat.on_bar(&bar(180_000, dec!(100.5), dec!(100))).await.unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_relation_survives_restart() {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let first = EmaCrossStrategy::new(store.clone());
        first.on_bar(&bar(60_000, dec!(99), dec!(100))).await.unwrap();
        drop(first);

        // New instance over the same ledger: the standing relation is known,
        // so the flip is a cross rather than a first observation.
        let second = EmaCrossStrategy::new(store.clone());
        let sig = second
            .on_bar(&bar(120_000, dec!(100.5), dec!(100)))
            .await
            .unwrap();
        assert!(sig.is_some());
    }

    #[tokio::test]
    async fn test_equal_emas_record_nothing() {
        let (strat, _store) = strategy().await;
        let sig = strat.on_bar(&bar(60_000, dec!(100), dec!(100))).await.unwrap();
        assert!(sig.is_none());

        // The zero-diff bar did not seed the relation.
        let sig = strat.on_bar(&bar(120_000, dec!(101), dec!(100))).await.unwrap();
        assert!(sig.is_none());
    }

    #[tokio::test]
    async fn test_missing_emas_skip_evaluation() {
        let (strat, _store) = strategy().await;
        let mut b = bar(60_000, dec!(101), dec!(100));
        b.ema_slow = None;
        let sig = strat.on_bar(&b).await.unwrap();
        assert!(sig.is_none());
    }
}
