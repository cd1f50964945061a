//! Long-running trading runtime: stream tasks plus the control loop.
//!
//! The loop is deliberately dumb: every tick it drains whatever the streams
//! pushed, refreshes the portfolio on a timer, reconciles pending orders, and
//! only then evaluates the strategy. Each step is fenced so one failing call
//! (a REST timeout, a ledger write) degrades that tick instead of killing the
//! process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::{AccountEvent, ExchangeApi, OkxAccountWs, OkxMarketWs, OkxRestClient};
use crate::config::AppConfig;
use crate::domain::{sum_positions, Bar, Candle, PortfolioView, PosSide};
use crate::error::Result;
use crate::persistence::{Ledger, SqliteStore};
use crate::services::portfolio::{
    KEY_WS_AVAIL, KEY_WS_EQUITY, KEY_WS_POS_LONG, KEY_WS_POS_SHORT, KEY_WS_UPL_LONG,
    KEY_WS_UPL_RATIO_LONG, KEY_WS_UPL_RATIO_SHORT, KEY_WS_UPL_SHORT, KEY_WS_UPTIME,
};
use crate::services::{OrderLifecycle, PortfolioService, RiskManager};
use crate::signing::OkxSigner;
use crate::strategy::{bar_from_candles, BarAggregator, EmaCrossStrategy};

/// One-shot flag so the account-stream breaker warning is not repeated on
/// every tick once the stream has given up.
const KEY_WARNED_STREAM_DISABLED: &str = "warn:account_stream_disabled";

/// Start the trading runtime and block until Ctrl+C.
pub async fn run(cfg: AppConfig) -> Result<()> {
    let runtime = Runtime::bootstrap(cfg).await?;
    runtime.run().await
}

pub struct Runtime {
    cfg: AppConfig,
    rest: Arc<OkxRestClient>,
    ledger: Arc<SqliteStore>,
    portfolio: PortfolioService,
    lifecycle: OrderLifecycle,
    risk: RiskManager,
    strategy: EmaCrossStrategy,
}

/// Mutable loop state, owned by `run` and threaded through each tick.
struct LoopState {
    aggregator: BarAggregator,
    view: PortfolioView,
    last_refresh: Option<Instant>,
    /// Arrival time of the most recent stream candle; decides whether the
    /// aggregator's view of the market is still trustworthy.
    last_candle_rx: Option<Instant>,
}

impl Runtime {
    /// Open the ledger, build the REST client, and prime exchange-side state
    /// (position mode, leverage, instrument parameters).
    pub async fn bootstrap(cfg: AppConfig) -> Result<Self> {
        let run_id = uuid::Uuid::new_v4();
        info!(
            "starting run_id={} inst={} bar={} demo={}",
            run_id, cfg.trade.inst_id, cfg.trade.bar, cfg.exchange.demo
        );

        let ledger = Arc::new(SqliteStore::open(&cfg.store.path).await?);
        let rest = Arc::new(OkxRestClient::new(&cfg.exchange, &cfg.trade.td_mode)?);
        let exchange: Arc<dyn ExchangeApi> = rest.clone();

        if cfg.exchange.has_credentials() {
            match rest.account_config().await {
                Ok(mode) => info!("account position mode: {:?}", mode),
                Err(e) => warn!("could not read account config: {}", e),
            }
            if let Err(e) = rest.set_leverage(&cfg.trade.inst_id, cfg.trade.leverage).await {
                warn!(
                    "could not set leverage {}x on {}: {}",
                    cfg.trade.leverage, cfg.trade.inst_id, e
                );
            }
        } else {
            warn!("no API credentials configured; running with market data only");
        }

        // Prime the instrument cache so the first signal does not pay the
        // lookup latency (and so a bad inst_id fails loudly at startup).
        match exchange.instrument_spec(&cfg.trade.inst_id).await {
            Ok(spec) => info!(
                "instrument {}: ctVal={} lotSz={} minSz={} tickSz={}",
                cfg.trade.inst_id, spec.ct_val, spec.lot_sz, spec.min_sz, spec.tick_sz
            ),
            Err(e) => warn!("instrument lookup failed for {}: {}", cfg.trade.inst_id, e),
        }

        let ledger_dyn: Arc<dyn Ledger> = ledger.clone();
        let portfolio =
            PortfolioService::new(exchange.clone(), ledger_dyn.clone(), &cfg.trade, &cfg.stream);
        let lifecycle = OrderLifecycle::new(exchange, ledger_dyn.clone(), cfg.trade.clone());
        let risk = RiskManager::new(ledger_dyn.clone(), cfg.risk.clone());
        let strategy = EmaCrossStrategy::new(ledger_dyn);

        Ok(Self {
            cfg,
            rest,
            ledger,
            portfolio,
            lifecycle,
            risk,
            strategy,
        })
    }

    /// Spawn the stream tasks and drive the control loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let mut candle_rx: Option<broadcast::Receiver<Candle>> = None;
        if self.cfg.stream.enable_public {
            let market = Arc::new(OkxMarketWs::new(
                self.rest.base_url(),
                self.cfg.exchange.demo,
                &self.cfg.trade.inst_id,
                &self.cfg.trade.bar,
                &self.cfg.stream,
            ));
            candle_rx = Some(market.subscribe());
            let task_ws = market.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = task_ws.run().await {
                    error!("market stream stopped: {}", e);
                }
            }));
        } else {
            info!("public stream disabled; candles will come from REST");
        }

        let mut account_rx: Option<mpsc::Receiver<AccountEvent>> = None;
        let mut account_ws: Option<Arc<OkxAccountWs>> = None;
        if self.cfg.stream.enable_private && self.cfg.exchange.has_credentials() {
            let signer = OkxSigner::new(
                self.cfg.exchange.api_key.clone(),
                self.cfg.exchange.api_secret.clone(),
                self.cfg.exchange.passphrase.clone(),
            )?;
            let (ws, rx) = OkxAccountWs::new(
                self.rest.base_url(),
                self.cfg.exchange.demo,
                &self.cfg.stream,
                signer,
            );
            let ws = Arc::new(ws);
            account_rx = Some(rx);
            account_ws = Some(ws.clone());
            tasks.push(tokio::spawn(async move {
                if let Err(e) = ws.run().await {
                    error!("account stream stopped: {}", e);
                }
            }));
        } else if self.cfg.stream.enable_private {
            warn!("account stream disabled: credentials missing");
        }

        let mut state = LoopState {
            aggregator: BarAggregator::new(self.cfg.strategy.ema_fast, self.cfg.strategy.ema_slow),
            view: PortfolioView::default(),
            last_refresh: None,
            last_candle_rx: None,
        };

        let sleep = Duration::from_secs(self.cfg.trade.loop_sleep_sec.max(1));
        info!(
            "control loop running (tick={}s, refresh={}s)",
            sleep.as_secs(),
            self.cfg.trade.portfolio_refresh_sec
        );

        loop {
            self.tick(
                &mut state,
                candle_rx.as_mut(),
                account_rx.as_mut(),
                account_ws.as_deref(),
            )
            .await;

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down");
                    break;
                }
            }
        }

        for task in &tasks {
            task.abort();
        }
        info!("runtime stopped");
        Ok(())
    }

    /// One pass of the control loop. Every step is fenced; a failure degrades
    /// the tick, never the process.
    async fn tick(
        &self,
        state: &mut LoopState,
        candle_rx: Option<&mut broadcast::Receiver<Candle>>,
        account_rx: Option<&mut mpsc::Receiver<AccountEvent>>,
        account_ws: Option<&OkxAccountWs>,
    ) {
        if let Some(rx) = account_rx {
            self.drain_account_events(rx).await;
        }
        if let Some(rx) = candle_rx {
            Self::drain_candles(rx, state);
        }
        if let Some(ws) = account_ws {
            if ws.is_disabled() {
                self.warn_stream_disabled_once(ws.last_error()).await;
            }
        }

        let refresh_due = match state.last_refresh {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_secs(self.cfg.trade.portfolio_refresh_sec),
        };
        if refresh_due {
            match self.portfolio.refresh(&mut state.view).await {
                Ok(()) => {
                    state.last_refresh = Some(Instant::now());
                    self.log_snapshots(&state.view).await;
                }
                Err(e) => warn!("portfolio refresh failed: {}", e),
            }
        }

        // Reconcile any pending order before looking at new signals.
        if let Err(e) = self.lifecycle.housekeep().await {
            error!("housekeeping failed: {}", e);
        }

        // Risk gate fails closed: if the check itself errors we skip signal
        // evaluation for this tick rather than trade blind.
        let halted = match self.risk.is_halted(state.view.equity).await {
            Ok(h) => h,
            Err(e) => {
                warn!("risk check failed, skipping signals this tick: {}", e);
                true
            }
        };
        if halted {
            return;
        }

        let Some(bar) = self.current_bar(state).await else {
            debug!("no bar available yet");
            return;
        };

        let signal = match self.strategy.on_bar(&bar).await {
            Ok(s) => s,
            Err(e) => {
                error!("signal evaluation failed: {}", e);
                return;
            }
        };
        if let Some(signal) = signal {
            if let Err(e) = self.lifecycle.on_signal(&signal, bar.close, &state.view).await {
                error!("order submission path failed: {}", e);
            }
        }
    }

    /// Pull everything the account stream pushed since the last tick into the
    /// ledger, so the portfolio snapshot can be served without a REST call.
    async fn drain_account_events(&self, rx: &mut mpsc::Receiver<AccountEvent>) {
        let mut saw_event = false;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    saw_event = true;
                    self.apply_account_event(event).await;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
        if saw_event {
            self.kv_put(KEY_WS_UPTIME, &Utc::now().timestamp_millis().to_string())
                .await;
        }
    }

    async fn apply_account_event(&self, event: AccountEvent) {
        match event {
            AccountEvent::Balance(bal) => {
                self.kv_put(KEY_WS_EQUITY, &bal.equity_usd.to_string()).await;
                self.kv_put(KEY_WS_AVAIL, &bal.avail_usdt.to_string()).await;
            }
            AccountEvent::Positions(rows) => {
                let (long_sz, short_sz) = sum_positions(&rows);
                self.kv_put(KEY_WS_POS_LONG, &long_sz.to_string()).await;
                self.kv_put(KEY_WS_POS_SHORT, &short_sz.to_string()).await;

                let mut upl_long = Decimal::ZERO;
                let mut upl_short = Decimal::ZERO;
                let mut ratio_long = None;
                let mut ratio_short = None;
                for row in &rows {
                    let Some(side) = row.pos_side else { continue };
                    match side {
                        PosSide::Long => {
                            upl_long += row.upl.unwrap_or_default();
                            ratio_long = row.upl_ratio.or(ratio_long);
                        }
                        PosSide::Short => {
                            upl_short += row.upl.unwrap_or_default();
                            ratio_short = row.upl_ratio.or(ratio_short);
                        }
                    }
                }
                self.kv_put(KEY_WS_UPL_LONG, &upl_long.to_string()).await;
                self.kv_put(KEY_WS_UPL_SHORT, &upl_short.to_string()).await;
                if let Some(r) = ratio_long {
                    self.kv_put(KEY_WS_UPL_RATIO_LONG, &r.to_string()).await;
                }
                if let Some(r) = ratio_short {
                    self.kv_put(KEY_WS_UPL_RATIO_SHORT, &r.to_string()).await;
                }
            }
            AccountEvent::Order(detail) => {
                debug!(
                    "order update from stream: cl_ord_id={} state={:?}",
                    detail.cl_ord_id, detail.state
                );
            }
        }
    }

    fn drain_candles(rx: &mut broadcast::Receiver<Candle>, state: &mut LoopState) {
        loop {
            match rx.try_recv() {
                Ok(candle) => {
                    state.last_candle_rx = Some(Instant::now());
                    state.aggregator.on_candle(&candle);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("candle stream lagged, {} updates dropped", n);
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
    }

    /// Current strategy bar: the stream aggregator while its data is fresh,
    /// otherwise a REST candle window folded from scratch.
    async fn current_bar(&self, state: &LoopState) -> Option<Bar> {
        let fresh_window = Duration::from_secs(self.cfg.stream.ws_fresh_window_sec);
        let stream_fresh = state
            .last_candle_rx
            .map(|at| at.elapsed() <= fresh_window)
            .unwrap_or(false);

        if stream_fresh {
            if let Some(bar) = state.aggregator.latest_bar() {
                return Some(bar.clone());
            }
        }

        match self
            .rest
            .fetch_candles(
                &self.cfg.trade.inst_id,
                &self.cfg.trade.bar,
                self.cfg.strategy.candle_limit,
            )
            .await
        {
            Ok(candles) => bar_from_candles(
                &candles,
                self.cfg.strategy.ema_fast,
                self.cfg.strategy.ema_slow,
            ),
            Err(e) => {
                warn!("candle fetch failed: {}", e);
                None
            }
        }
    }

    /// Position and PnL snapshot against the daily baseline.
    async fn log_snapshots(&self, view: &PortfolioView) {
        let upl_long = self.kv_decimal(KEY_WS_UPL_LONG).await;
        let upl_short = self.kv_decimal(KEY_WS_UPL_SHORT).await;
        let ratio_long = self.kv_decimal(KEY_WS_UPL_RATIO_LONG).await;
        let ratio_short = self.kv_decimal(KEY_WS_UPL_RATIO_SHORT).await;
        info!(
            "POS SNAPSHOT long={} short={} upl_long={:?} upl_short={:?} ratio_long={:?} ratio_short={:?}",
            view.pos_long, view.pos_short, upl_long, upl_short, ratio_long, ratio_short
        );

        let baseline = match self.risk.daily_baseline(view.equity).await {
            Ok(b) => b,
            Err(e) => {
                warn!("daily baseline unavailable: {}", e);
                return;
            }
        };
        let pnl = view.equity - baseline;
        let pnl_pct = if baseline > Decimal::ZERO {
            pnl / baseline * dec!(100)
        } else {
            Decimal::ZERO
        };
        info!(
            "PNL SNAPSHOT equity={} baseline={} pnl={} pnl_pct={:.2}% avail={}",
            view.equity, baseline, pnl, pnl_pct, view.avail
        );
    }

    /// Warn exactly once (per ledger) when the account stream trips its
    /// login breaker, with enough context to fix the credentials.
    async fn warn_stream_disabled_once(&self, last_error: Option<String>) {
        match self.ledger.kv_get(KEY_WARNED_STREAM_DISABLED).await {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                debug!("ledger read failed for {}: {}", KEY_WARNED_STREAM_DISABLED, e);
                return;
            }
        }
        warn!(
            "account stream disabled after repeated login failures ({}); \
             portfolio falls back to REST. Check api_key/api_secret/passphrase, \
             and that demo keys are only used with demo endpoints",
            last_error.unwrap_or_else(|| "no error captured".to_string())
        );
        self.kv_put(KEY_WARNED_STREAM_DISABLED, "1").await;
    }

    async fn kv_put(&self, key: &str, value: &str) {
        if let Err(e) = self.ledger.kv_set(key, value).await {
            warn!("ledger write failed for {}: {}", key, e);
        }
    }

    async fn kv_decimal(&self, key: &str) -> Option<Decimal> {
        self.ledger.kv_get_decimal(key).await.ok().flatten()
    }
}
