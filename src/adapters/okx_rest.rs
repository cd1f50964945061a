//! OKX v5 REST adapter.
//!
//! Every signed call flows through [`OkxRestClient::request`], which signs
//! `timestamp + METHOD + path_with_query + body`, attaches the `OK-ACCESS-*`
//! headers and splits failures into transport errors (retryable) and exchange
//! business rejections (deterministic, never retried). Trade endpoints get an
//! extra per-row `sCode` check because the exchange reports order-level
//! rejections inside an otherwise successful envelope.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::ExchangeApi;
use crate::config::ExchangeConfig;
use crate::domain::{
    AccountBalance, Candle, InstrumentSpec, OrderDetail, OrderIntent, OrderSide, OrderState,
    PosMode, PosSide, Position, TpslIntent,
};
use crate::error::{GambitError, Result};
use crate::signing::OkxSigner;

/// Success code shared by the top-level envelope and per-row `sCode`.
pub const CODE_OK: &str = "0";
/// API key was issued for a different regional site than the base URL.
pub const CODE_KEY_REGION_MISMATCH: &str = "50119";
/// Parameter error; with "posSide" in the message the account is in hedge
/// mode and the request must be made per position side.
pub const CODE_PARAM_ERROR: &str = "51000";
/// Insufficient margin for the requested order.
pub const CODE_INSUFFICIENT_MARGIN: &str = "51008";
/// Order has left the live-order window (or never existed).
pub const CODE_ORDER_NOT_EXIST: &str = "51603";

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const HISTORY_PAGE_LIMIT: u32 = 100;
const HISTORY_MAX_PAGES: u32 = 10;
const ERROR_BODY_LIMIT: usize = 300;

/// Response envelope every OKX endpoint wraps its rows in.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

pub struct OkxRestClient {
    http: Client,
    base_url: String,
    signer: Option<OkxSigner>,
    demo: bool,
    td_mode: String,
    specs: DashMap<String, InstrumentSpec>,
    pos_mode: RwLock<PosMode>,
}

impl OkxRestClient {
    pub fn new(cfg: &ExchangeConfig, td_mode: &str) -> Result<Self> {
        let signer = if cfg.has_credentials() {
            Some(OkxSigner::new(
                cfg.api_key.clone(),
                cfg.api_secret.clone(),
                cfg.passphrase.clone(),
            )?)
        } else {
            None
        };

        let http = Client::builder()
            .user_agent("gambit/0.1")
            .timeout(Duration::from_secs(cfg.timeout_sec))
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url().trim_end_matches('/').to_string(),
            signer,
            demo: cfg.demo,
            td_mode: td_mode.to_string(),
            specs: DashMap::new(),
            pos_mode: RwLock::new(PosMode::Unknown),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Position mode seen in the last `account_config` call.
    pub fn cached_pos_mode(&self) -> PosMode {
        self.pos_mode.read().map(|g| *g).unwrap_or(PosMode::Unknown)
    }

    /// One round trip to the exchange.
    ///
    /// The query string is assembled by hand and signed as part of the path;
    /// the body is serialized once and the exact signed bytes are sent.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        auth: bool,
    ) -> Result<ApiResponse> {
        let request_path = build_request_path(path, query);
        let url = format!("{}{}", self.base_url, request_path);
        let body_text = body.map(Value::to_string).unwrap_or_default();

        let mut headers = HeaderMap::new();
        if auth {
            let signer = self.signer.as_ref().ok_or_else(|| {
                GambitError::MissingCredentials(
                    "api_key, api_secret and passphrase are required for private endpoints"
                        .to_string(),
                )
            })?;
            headers = signer.build_headers(method.as_str(), &request_path, &body_text)?;
        }
        if self.demo {
            headers.insert(
                HeaderName::from_static("x-simulated-trading"),
                HeaderValue::from_static("1"),
            );
        }

        let mut req = self.http.request(method.clone(), &url).headers(headers);
        if body.is_some() {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(body_text);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(method = %method, path = %request_path, status = %status, "okx response");

        // A business rejection can ride on a 4xx status; parse the envelope
        // first so the exchange code wins over the bare HTTP status.
        let envelope: ApiResponse = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(_) if !status.is_success() => {
                return Err(GambitError::HttpStatus {
                    status: status.as_u16(),
                    body: truncate(&text, ERROR_BODY_LIMIT),
                });
            }
            Err(e) => return Err(GambitError::Json(e)),
        };

        check_envelope(path, &envelope)?;
        Ok(envelope)
    }

    /// Retry a read-only call on transient transport failures.
    ///
    /// Each attempt re-signs with a fresh timestamp. Business rejections
    /// pass straight through.
    async fn with_retries<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(op, attempt, error = %e, "transient request failure, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch and cache instrument parameters.
    pub async fn fetch_instrument_spec(&self, inst_id: &str) -> Result<InstrumentSpec> {
        if let Some(spec) = self.specs.get(inst_id) {
            return Ok(spec.clone());
        }

        let query = [
            ("instType", "SWAP".to_string()),
            ("instId", inst_id.to_string()),
        ];
        let resp = self
            .with_retries("instruments", || {
                self.request(
                    Method::GET,
                    "/api/v5/public/instruments",
                    &query,
                    None,
                    false,
                )
            })
            .await?;

        let row = resp.data.first().ok_or_else(|| {
            GambitError::InvalidInstrument(format!("instrument {} not found", inst_id))
        })?;
        let spec = InstrumentSpec {
            inst_id: inst_id.to_string(),
            ct_val: field_decimal(row, "ctVal").unwrap_or(Decimal::ZERO),
            lot_sz: field_decimal(row, "lotSz").unwrap_or(Decimal::ZERO),
            min_sz: field_decimal(row, "minSz").unwrap_or(Decimal::ZERO),
            tick_sz: field_decimal(row, "tickSz").unwrap_or(Decimal::ZERO),
        };
        self.specs.insert(inst_id.to_string(), spec.clone());
        Ok(spec)
    }

    /// Read the account's position mode and remember it for order placement.
    pub async fn account_config(&self) -> Result<PosMode> {
        let resp = self
            .with_retries("account-config", || {
                self.request(Method::GET, "/api/v5/account/config", &[], None, true)
            })
            .await?;

        let mode = resp
            .data
            .first()
            .and_then(|row| field_str(row, "posMode"))
            .map(PosMode::parse)
            .unwrap_or(PosMode::Unknown);
        if let Ok(mut guard) = self.pos_mode.write() {
            *guard = mode;
        }
        debug!(?mode, "account position mode");
        Ok(mode)
    }

    pub async fn fetch_account_balance(&self) -> Result<AccountBalance> {
        let resp = self
            .with_retries("balance", || {
                self.request(Method::GET, "/api/v5/account/balance", &[], None, true)
            })
            .await?;
        let row = resp
            .data
            .first()
            .ok_or_else(|| GambitError::Internal("balance response carried no rows".to_string()))?;
        Ok(extract_balance(row))
    }

    pub async fn fetch_positions(&self, inst_id: &str) -> Result<Vec<Position>> {
        let query = [
            ("instType", "SWAP".to_string()),
            ("instId", inst_id.to_string()),
        ];
        let resp = self
            .with_retries("positions", || {
                self.request(Method::GET, "/api/v5/account/positions", &query, None, true)
            })
            .await?;
        Ok(resp.data.iter().map(parse_position).collect())
    }

    /// Apply the configured leverage.
    ///
    /// Hedge-mode accounts need one call per position side. When the mode is
    /// not yet known, a single call is tried first and the per-side pair is
    /// used as a one-shot fallback if the exchange demands `posSide`.
    pub async fn set_leverage(&self, inst_id: &str, lever: u32) -> Result<()> {
        match self.cached_pos_mode() {
            PosMode::LongShort => self.set_leverage_per_side(inst_id, lever).await,
            PosMode::Net => self.set_leverage_once(inst_id, lever, None).await,
            PosMode::Unknown => match self.set_leverage_once(inst_id, lever, None).await {
                Err(GambitError::Exchange {
                    ref code,
                    ref message,
                }) if code == CODE_PARAM_ERROR && message.contains("posSide") => {
                    debug!(inst_id, "leverage call wants posSide, retrying per side");
                    self.set_leverage_per_side(inst_id, lever).await
                }
                other => other,
            },
        }
    }

    async fn set_leverage_per_side(&self, inst_id: &str, lever: u32) -> Result<()> {
        self.set_leverage_once(inst_id, lever, Some(PosSide::Long))
            .await?;
        self.set_leverage_once(inst_id, lever, Some(PosSide::Short))
            .await
    }

    async fn set_leverage_once(
        &self,
        inst_id: &str,
        lever: u32,
        pos_side: Option<PosSide>,
    ) -> Result<()> {
        let mut body = json!({
            "instId": inst_id,
            "lever": lever.to_string(),
            "mgnMode": self.td_mode,
        });
        if let Some(side) = pos_side {
            body["posSide"] = json!(side.as_str());
        }
        self.request(
            Method::POST,
            "/api/v5/account/set-leverage",
            &[],
            Some(&body),
            true,
        )
        .await
        .map(|_| ())
    }

    pub async fn fetch_candles(&self, inst_id: &str, bar: &str, limit: u32) -> Result<Vec<Candle>> {
        let query = [
            ("instId", inst_id.to_string()),
            ("bar", bar.to_string()),
            ("limit", limit.to_string()),
        ];
        let resp = self
            .with_retries("candles", || {
                self.request(Method::GET, "/api/v5/market/candles", &query, None, false)
            })
            .await?;
        resp.data.iter().map(parse_candle_row).collect()
    }

    /// Submit a market order. Returns the exchange order id when the
    /// response carries one.
    pub async fn submit_market_order(&self, intent: &OrderIntent) -> Result<Option<String>> {
        let mut body = json!({
            "instId": intent.inst_id,
            "tdMode": self.td_mode,
            "side": intent.side.as_str(),
            "ordType": "market",
            "sz": fmt_dec(intent.size),
            "clOrdId": intent.cl_ord_id,
        });
        if self.cached_pos_mode().is_hedge() {
            body["posSide"] = json!(intent.pos_side.as_str());
        }

        let resp = self
            .request(Method::POST, "/api/v5/trade/order", &[], Some(&body), true)
            .await?;
        Ok(resp
            .data
            .first()
            .and_then(|row| field_str(row, "ordId"))
            .map(ToString::to_string))
    }

    pub async fn get_order(&self, inst_id: &str, cl_ord_id: &str) -> Result<OrderDetail> {
        let query = [
            ("instId", inst_id.to_string()),
            ("clOrdId", cl_ord_id.to_string()),
        ];
        let resp = self
            .with_retries("get-order", || {
                self.request(Method::GET, "/api/v5/trade/order", &query, None, true)
            })
            .await?;
        let row = resp.data.first().ok_or_else(|| GambitError::OrderNotFound {
            cl_ord_id: cl_ord_id.to_string(),
        })?;
        Ok(parse_order_detail(row))
    }

    /// Look an order up wherever it currently lives.
    ///
    /// The live-order endpoint stops knowing an order roughly two hours
    /// after it goes terminal; on the order-not-exist code the recent
    /// history and then the archive are searched page by page.
    pub async fn find_order(&self, inst_id: &str, cl_ord_id: &str) -> Result<OrderDetail> {
        match self.get_order(inst_id, cl_ord_id).await {
            Ok(detail) => Ok(detail),
            Err(e) if order_expired(&e) => {
                debug!(cl_ord_id, "order left the live window, searching history");
                if let Some(found) = self
                    .search_history("/api/v5/trade/orders-history", inst_id, cl_ord_id)
                    .await?
                {
                    return Ok(found);
                }
                if let Some(found) = self
                    .search_history("/api/v5/trade/orders-history-archive", inst_id, cl_ord_id)
                    .await?
                {
                    return Ok(found);
                }
                Err(GambitError::OrderNotFound {
                    cl_ord_id: cl_ord_id.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn search_history(
        &self,
        path: &str,
        inst_id: &str,
        cl_ord_id: &str,
    ) -> Result<Option<OrderDetail>> {
        let mut after: Option<String> = None;
        for _ in 0..HISTORY_MAX_PAGES {
            let mut query = vec![
                ("instType", "SWAP".to_string()),
                ("instId", inst_id.to_string()),
                ("limit", HISTORY_PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let resp = self
                .with_retries("order-history", || {
                    self.request(Method::GET, path, &query, None, true)
                })
                .await?;
            match scan_history_page(&resp.data, cl_ord_id) {
                PageScan::Found(detail) => return Ok(Some(detail)),
                PageScan::Next(cursor) => after = Some(cursor),
                PageScan::End => return Ok(None),
            }
        }
        Ok(None)
    }

    pub async fn cancel_by_cl_ord_id(&self, inst_id: &str, cl_ord_id: &str) -> Result<()> {
        let body = json!({
            "instId": inst_id,
            "clOrdId": cl_ord_id,
        });
        self.request(
            Method::POST,
            "/api/v5/trade/cancel-order",
            &[],
            Some(&body),
            true,
        )
        .await
        .map(|_| ())
    }

    /// Attach a one-sided TP/SL conditional order.
    ///
    /// Trigger prices are floored to the instrument tick and both order
    /// prices are `-1` (execute at market on trigger).
    pub async fn submit_tpsl(&self, intent: &TpslIntent) -> Result<()> {
        let spec = self.fetch_instrument_spec(&intent.inst_id).await?;
        let algo_cl_ord_id = format!("TPSL{}", intent.parent_cl_ord_id);

        let mut body = json!({
            "instId": intent.inst_id,
            "tdMode": self.td_mode,
            "side": intent.close_side.as_str(),
            "ordType": "conditional",
            "sz": fmt_dec(intent.size),
            "algoClOrdId": algo_cl_ord_id,
            "tpTriggerPx": fmt_dec(spec.floor_price(intent.tp_trigger)),
            "tpOrdPx": "-1",
            "slTriggerPx": fmt_dec(spec.floor_price(intent.sl_trigger)),
            "slOrdPx": "-1",
        });
        if self.cached_pos_mode().is_hedge() {
            body["posSide"] = json!(intent.pos_side.as_str());
        }

        self.request(
            Method::POST,
            "/api/v5/trade/order-algo",
            &[],
            Some(&body),
            true,
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ExchangeApi for OkxRestClient {
    async fn instrument_spec(&self, inst_id: &str) -> Result<InstrumentSpec> {
        self.fetch_instrument_spec(inst_id).await
    }

    async fn account_balance(&self) -> Result<AccountBalance> {
        self.fetch_account_balance().await
    }

    async fn positions(&self, inst_id: &str) -> Result<Vec<Position>> {
        self.fetch_positions(inst_id).await
    }

    async fn candles(&self, inst_id: &str, bar: &str, limit: u32) -> Result<Vec<Candle>> {
        self.fetch_candles(inst_id, bar, limit).await
    }

    async fn place_market_order(&self, intent: &OrderIntent) -> Result<Option<String>> {
        self.submit_market_order(intent).await
    }

    async fn get_order_anywhere(&self, inst_id: &str, cl_ord_id: &str) -> Result<OrderDetail> {
        self.find_order(inst_id, cl_ord_id).await
    }

    async fn cancel_order(&self, inst_id: &str, cl_ord_id: &str) -> Result<()> {
        self.cancel_by_cl_ord_id(inst_id, cl_ord_id).await
    }

    async fn place_tpsl(&self, intent: &TpslIntent) -> Result<()> {
        self.submit_tpsl(intent).await
    }
}

fn build_request_path(path: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    // Parameter values here are instrument ids, bar sizes and numbers, all
    // within the unreserved character set, so no percent-encoding pass.
    let qs = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, qs)
}

/// Validate the envelope and, for trade endpoints, the per-row `sCode`.
///
/// A missing `sCode` counts as success; only an explicit non-zero value is
/// a rejection.
fn check_envelope(path: &str, resp: &ApiResponse) -> Result<()> {
    if resp.code != CODE_OK {
        return Err(business_error(&resp.code, &resp.msg));
    }
    if path.starts_with("/api/v5/trade/") {
        if let Some(row) = resp.data.first() {
            let s_code = row.get("sCode").and_then(Value::as_str).unwrap_or(CODE_OK);
            if s_code != CODE_OK {
                let s_msg = row
                    .get("sMsg")
                    .and_then(Value::as_str)
                    .unwrap_or(resp.msg.as_str());
                return Err(business_error(s_code, s_msg));
            }
        }
    }
    Ok(())
}

fn business_error(code: &str, msg: &str) -> GambitError {
    let message = if code == CODE_KEY_REGION_MISMATCH {
        format!(
            "{} (the API key does not match this endpoint: EEA-regulated accounts use \
             https://eea.okx.com, US-regulated accounts use https://us.okx.com, and demo \
             trading needs a key created in demo mode)",
            msg
        )
    } else {
        msg.to_string()
    };
    GambitError::Exchange {
        code: code.to_string(),
        message,
    }
}

fn order_expired(e: &GambitError) -> bool {
    matches!(e, GambitError::OrderNotFound { .. })
        || e.business_code() == Some(CODE_ORDER_NOT_EXIST)
}

/// Outcome of scanning one history page for a client order id.
enum PageScan {
    Found(OrderDetail),
    /// No match here; page onward from the oldest order id seen.
    Next(String),
    /// Empty page, or a trailing row without an order id to cursor from.
    End,
}

fn scan_history_page(rows: &[Value], cl_ord_id: &str) -> PageScan {
    if rows.is_empty() {
        return PageScan::End;
    }
    if let Some(row) = rows
        .iter()
        .find(|row| field_str(row, "clOrdId") == Some(cl_ord_id))
    {
        return PageScan::Found(parse_order_detail(row));
    }
    match rows.last().and_then(|row| field_str(row, "ordId")) {
        Some(last) => PageScan::Next(last.to_string()),
        None => PageScan::End,
    }
}

fn field_str<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn field_decimal(row: &Value, key: &str) -> Option<Decimal> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Decimal::from_str_exact(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str_exact(&n.to_string()).ok(),
        _ => None,
    }
}

fn col_decimal(cols: &[Value], idx: usize) -> Option<Decimal> {
    cols.get(idx)
        .and_then(Value::as_str)
        .and_then(|s| Decimal::from_str_exact(s).ok())
}

/// Candle rows are string arrays, newest first:
/// `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.
///
/// The WebSocket candle channel pushes rows in this exact shape, so the
/// stream adapter shares this parser.
pub(crate) fn parse_candle_row(row: &Value) -> Result<Candle> {
    let cols = row
        .as_array()
        .ok_or_else(|| GambitError::InvalidMarketData("candle row is not an array".to_string()))?;
    if cols.len() < 5 {
        return Err(GambitError::InvalidMarketData(format!(
            "candle row has {} columns",
            cols.len()
        )));
    }

    let ts = cols[0]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            GambitError::InvalidMarketData("candle timestamp is not an integer".to_string())
        })?;
    let parse = |idx: usize, name: &str| {
        col_decimal(cols, idx).ok_or_else(|| {
            GambitError::InvalidMarketData(format!("candle {} is not a decimal", name))
        })
    };

    Ok(Candle {
        ts,
        open: parse(1, "open")?,
        high: parse(2, "high")?,
        low: parse(3, "low")?,
        close: parse(4, "close")?,
        confirm: cols
            .get(8)
            .and_then(Value::as_str)
            .map(|s| s == "1")
            .unwrap_or(true),
    })
}

/// Position rows come back in the same shape from REST and the positions
/// channel, so the account stream shares this parser.
pub(crate) fn parse_position(row: &Value) -> Position {
    Position {
        inst_id: field_str(row, "instId").unwrap_or_default().to_string(),
        pos_side: field_str(row, "posSide").and_then(PosSide::parse),
        pos: field_decimal(row, "pos").unwrap_or(Decimal::ZERO),
        avg_px: field_decimal(row, "avgPx"),
        upl: field_decimal(row, "upl"),
        upl_ratio: field_decimal(row, "uplRatio"),
    }
}

/// Shared with the orders channel, which pushes the same row shape.
pub(crate) fn parse_order_detail(row: &Value) -> OrderDetail {
    OrderDetail {
        ord_id: field_str(row, "ordId").unwrap_or_default().to_string(),
        cl_ord_id: field_str(row, "clOrdId").unwrap_or_default().to_string(),
        state: field_str(row, "state")
            .map(OrderState::parse)
            .unwrap_or_default(),
        sz: field_decimal(row, "sz"),
        acc_fill_sz: field_decimal(row, "accFillSz"),
        avg_px: field_decimal(row, "avgPx"),
        last_px: field_decimal(row, "lastPx"),
        px: field_decimal(row, "px"),
        side: field_str(row, "side").and_then(OrderSide::parse),
        pos_side: field_str(row, "posSide").and_then(PosSide::parse),
    }
}

/// Balance extraction mirrors the exchange's own fallback order: the USD
/// equity aggregates first, then a sum over USDT/USD detail rows. Account
/// channel pushes carry the same row shape.
pub(crate) fn extract_balance(row: &Value) -> AccountBalance {
    let details = row.get("details").and_then(Value::as_array);

    let equity_usd = field_decimal(row, "totalEqUsd")
        .or_else(|| field_decimal(row, "totalEq"))
        .or_else(|| field_decimal(row, "eqUsd"))
        .or_else(|| {
            details.map(|rows| {
                rows.iter()
                    .filter(|d| {
                        matches!(field_str(d, "ccy"), Some("USDT") | Some("USD"))
                    })
                    .filter_map(|d| field_decimal(d, "eq"))
                    .sum()
            })
        })
        .unwrap_or(Decimal::ZERO);

    let avail_usdt = details
        .and_then(|rows| {
            rows.iter()
                .find(|d| field_str(d, "ccy") == Some("USDT"))
                .and_then(|d| field_decimal(d, "availBal"))
        })
        .unwrap_or(Decimal::ZERO);

    AccountBalance {
        equity_usd,
        avail_usdt,
    }
}

fn fmt_dec(value: Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}
