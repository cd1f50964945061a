//! Private account stream.
//!
//! Logs in over the private endpoint, subscribes to the account, positions
//! and orders channels and forwards typed events to the control loop over a
//! channel. Transport drops reconnect forever on a fixed delay, but login
//! rejections feed a breaker: after the configured number of failures the
//! stream disables itself permanently and the process falls back to REST
//! snapshots.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::okx_market_ws::{resolve_ws_url, WS_PRIVATE_PATH};
use super::okx_rest::{extract_balance, parse_order_detail, parse_position, truncate};
use crate::config::StreamConfig;
use crate::domain::{AccountBalance, OrderDetail, Position};
use crate::error::{GambitError, Result};
use crate::signing::OkxSigner;

const EVENT_CAPACITY: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error codes that mean the credentials themselves are bad. Reconnecting
/// with the same key cannot succeed, so these trip the breaker.
const CREDENTIAL_CODES: [&str; 4] = ["60031", "60032", "50119", "50101"];

/// Typed update pushed to the control loop.
#[derive(Debug, Clone)]
pub enum AccountEvent {
    Balance(AccountBalance),
    Positions(Vec<Position>),
    Order(OrderDetail),
}

/// Counts login rejections across reconnect attempts.
///
/// Unlike transport failures, a rejected login is deterministic; once the
/// threshold is hit the stream stays down until the process restarts with
/// fixed credentials.
struct LoginBreaker {
    failures: AtomicU32,
    max_failures: u32,
    disabled: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl LoginBreaker {
    fn new(max_failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(0),
            max_failures,
            disabled: AtomicBool::new(false),
            last_error: RwLock::new(None),
        }
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self, error: String) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(failures, error = %error, "account stream login failure");
        if let Ok(mut guard) = self.last_error.write() {
            *guard = Some(error);
        }
        if failures >= self.max_failures {
            self.disabled.store(true, Ordering::SeqCst);
            error!(
                failures,
                "account stream disabled; restart with fixed credentials to re-enable"
            );
        }
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|g| g.clone())
    }
}

/// What a handled message means for the connection.
enum StreamStep {
    Continue,
    /// Login acknowledged; subscriptions may now be sent.
    LoggedIn,
    /// Credentials rejected; drop the connection.
    CredentialRejected,
}

pub struct OkxAccountWs {
    url: String,
    signer: OkxSigner,
    event_tx: mpsc::Sender<AccountEvent>,
    ping_interval: Duration,
    reconnect_delay: Duration,
    breaker: LoginBreaker,
}

impl OkxAccountWs {
    /// Build the stream and hand back the receiving end of its event channel.
    pub fn new(
        rest_base: &str,
        demo: bool,
        cfg: &StreamConfig,
        signer: OkxSigner,
    ) -> (Self, mpsc::Receiver<AccountEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let ws = Self {
            url: resolve_ws_url(cfg.private_url.as_deref(), rest_base, demo, WS_PRIVATE_PATH),
            signer,
            event_tx,
            ping_interval: Duration::from_secs(cfg.ping_interval_sec),
            reconnect_delay: Duration::from_secs(cfg.reconnect_delay_sec),
            breaker: LoginBreaker::new(cfg.max_login_failures),
        };
        (ws, event_rx)
    }

    pub fn is_disabled(&self) -> bool {
        self.breaker.is_disabled()
    }

    pub fn last_error(&self) -> Option<String> {
        self.breaker.last_error()
    }

    /// Drive the stream until the breaker disables it.
    pub async fn run(&self) -> Result<()> {
        info!(url = %self.url, "starting account stream");

        loop {
            match self.connect_and_stream().await {
                Ok(()) => info!("account stream connection closed"),
                Err(e) => error!(error = %e, "account stream failed"),
            }

            if self.breaker.is_disabled() {
                warn!(
                    last_error = self.breaker.last_error().as_deref().unwrap_or(""),
                    "account stream shut down permanently"
                );
                return Ok(());
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.url))
            .await
            .map_err(|_| GambitError::Internal("websocket connection timeout".to_string()))??;

        let (mut write, mut read) = ws_stream.split();

        // Nothing is valid on this socket before a successful login.
        let args = self.signer.ws_login_args()?;
        let login = json!({
            "op": "login",
            "args": [{
                "apiKey": args.api_key,
                "passphrase": args.passphrase,
                "timestamp": args.timestamp,
                "sign": args.sign,
            }],
        });
        write.send(Message::Text(login.to_string())).await?;
        debug!("account stream login sent");

        let mut authenticated = false;
        let mut ping = interval(self.ping_interval);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match self.handle_message(&text, authenticated) {
                                StreamStep::LoggedIn => {
                                    authenticated = true;
                                    self.breaker.record_success();
                                    let sub = json!({
                                        "op": "subscribe",
                                        "args": [
                                            { "channel": "account" },
                                            { "channel": "positions", "instType": "SWAP" },
                                            { "channel": "orders", "instType": "SWAP" },
                                        ],
                                    });
                                    write.send(Message::Text(sub.to_string())).await?;
                                    info!("account stream authenticated, subscriptions sent");
                                }
                                StreamStep::CredentialRejected => return Ok(()),
                                StreamStep::Continue => {}
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "account stream received close frame");
                            break;
                        }
                        Some(Err(e)) => return Err(GambitError::WebSocket(e)),
                        None => {
                            info!("account stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Text("ping".to_string())).await {
                        error!(error = %e, "account stream ping failed");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, text: &str, authenticated: bool) -> StreamStep {
        if text == "pong" {
            return StreamStep::Continue;
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                debug!(snippet = %truncate(text, 120), "unrecognized account message");
                return StreamStep::Continue;
            }
        };

        if let Some(event) = value.get("event").and_then(Value::as_str) {
            let code = value.get("code").and_then(Value::as_str).unwrap_or("");
            let msg = value.get("msg").and_then(Value::as_str).unwrap_or("");
            return match event {
                "login" if code == "0" || code.is_empty() => {
                    info!("account stream login confirmed");
                    StreamStep::LoggedIn
                }
                "login" => {
                    self.breaker
                        .record_failure(format!("login rejected (code {}): {}", code, msg));
                    StreamStep::CredentialRejected
                }
                "subscribe" => {
                    debug!(
                        channel = value
                            .pointer("/arg/channel")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or(""),
                        "account subscription confirmed"
                    );
                    StreamStep::Continue
                }
                // Errors before login, and credential errors at any point,
                // mean this key cannot authenticate.
                "error" if !authenticated || CREDENTIAL_CODES.contains(&code) => {
                    self.breaker
                        .record_failure(format!("stream error (code {}): {}", code, msg));
                    StreamStep::CredentialRejected
                }
                "error" => {
                    error!(code, msg, "account stream error event");
                    StreamStep::Continue
                }
                other => {
                    debug!(event = other, "account stream event");
                    StreamStep::Continue
                }
            };
        }

        let channel = value
            .pointer("/arg/channel")
            .and_then(Value::as_str)
            .unwrap_or("");
        let Some(rows) = value.get("data").and_then(Value::as_array) else {
            return StreamStep::Continue;
        };

        match channel {
            "account" => {
                if let Some(row) = rows.first() {
                    self.dispatch(AccountEvent::Balance(extract_balance(row)));
                }
            }
            "positions" => {
                self.dispatch(AccountEvent::Positions(
                    rows.iter().map(parse_position).collect(),
                ));
            }
            "orders" => {
                for row in rows {
                    self.dispatch(AccountEvent::Order(parse_order_detail(row)));
                }
            }
            other => debug!(channel = other, "unhandled account push"),
        }
        StreamStep::Continue
    }

    fn dispatch(&self, event: AccountEvent) {
        // A dropped update is fine; the next push or REST refresh supersedes
        // it. Losing the receiver is not.
        if let Err(e) = self.event_tx.try_send(event) {
            warn!(error = %e, "account event not delivered");
        }
    }
}
