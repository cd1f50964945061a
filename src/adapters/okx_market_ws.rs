//! Public candle stream.
//!
//! Subscribes to one candle channel on the business endpoint and broadcasts
//! every parsed row. Connections are disposable: any failure tears the
//! socket down and a fixed-delay reconnect builds a fresh one, indefinitely.
//! No state carries across connections beyond the broadcast channel itself.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use super::okx_rest::{parse_candle_row, truncate};
use crate::config::StreamConfig;
use crate::domain::Candle;
use crate::error::{GambitError, Result};

const CHANNEL_CAPACITY: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const WS_BUSINESS_PATH: &str = "/ws/v5/business";
pub(crate) const WS_PRIVATE_PATH: &str = "/ws/v5/private";

/// Map a REST base URL onto the matching WebSocket endpoint.
///
/// Regional sites get their own WebSocket hosts, and demo trading runs on
/// separate `*pap` hosts that expect a `brokerId` query parameter.
pub(crate) fn infer_ws_url(rest_base: &str, demo: bool, path: &str) -> String {
    let host = Url::parse(rest_base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "www.okx.com".to_string());

    let ws_host = if host.starts_with("eea.") {
        if demo {
            "wseeapap.okx.com"
        } else {
            "wseea.okx.com"
        }
    } else if host.starts_with("us.") {
        if demo {
            "wsuspap.okx.com"
        } else {
            "wsus.okx.com"
        }
    } else if demo {
        "wspap.okx.com"
    } else {
        "ws.okx.com"
    };

    let url = format!("wss://{}:8443{}", ws_host, path);
    if demo {
        ensure_broker_id(&url)
    } else {
        url
    }
}

/// Demo endpoints reject connections without a broker id.
pub(crate) fn ensure_broker_id(url: &str) -> String {
    if url.contains("brokerId") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&brokerId=9999", url)
    } else {
        format!("{}?brokerId=9999", url)
    }
}

/// Resolve the URL a stream should dial: explicit override first, inferred
/// from the REST base otherwise.
pub(crate) fn resolve_ws_url(
    override_url: Option<&str>,
    rest_base: &str,
    demo: bool,
    path: &str,
) -> String {
    match override_url {
        Some(u) if demo => ensure_broker_id(u),
        Some(u) => u.to_string(),
        None => infer_ws_url(rest_base, demo, path),
    }
}

pub struct OkxMarketWs {
    url: String,
    inst_id: String,
    channel: String,
    candle_tx: broadcast::Sender<Candle>,
    ping_interval: Duration,
    reconnect_delay: Duration,
}

impl OkxMarketWs {
    pub fn new(rest_base: &str, demo: bool, inst_id: &str, bar: &str, cfg: &StreamConfig) -> Self {
        let (candle_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            url: resolve_ws_url(cfg.public_url.as_deref(), rest_base, demo, WS_BUSINESS_PATH),
            inst_id: inst_id.to_string(),
            channel: format!("candle{}", bar),
            candle_tx,
            ping_interval: Duration::from_secs(cfg.ping_interval_sec),
            reconnect_delay: Duration::from_secs(cfg.reconnect_delay_sec),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Candle> {
        self.candle_tx.subscribe()
    }

    /// Drive the stream forever. Never returns under normal operation.
    pub async fn run(&self) -> Result<()> {
        info!(inst_id = %self.inst_id, channel = %self.channel, "starting candle stream");

        loop {
            match self.connect_and_stream().await {
                Ok(()) => info!("candle stream closed, reconnecting"),
                Err(e) => error!(error = %e, "candle stream failed"),
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        info!(url = %self.url, "connecting candle stream");
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.url))
            .await
            .map_err(|_| GambitError::Internal("websocket connection timeout".to_string()))??;

        let (mut write, mut read) = ws_stream.split();

        let sub = json!({
            "op": "subscribe",
            "args": [{ "channel": self.channel, "instId": self.inst_id }],
        });
        write.send(Message::Text(sub.to_string())).await?;
        debug!(channel = %self.channel, "candle subscription sent");

        let mut ping = interval(self.ping_interval);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "candle stream received close frame");
                            break;
                        }
                        Some(Err(e)) => return Err(GambitError::WebSocket(e)),
                        None => {
                            info!("candle stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = ping.tick() => {
                    // Heartbeat is the literal text "ping"; the server answers
                    // with "pong".
                    if let Err(e) = write.send(Message::Text("ping".to_string())).await {
                        error!(error = %e, "candle stream ping failed");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, text: &str) {
        if text == "pong" {
            return;
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                debug!(snippet = %truncate(text, 120), "unrecognized candle message");
                return;
            }
        };

        if let Some(event) = value.get("event").and_then(Value::as_str) {
            match event {
                "subscribe" => info!(channel = %self.channel, "candle subscription confirmed"),
                "error" => {
                    error!(
                        code = value.get("code").and_then(serde_json::Value::as_str).unwrap_or(""),
                        msg = value.get("msg").and_then(serde_json::Value::as_str).unwrap_or(""),
                        "candle stream error event"
                    );
                }
                other => debug!(event = other, "candle stream event"),
            }
            return;
        }

        let Some(rows) = value.get("data").and_then(Value::as_array) else {
            return;
        };
        for row in rows {
            match parse_candle_row(row) {
                Ok(candle) => {
                    let _ = self.candle_tx.send(candle);
                }
                Err(e) => warn!(error = %e, "bad candle row"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn infer_ws_url_per_region_and_mode() {
        assert_eq!(
            infer_ws_url("https://www.okx.com", false, WS_BUSINESS_PATH),
            "wss://ws.okx.com:8443/ws/v5/business"
        );
        assert_eq!(
            infer_ws_url("https://www.okx.com", true, WS_BUSINESS_PATH),
            "wss://wspap.okx.com:8443/ws/v5/business?brokerId=9999"
        );
        assert_eq!(
            infer_ws_url("https://eea.okx.com", false, WS_PRIVATE_PATH),
            "wss://wseea.okx.com:8443/ws/v5/private"
        );
        assert_eq!(
            infer_ws_url("https://us.okx.com", true, WS_PRIVATE_PATH),
            "wss://wsuspap.okx.com:8443/ws/v5/private?brokerId=9999"
        );
    }

    #[test]
    fn broker_id_appended_once() {
        assert_eq!(
            ensure_broker_id("wss://wspap.okx.com:8443/ws/v5/business"),
            "wss://wspap.okx.com:8443/ws/v5/business?brokerId=9999"
        );
        assert_eq!(
            ensure_broker_id("wss://wspap.okx.com:8443/ws/v5/business?x=1"),
            "wss://wspap.okx.com:8443/ws/v5/business?x=1&brokerId=9999"
        );
        let already = "wss://wspap.okx.com:8443/ws/v5/business?brokerId=9999";
        assert_eq!(ensure_broker_id(already), already);
    }

    #[test]
    fn override_url_wins_and_gets_broker_id_in_demo() {
        let url = resolve_ws_url(
            Some("wss://custom.example.com/ws/v5/business"),
            "https://www.okx.com",
            true,
            WS_BUSINESS_PATH,
        );
        assert_eq!(url, "wss://custom.example.com/ws/v5/business?brokerId=9999");

        let url = resolve_ws_url(None, "https://www.okx.com", false, WS_BUSINESS_PATH);
        assert_eq!(url, "wss://ws.okx.com:8443/ws/v5/business");
    }

    fn test_stream(cfg: &StreamConfig) -> OkxMarketWs {
        OkxMarketWs::new("https://www.okx.com", false, "BTC-USDT-SWAP", "1m", cfg)
    }

    #[test]
    fn candle_push_reaches_subscribers() {
        let ws = test_stream(&StreamConfig::default());
        let mut rx = ws.subscribe();

        let push = r#"{
            "arg": {"channel": "candle1m", "instId": "BTC-USDT-SWAP"},
            "data": [["1700000000000","50000","50100","49900","50050","12","0.1","6000","1"]]
        }"#;
        ws.handle_message(push);

        let candle = rx.try_recv().unwrap();
        assert_eq!(candle.ts, 1_700_000_000_000);
        assert_eq!(candle.close, dec!(50050));
        assert!(candle.confirm);
    }

    #[test]
    fn events_and_pong_are_not_broadcast() {
        let ws = test_stream(&StreamConfig::default());
        let mut rx = ws.subscribe();

        ws.handle_message("pong");
        ws.handle_message(r#"{"event":"subscribe","arg":{"channel":"candle1m"}}"#);
        ws.handle_message(r#"{"event":"error","code":"60012","msg":"Illegal request"}"#);
        ws.handle_message("not json");

        assert!(rx.try_recv().is_err());
    }
}
