use crate::error::{GambitError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Path signed into every WebSocket login challenge.
const WS_LOGIN_PATH: &str = "/users/self/verify";

/// Signed arguments for the private WebSocket login frame.
#[derive(Debug, Clone)]
pub struct WsLoginArgs {
    pub api_key: String,
    pub passphrase: String,
    /// Epoch seconds, as a string
    pub timestamp: String,
    pub sign: String,
}

/// HMAC request signer for the exchange API.
///
/// REST requests sign `timestamp + METHOD + path_with_query + body` where the
/// timestamp is ISO-8601 UTC with milliseconds. The query string is part of
/// the signed path; dropping it produces a signature the exchange rejects.
/// WebSocket login signs the same way but with an epoch-seconds timestamp and
/// a fixed verification path.
#[derive(Clone)]
pub struct OkxSigner {
    api_key: String,
    secret: String,
    passphrase: String,
}

impl OkxSigner {
    pub fn new(api_key: String, secret: String, passphrase: String) -> Result<Self> {
        if api_key.trim().is_empty() || secret.trim().is_empty() || passphrase.trim().is_empty() {
            return Err(GambitError::MissingCredentials(
                "api_key, api_secret and passphrase are all required".to_string(),
            ));
        }
        Ok(Self {
            api_key,
            secret,
            passphrase,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Current REST timestamp: `YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub fn rest_timestamp() -> String {
        format_rest_timestamp(&Utc::now())
    }

    /// Assemble the string covered by the signature.
    fn build_message(timestamp: &str, method: &str, path_with_query: &str, body: &str) -> String {
        format!(
            "{}{}{}{}",
            timestamp,
            method.to_uppercase(),
            path_with_query,
            body
        )
    }

    /// Create a Base64 HMAC-SHA256 signature over `message`.
    fn sign(&self, message: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| GambitError::Signature(format!("HMAC init failed: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Build authentication headers for a REST request.
    ///
    /// `path_with_query` must be exactly the path the request goes out with,
    /// query string included.
    pub fn build_headers(
        &self,
        method: &str,
        path_with_query: &str,
        body: &str,
    ) -> Result<HeaderMap> {
        let timestamp = Self::rest_timestamp();
        let message = Self::build_message(&timestamp, method, path_with_query, body);
        let signature = self.sign(&message)?;

        let mut headers = HeaderMap::new();
        headers.insert("OK-ACCESS-KEY", header_value(&self.api_key)?);
        headers.insert("OK-ACCESS-SIGN", header_value(&signature)?);
        headers.insert("OK-ACCESS-TIMESTAMP", header_value(&timestamp)?);
        headers.insert("OK-ACCESS-PASSPHRASE", header_value(&self.passphrase)?);
        Ok(headers)
    }

    /// Signed login arguments for the private WebSocket.
    pub fn ws_login_args(&self) -> Result<WsLoginArgs> {
        let timestamp = Utc::now().timestamp().to_string();
        let message = format!("{}GET{}", timestamp, WS_LOGIN_PATH);
        let sign = self.sign(&message)?;
        Ok(WsLoginArgs {
            api_key: self.api_key.clone(),
            passphrase: self.passphrase.clone(),
            timestamp,
            sign,
        })
    }
}

impl Drop for OkxSigner {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.passphrase.zeroize();
    }
}

fn format_rest_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GambitError::Internal(format!("Invalid header value: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_signer() -> OkxSigner {
        OkxSigner::new(
            "test-key".to_string(),
            "test-secret".to_string(),
            "test-pass".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_build_message() {
        let msg = OkxSigner::build_message(
            "2024-01-01T00:00:00.000Z",
            "post",
            "/api/v5/trade/order",
            r#"{"instId":"BTC-USDT-SWAP"}"#,
        );
        assert_eq!(
            msg,
            r#"2024-01-01T00:00:00.000ZPOST/api/v5/trade/order{"instId":"BTC-USDT-SWAP"}"#
        );

        let msg_no_body = OkxSigner::build_message(
            "2024-01-01T00:00:00.000Z",
            "GET",
            "/api/v5/account/balance?ccy=USDT",
            "",
        );
        assert_eq!(
            msg_no_body,
            "2024-01-01T00:00:00.000ZGET/api/v5/account/balance?ccy=USDT"
        );
    }

    #[test]
    fn test_sign_is_deterministic_base64() {
        let signer = test_signer();
        let a = signer.sign("message").unwrap();
        let b = signer.sign("message").unwrap();
        assert_eq!(a, b);
        // 32-byte MAC encodes to 44 base64 chars
        assert_eq!(a.len(), 44);
        assert!(BASE64.decode(&a).is_ok());
    }

    #[test]
    fn test_query_string_changes_signature() {
        let signer = test_signer();
        let ts = "2024-01-01T00:00:00.000Z";
        let with_query = OkxSigner::build_message(ts, "GET", "/api/v5/market/candles?instId=BTC-USDT-SWAP&bar=1m", "");
        let without_query = OkxSigner::build_message(ts, "GET", "/api/v5/market/candles", "");
        let sig_with = signer.sign(&with_query).unwrap();
        let sig_without = signer.sign(&without_query).unwrap();
        assert_ne!(sig_with, sig_without);

        // Different query values must also diverge
        let other_query = OkxSigner::build_message(ts, "GET", "/api/v5/market/candles?instId=ETH-USDT-SWAP&bar=1m", "");
        assert_ne!(signer.sign(&other_query).unwrap(), sig_with);
    }

    #[test]
    fn test_rest_timestamp_format() {
        let dt = Utc.timestamp_opt(1704067200, 0).unwrap();
        assert_eq!(format_rest_timestamp(&dt), "2024-01-01T00:00:00.000Z");

        let with_millis = Utc.timestamp_millis_opt(1704067200123).unwrap();
        assert_eq!(format_rest_timestamp(&with_millis), "2024-01-01T00:00:00.123Z");
    }

    #[test]
    fn test_ws_login_args_shape() {
        let signer = test_signer();
        let args = signer.ws_login_args().unwrap();
        assert_eq!(args.api_key, "test-key");
        assert_eq!(args.passphrase, "test-pass");
        // Epoch seconds, not milliseconds
        assert!(args.timestamp.len() == 10);
        assert_eq!(args.sign.len(), 44);
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let result = OkxSigner::new(String::new(), "s".to_string(), "p".to_string());
        assert!(matches!(result, Err(GambitError::MissingCredentials(_))));
    }
}
