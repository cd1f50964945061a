use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub trade: TradeConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Exchange endpoints and credentials.
///
/// Regional API keys (EEA/US) only work against their regional base URL,
/// so both demo and production URLs are configurable.
#[derive(Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url_demo: String,
    #[serde(default = "default_base_url")]
    pub base_url_prod: String,
    /// Demo (paper) trading: requests carry the simulated-trading header.
    #[serde(default)]
    pub demo: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

impl ExchangeConfig {
    /// Active REST base URL for the configured environment.
    pub fn base_url(&self) -> &str {
        if self.demo {
            &self.base_url_demo
        } else {
            &self.base_url_prod
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty() && !self.passphrase.is_empty()
    }
}

// Secrets never appear in debug output or logs.
impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("base_url_demo", &self.base_url_demo)
            .field("base_url_prod", &self.base_url_prod)
            .field("demo", &self.demo)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("passphrase", &redact(&self.passphrase))
            .field("timeout_sec", &self.timeout_sec)
            .finish()
    }
}

impl Drop for ExchangeConfig {
    fn drop(&mut self) {
        self.api_secret.zeroize();
        self.passphrase.zeroize();
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "***"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    /// Instrument to trade (e.g. "BTC-USDT-SWAP")
    pub inst_id: String,
    /// Candle interval (e.g. "1m", "5m")
    #[serde(default = "default_bar")]
    pub bar: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Margin mode: "cross" or "isolated"
    #[serde(default = "default_td_mode")]
    pub td_mode: String,
    /// Fraction of equity risked per order (0.05 = 5% notional)
    #[serde(default = "default_risk_pct")]
    pub risk_pct: Decimal,
    /// Take-profit distance as a fraction of entry price
    #[serde(default = "default_tp_pct")]
    pub tp_pct: Decimal,
    /// Stop-loss distance as a fraction of entry price
    #[serde(default = "default_sl_pct")]
    pub sl_pct: Decimal,
    /// Maximum concurrent positions; 1 blocks opening against an open side
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    /// Seconds before a pending order is reconciled against the exchange
    #[serde(default = "default_order_timeout_sec")]
    pub order_timeout_sec: u64,
    /// Minimum seconds between successful submissions
    #[serde(default)]
    pub cooldown_sec: u64,
    /// Minimum seconds after a rejection before a new signal is admitted
    #[serde(default = "default_reject_cooldown_sec")]
    pub reject_cooldown_sec: u64,
    /// Cancel a still-live order once the timeout elapses
    #[serde(default = "default_true")]
    pub cancel_on_timeout: bool,
    /// Fraction of available balance usable as margin (safety buffer)
    #[serde(default = "default_margin_buffer_ratio")]
    pub margin_buffer_ratio: Decimal,
    /// Fallback minimum available balance when contract value is unknown
    #[serde(default = "default_min_avail_usdt")]
    pub min_avail_usdt: Decimal,
    /// Seconds between portfolio refreshes in the control loop
    #[serde(default = "default_portfolio_refresh_sec")]
    pub portfolio_refresh_sec: u64,
    /// Control loop sleep per tick
    #[serde(default = "default_loop_sleep_sec")]
    pub loop_sleep_sec: u64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            inst_id: String::new(),
            bar: default_bar(),
            leverage: default_leverage(),
            td_mode: default_td_mode(),
            risk_pct: default_risk_pct(),
            tp_pct: default_tp_pct(),
            sl_pct: default_sl_pct(),
            max_positions: default_max_positions(),
            order_timeout_sec: default_order_timeout_sec(),
            cooldown_sec: 0,
            reject_cooldown_sec: default_reject_cooldown_sec(),
            cancel_on_timeout: true,
            margin_buffer_ratio: default_margin_buffer_ratio(),
            min_avail_usdt: default_min_avail_usdt(),
            portfolio_refresh_sec: default_portfolio_refresh_sec(),
            loop_sleep_sec: default_loop_sleep_sec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Heartbeat interval for both sockets (seconds)
    #[serde(default = "default_ping_interval_sec")]
    pub ping_interval_sec: u64,
    /// Fixed delay between reconnect attempts (seconds)
    #[serde(default = "default_reconnect_delay_sec")]
    pub reconnect_delay_sec: u64,
    /// Consecutive login failures before the private stream disables itself
    #[serde(default = "default_max_login_failures")]
    pub max_login_failures: u32,
    /// Maximum age of a stream-pushed snapshot before REST is used instead
    #[serde(default = "default_ws_fresh_window_sec")]
    pub ws_fresh_window_sec: u64,
    /// Explicit public endpoint; inferred from the REST host when unset
    #[serde(default)]
    pub public_url: Option<String>,
    /// Explicit private endpoint; inferred from the REST host when unset
    #[serde(default)]
    pub private_url: Option<String>,
    #[serde(default = "default_true")]
    pub enable_public: bool,
    #[serde(default = "default_true")]
    pub enable_private: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval_sec: default_ping_interval_sec(),
            reconnect_delay_sec: default_reconnect_delay_sec(),
            max_login_failures: default_max_login_failures(),
            ws_fresh_window_sec: default_ws_fresh_window_sec(),
            public_url: None,
            private_url: None,
            enable_public: true,
            enable_private: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    /// Candles fetched for the REST fallback EMA computation
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            candle_limit: default_candle_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Daily drawdown from the day's baseline equity that halts trading
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for daily-rolling log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Emit JSON-formatted file logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            json: false,
        }
    }
}

fn default_base_url() -> String {
    "https://www.okx.com".to_string()
}

fn default_timeout_sec() -> u64 {
    10
}

fn default_bar() -> String {
    "1m".to_string()
}

fn default_leverage() -> u32 {
    10
}

fn default_td_mode() -> String {
    "cross".to_string()
}

fn default_risk_pct() -> Decimal {
    dec!(0.05)
}

fn default_tp_pct() -> Decimal {
    dec!(0.01)
}

fn default_sl_pct() -> Decimal {
    dec!(0.005)
}

fn default_max_positions() -> u32 {
    1
}

fn default_order_timeout_sec() -> u64 {
    60
}

fn default_reject_cooldown_sec() -> u64 {
    15
}

fn default_margin_buffer_ratio() -> Decimal {
    dec!(0.95)
}

fn default_min_avail_usdt() -> Decimal {
    dec!(5)
}

fn default_portfolio_refresh_sec() -> u64 {
    5
}

fn default_loop_sleep_sec() -> u64 {
    1
}

fn default_ping_interval_sec() -> u64 {
    15
}

fn default_reconnect_delay_sec() -> u64 {
    3
}

fn default_max_login_failures() -> u32 {
    3
}

fn default_ws_fresh_window_sec() -> u64 {
    5
}

fn default_ema_fast() -> usize {
    7
}

fn default_ema_slow() -> usize {
    21
}

fn default_candle_limit() -> u32 {
    100
}

fn default_daily_loss_limit_pct() -> Decimal {
    dec!(0.05)
}

fn default_store_path() -> String {
    "gambit.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("GAMBIT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (GAMBIT_EXCHANGE__API_KEY, etc.)
            .add_source(
                Environment::with_prefix("GAMBIT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trade.inst_id.trim().is_empty() {
            errors.push("trade.inst_id must be set".to_string());
        }

        if self.trade.leverage == 0 {
            errors.push("trade.leverage must be at least 1".to_string());
        }

        if self.trade.risk_pct <= Decimal::ZERO || self.trade.risk_pct > Decimal::ONE {
            errors.push("trade.risk_pct must be in (0, 1]".to_string());
        }

        if self.trade.tp_pct <= Decimal::ZERO {
            errors.push("trade.tp_pct must be positive".to_string());
        }

        if self.trade.sl_pct <= Decimal::ZERO || self.trade.sl_pct >= Decimal::ONE {
            errors.push("trade.sl_pct must be in (0, 1)".to_string());
        }

        if self.trade.margin_buffer_ratio <= Decimal::ZERO
            || self.trade.margin_buffer_ratio > Decimal::ONE
        {
            errors.push("trade.margin_buffer_ratio must be in (0, 1]".to_string());
        }

        if self.trade.td_mode != "cross" && self.trade.td_mode != "isolated" {
            errors.push(format!(
                "trade.td_mode must be \"cross\" or \"isolated\", got \"{}\"",
                self.trade.td_mode
            ));
        }

        if self.trade.order_timeout_sec == 0 {
            errors.push("trade.order_timeout_sec must be at least 1".to_string());
        }

        if self.strategy.ema_fast == 0 || self.strategy.ema_slow == 0 {
            errors.push("strategy EMA periods must be at least 1".to_string());
        }

        if self.strategy.ema_fast >= self.strategy.ema_slow {
            errors.push("strategy.ema_fast must be shorter than strategy.ema_slow".to_string());
        }

        if self.stream.max_login_failures == 0 {
            errors.push("stream.max_login_failures must be at least 1".to_string());
        }

        if self.risk.daily_loss_limit_pct <= Decimal::ZERO
            || self.risk.daily_loss_limit_pct >= Decimal::ONE
        {
            errors.push("risk.daily_loss_limit_pct must be in (0, 1)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
