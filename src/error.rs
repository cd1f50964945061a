use thiserror::Error;

/// Main error type for the trading client
#[derive(Error, Debug)]
pub enum GambitError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx HTTP response whose body did not carry a parseable exchange
    /// envelope, so no business code is available.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Transport succeeded but the exchange rejected the request at the
    /// business layer. `code` is the exchange's own status code (top-level
    /// `code` or a per-row `sCode`), kept so callers can branch on it.
    #[error("Exchange rejected request (code {code}): {message}")]
    Exchange { code: String, message: String },

    #[error("Order not found: {cl_ord_id}")]
    OrderNotFound { cl_ord_id: String },

    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for GambitError
pub type Result<T> = std::result::Result<T, GambitError>;

impl GambitError {
    /// Exchange business code carried by this error, if any.
    pub fn business_code(&self) -> Option<&str> {
        match self {
            GambitError::Exchange { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Whether a retry of an idempotent read could plausibly succeed.
    ///
    /// Business rejections are deterministic and never retried; only
    /// transport-level failures qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            GambitError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            GambitError::HttpStatus { status, .. } => *status >= 500,
            GambitError::WebSocket(_) | GambitError::Io(_) => true,
            _ => false,
        }
    }
}
